//! Run lock for a backups directory

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use vault_core::VaultError;

/// Lock file location inside the backups directory
pub const LOCK_FILE: &str = "locks/run.lock";

/// Exclusive lock held for the duration of one run
///
/// The `flock` is the lock; the file's content only names the holder. The
/// file itself stays in place after release so every process contends on
/// the same inode.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    #[allow(dead_code)]
    file: File,
}

/// Lock file content
#[derive(Debug, Serialize, Deserialize)]
struct LockContent {
    pid: u32,
    started_at: DateTime<Utc>,
}

impl RunLock {
    /// Acquire the lock without waiting
    ///
    /// Fails with `VaultError::LockContention` whenever another open file
    /// holds the `flock`, whatever the file contains. Content left by a
    /// process that died is overwritten.
    pub fn acquire(backups_dir: &Path) -> Result<Self> {
        let lock_path = backups_dir.join(LOCK_FILE);
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create locks directory")?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;

        if !try_flock_exclusive(&file)? {
            let holder = match Self::read_lock_content(&mut file) {
                Ok(holder) => format!(
                    "pid {} since {}",
                    holder.pid,
                    holder.started_at.format("%Y-%m-%d %H:%M:%S UTC")
                ),
                // Holder has not written its content yet
                Err(_) => "another run that is starting up".to_string(),
            };
            return Err(VaultError::LockContention(holder).into());
        }

        if let Ok(previous) = Self::read_lock_content(&mut file) {
            debug!("Lock file names pid {} from an earlier run", previous.pid);
        }
        Self::write_lock_content(&mut file)?;
        debug!("Acquired run lock {}", lock_path.display());

        Ok(Self {
            path: lock_path,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_lock_content(file: &mut File) -> Result<()> {
        let content = LockContent {
            pid: std::process::id(),
            started_at: Utc::now(),
        };
        let serialized =
            serde_json::to_string(&content).context("Failed to serialize lock content")?;

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serialized.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn read_lock_content(file: &mut File) -> Result<LockContent> {
        file.seek(SeekFrom::Start(0))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        serde_json::from_str(&contents).context("Failed to deserialize lock content")
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // Closing the file releases the flock
        debug!("Released run lock {}", self.path.display());
    }
}

/// Try to acquire exclusive file lock (non-blocking)
#[cfg(unix)]
fn try_flock_exclusive(file: &File) -> Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e.into()),
    }
}
