//! Local backups directory as an object store

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vault_core::atomic_write;
use vault_journal::ObjectStore;
use walkdir::WalkDir;

/// Objects are files below a root directory, keyed by relative path
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative.is_absolute()
            || relative
                .components()
                .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            anyhow::bail!("Invalid object key '{}'", key);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn list(&self, prefix: &str) -> Result<BTreeMap<String, DateTime<Utc>>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || list_files(&root, &prefix))
            .await
            .context("Listing task panicked")?
    }

    async fn usage(&self, prefix: &str) -> Result<Option<u64>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let total = tokio::task::spawn_blocking(move || disk_usage(&root, &prefix))
            .await
            .context("Usage task panicked")??;
        Ok(Some(total))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::task::spawn_blocking(move || atomic_write(&path, &bytes))
            .await
            .context("Write task panicked")?
    }

    async fn put_file(&self, key: &str, source: &Path) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        // Same filesystem: a rename is atomic. Otherwise fall back to a copy.
        if tokio::fs::rename(source, &path).await.is_ok() {
            tracing::debug!("Moved {} to {}", source.display(), path.display());
            return Ok(());
        }
        let bytes = tokio::fs::read(source)
            .await
            .with_context(|| format!("Failed to read {}", source.display()))?;
        self.put(key, bytes).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("{} already absent", key);
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    async fn presign(&self, key: &str, ttl: Duration) -> Result<String> {
        let path = self.path_for(key)?;
        let path = tokio::fs::canonicalize(&path)
            .await
            .with_context(|| format!("No stored object {}", key))?;
        tracing::debug!(
            "Local objects do not expire; ignoring {}s lifetime for {}",
            ttl.as_secs(),
            key
        );
        Ok(format!("file://{}", path.display()))
    }
}

fn list_files(root: &Path, prefix: &str) -> Result<BTreeMap<String, DateTime<Utc>>> {
    let mut objects = BTreeMap::new();
    walk_objects(root, prefix, |key, meta| {
        let modified = meta
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from)
            .unwrap_or_default();
        objects.insert(key, modified);
    })?;
    Ok(objects)
}

fn disk_usage(root: &Path, prefix: &str) -> Result<u64> {
    let mut total = 0u64;
    walk_objects(root, prefix, |_, meta| {
        total += meta.map(|m| m.len()).unwrap_or(0);
    })?;
    Ok(total)
}

/// Visit every file below `root` whose key starts with `prefix`
fn walk_objects(
    root: &Path,
    prefix: &str,
    mut visit: impl FnMut(String, Option<std::fs::Metadata>),
) -> Result<()> {
    if !root.exists() {
        return Ok(());
    }

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to list {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = match entry.path().strip_prefix(root) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if !key.starts_with(prefix) {
            continue;
        }
        visit(key, entry.metadata().ok());
    }
    Ok(())
}
