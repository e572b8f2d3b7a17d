//! In-memory collaborators for lifecycle tests

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use vault_core::{Tier, TierName, TierSchedule};
use vault_journal::{Archiver, Collaborators, Extractor, IndexFile, ObjectStore, RunContext};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap()
}

/// `{daily: (23h, 7), weekly: (6.5d, 4)}`
pub fn daily_weekly() -> TierSchedule {
    TierSchedule::new(
        [
            Tier::new(TierName::Daily, Duration::hours(23), 7),
            Tier::new(TierName::Weekly, Duration::days(6) + Duration::hours(12), 4),
        ],
        Duration::zero(),
    )
    .unwrap()
}

pub fn daily_only(keep: u32) -> TierSchedule {
    TierSchedule::new([Tier::new(TierName::Daily, Duration::hours(23), keep)], Duration::zero()).unwrap()
}

/// Extractor writing `<data_set>.csv`, failing for the listed data sets
#[derive(Default)]
pub struct FakeExtractor {
    pub failing: Mutex<BTreeSet<String>>,
}

impl FakeExtractor {
    pub fn fail(&self, data_set: &str) {
        self.failing.lock().unwrap().insert(data_set.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(&self, data_set: &str, destination: &Path) -> Result<()> {
        if self.failing.lock().unwrap().contains(data_set) {
            bail!("extraction of {} exited with status 1", data_set);
        }
        std::fs::write(destination.join(format!("{}.csv", data_set)), b"id,name\n1,Smith\n")?;
        Ok(())
    }
}

/// Archiver concatenating the source file names into the destination
pub struct FakeArchiver;

#[async_trait]
impl Archiver for FakeArchiver {
    async fn create_archive(&self, source_files: &[PathBuf], password: &str, destination: &Path) -> Result<PathBuf> {
        let mut contents = format!("password={}\n", password);
        for file in source_files {
            let name = file.file_name().unwrap().to_string_lossy().to_string();
            contents.push_str(&name);
            contents.push('\n');
        }
        std::fs::write(destination, contents)?;
        Ok(destination.to_path_buf())
    }
}

/// Object store backed by a map
#[derive(Default)]
pub struct MemoryStore {
    pub objects: Mutex<BTreeMap<String, Vec<u8>>>,
    pub failing_deletes: Mutex<BTreeSet<String>>,
    pub fail_puts: Mutex<bool>,
}

impl MemoryStore {
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn insert(&self, key: &str) {
        self.objects.lock().unwrap().insert(key.to_string(), Vec::new());
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }

    pub fn fail_delete(&self, key: &str) {
        self.failing_deletes.lock().unwrap().insert(key.to_string());
    }

    pub fn heal(&self) {
        self.failing_deletes.lock().unwrap().clear();
        *self.fail_puts.lock().unwrap() = false;
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, prefix: &str) -> Result<BTreeMap<String, DateTime<Utc>>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .map(|k| (k.clone(), t0()))
            .collect())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        if *self.fail_puts.lock().unwrap() {
            bail!("upload of {} rejected", key);
        }
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.failing_deletes.lock().unwrap().contains(key) {
            bail!("delete of {} timed out", key);
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn presign(&self, key: &str, ttl: std::time::Duration) -> Result<String> {
        if !self.objects.lock().unwrap().contains_key(key) {
            bail!("no such key {}", key);
        }
        Ok(format!("memory://{}?ttl={}", key, ttl.as_secs()))
    }
}

/// One site's backups directory plus its collaborators
pub struct Harness {
    pub dir: TempDir,
    pub extractor: FakeExtractor,
    pub archiver: FakeArchiver,
    pub store: MemoryStore,
    pub schedule: TierSchedule,
    pub data_sets: Vec<String>,
}

impl Harness {
    pub fn new(schedule: TierSchedule) -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            extractor: FakeExtractor::default(),
            archiver: FakeArchiver,
            store: MemoryStore::default(),
            schedule,
            data_sets: vec!["individuals".to_string(), "pledges".to_string()],
        }
    }

    pub fn index_file(&self) -> IndexFile {
        IndexFile::open(self.dir.path())
    }

    pub fn context(&self, now: DateTime<Utc>) -> RunContext {
        RunContext {
            site: "ccb_backup".to_string(),
            schedule: self.schedule.clone(),
            now,
            data_sets: self.data_sets.clone(),
            archive_password: "hunter2".to_string(),
            presign_ttl: std::time::Duration::from_secs(604_800),
            index_file: self.index_file(),
            key_prefix: String::new(),
            staging_root: Some(self.dir.path().to_path_buf()),
        }
    }

    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            extractor: &self.extractor,
            archiver: &self.archiver,
            store: &self.store,
        }
    }

    /// Raw index bytes, empty if no index has been written
    pub fn index_bytes(&self) -> Vec<u8> {
        std::fs::read(self.index_file().path()).unwrap_or_default()
    }
}
