//! Collaborator interfaces
//!
//! Extraction, archiving, storage and notification are outside the
//! retention core. Each call either succeeds or fails; retries and
//! timeouts belong to the implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pulls one data set out of the source application
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Write the data set's export file(s) into `destination`
    async fn extract(&self, data_set: &str, destination: &Path) -> Result<()>;
}

/// Packs extracted files into one password-protected artifact
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Create the archive at `destination` and return its path
    async fn create_archive(
        &self,
        source_files: &[PathBuf],
        password: &str,
        destination: &Path,
    ) -> Result<PathBuf>;
}

/// Flat key/value object storage holding the snapshot archives
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Keys under `prefix` with their last-modified time
    async fn list(&self, prefix: &str) -> Result<BTreeMap<String, DateTime<Utc>>>;

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Time-limited retrieval URL for `key`
    async fn presign(&self, key: &str, ttl: Duration) -> Result<String>;

    /// Total size in bytes of the objects under `prefix`, when the store can tell
    async fn usage(&self, _prefix: &str) -> Result<Option<u64>> {
        Ok(None)
    }

    /// Upload a local file
    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        self.put(key, bytes).await
    }
}

/// Delivers the end-of-run summary
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<()>;
}
