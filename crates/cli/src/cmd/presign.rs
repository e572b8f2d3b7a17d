//! Print a retrieval URL for a stored snapshot

use crate::store::LocalStore;
use crate::system_config::SystemConfig;
use anyhow::{bail, Context, Result};
use std::time::Duration;
use vault_core::SnapshotId;
use vault_journal::ObjectStore;

pub async fn run(config: &SystemConfig, snapshot: &str, expire_secs: Option<&str>) -> Result<()> {
    let url = presign_url(config, snapshot, expire_secs).await?;
    println!("{}", url);
    Ok(())
}

pub async fn presign_url(config: &SystemConfig, snapshot: &str, expire_secs: Option<&str>) -> Result<String> {
    let id = SnapshotId::parse_lenient(snapshot)?;
    let ttl = match expire_secs {
        Some(raw) => parse_expiry(raw)?,
        None => config.presign_ttl(),
    };

    LocalStore::new(&config.backups_dir)
        .presign(&id.key(), ttl)
        .await
        .with_context(|| format!("Cannot create retrieval URL for {}", id))
}

/// Expiry must be a positive whole number of seconds
fn parse_expiry(raw: &str) -> Result<Duration> {
    let secs: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("Invalid integer for expiry: '{}'", raw))?;
    if secs <= 0 {
        bail!("Expiry must be a positive number of seconds: '{}'", raw);
    }
    Ok(Duration::from_secs(secs as u64))
}
