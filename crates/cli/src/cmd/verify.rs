//! Compare the index with the stored archives without changing either

use crate::locks::RunLock;
use crate::store::LocalStore;
use crate::system_config::SystemConfig;
use anyhow::Result;
use owo_colors::OwoColorize;
use vault_core::VaultError;
use vault_journal::{reconcile, snapshot_ids_from_keys, IndexFile, ObjectStore, Reconciliation};

pub async fn run(config: &SystemConfig) -> Result<()> {
    let rec = check(config).await?;

    println!("{}", "Index and storage agree".green().bold());
    println!("Snapshots:     {}", rec.live.len());
    for id in &rec.acknowledged_orphans {
        println!("{} {} awaits removal on the next run", "Note:".yellow(), id);
    }
    for id in &rec.stale_intents {
        println!("{} {} is already gone from storage", "Note:".yellow(), id);
    }
    Ok(())
}

/// Reconcile under the run lock
pub async fn check(config: &SystemConfig) -> Result<Reconciliation> {
    let _lock = RunLock::acquire(&config.backups_dir)?;
    let index = IndexFile::open(&config.backups_dir).load()?;
    let listing = LocalStore::new(&config.backups_dir)
        .list("")
        .await
        .map_err(VaultError::Storage)?;
    let stored = snapshot_ids_from_keys("", listing.keys());

    let rec = reconcile(&index, &stored).map_err(VaultError::from)?;
    Ok(rec)
}
