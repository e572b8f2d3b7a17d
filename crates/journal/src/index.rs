//! Persisted backup index
//!
//! Maps each tier name to the chronologically ordered ids of the snapshots
//! retained for that tier. The index lives next to the archives as
//! `backups_tracker.json` and is replaced atomically on every save.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use vault_core::{atomic_write, Result, SnapshotId, VaultError};

/// Current on-disk schema version
pub const SCHEMA_VERSION: u32 = 1;

/// File name of the index inside the backups directory
pub const INDEX_FILE_NAME: &str = "backups_tracker.json";

/// Tier name -> ordered snapshot ids, plus recorded intents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupIndex {
    pub schema_version: u32,

    /// Snapshot ids per tier, oldest first, strictly increasing
    #[serde(default)]
    pub tiers: BTreeMap<String, Vec<SnapshotId>>,

    /// Ids dropped from every tier whose physical deletion is not confirmed
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub pending_deletions: BTreeSet<SnapshotId>,

    /// Snapshot whose creation started but was never recorded in a tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<SnapshotId>,
}

impl Default for BackupIndex {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            tiers: BTreeMap::new(),
            pending_deletions: BTreeSet::new(),
            in_flight: None,
        }
    }
}

impl BackupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union of all tier lists
    pub fn referenced(&self) -> BTreeSet<SnapshotId> {
        self.tiers.values().flatten().cloned().collect()
    }

    /// Ids the index acknowledges as stored-but-unreferenced
    pub fn intents(&self) -> BTreeSet<SnapshotId> {
        let mut intents = self.pending_deletions.clone();
        intents.extend(self.in_flight.iter().cloned());
        intents
    }

    /// Most recent snapshot of a tier
    pub fn latest(&self, tier: &str) -> Option<&SnapshotId> {
        self.tiers.get(tier).and_then(|ids| ids.last())
    }

    pub fn tier(&self, tier: &str) -> &[SnapshotId] {
        self.tiers.get(tier).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether any tier references `id`
    pub fn references(&self, id: &SnapshotId) -> bool {
        self.tiers.values().any(|ids| ids.contains(id))
    }

    /// Append a new snapshot to a tier
    ///
    /// Fails if `id` does not sort after the tier's current newest entry.
    pub fn append(&mut self, tier: &str, id: SnapshotId) -> std::result::Result<(), String> {
        let ids = self.tiers.entry(tier.to_string()).or_default();
        if let Some(last) = ids.last() {
            if *last >= id {
                return Err(format!(
                    "cannot append {} to tier '{}': newest entry is {}",
                    id, tier, last
                ));
            }
        }
        ids.push(id);
        Ok(())
    }

    /// Check per-tier ordering and intent bookkeeping
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (tier, ids) in &self.tiers {
            if let Some(pair) = ids.windows(2).find(|w| w[0] >= w[1]) {
                return Err(format!(
                    "tier '{}' is not strictly increasing ({} then {})",
                    tier, pair[0], pair[1]
                ));
            }
        }
        if let Some(id) = self.pending_deletions.iter().find(|id| self.references(id)) {
            return Err(format!(
                "{} is pending deletion but still referenced by a tier",
                id
            ));
        }
        Ok(())
    }

    /// Total number of tier references
    pub fn reference_count(&self) -> usize {
        self.tiers.values().map(Vec::len).sum()
    }
}

/// Index file inside a backups directory
#[derive(Debug, Clone)]
pub struct IndexFile {
    path: PathBuf,
}

impl IndexFile {
    /// Index file for the given backups directory
    pub fn open(backups_dir: &Path) -> Self {
        Self {
            path: backups_dir.join(INDEX_FILE_NAME),
        }
    }

    /// Index file at an explicit path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the index, or an empty one if none has been written yet
    pub fn load(&self) -> Result<BackupIndex> {
        if !self.path.exists() {
            tracing::debug!("No index at {}, starting empty", self.path.display());
            return Ok(BackupIndex::new());
        }

        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| VaultError::index(&self.path, format!("read failed: {}", e)))?;
        let index = parse_index(&contents).map_err(|reason| VaultError::index(&self.path, reason))?;
        index
            .validate()
            .map_err(|reason| VaultError::index(&self.path, reason))?;

        tracing::debug!(
            "Loaded index from {} ({} tiers, {} references)",
            self.path.display(),
            index.tiers.len(),
            index.reference_count()
        );
        Ok(index)
    }

    /// Atomically replace the persisted index
    pub fn persist(&self, index: &BackupIndex) -> Result<()> {
        index
            .validate()
            .map_err(|reason| VaultError::index(&self.path, reason))?;
        let json = serde_json::to_vec_pretty(index)
            .map_err(|e| VaultError::index(&self.path, format!("serialize failed: {}", e)))?;
        atomic_write(&self.path, &json)
            .map_err(|e| VaultError::index(&self.path, format!("{:#}", e)))?;
        tracing::debug!("Persisted index to {}", self.path.display());
        Ok(())
    }
}

/// Parse either the versioned schema or the legacy bare `{tier: [ids]}` map
fn parse_index(contents: &str) -> std::result::Result<BackupIndex, String> {
    let value: serde_json::Value =
        serde_json::from_str(contents).map_err(|e| format!("invalid JSON: {}", e))?;
    let object = value
        .as_object()
        .ok_or_else(|| "expected a JSON object".to_string())?;

    match object.get("schema_version") {
        Some(version) => {
            let version = version
                .as_u64()
                .ok_or_else(|| "schema_version must be an integer".to_string())?;
            if version > u64::from(SCHEMA_VERSION) {
                return Err(format!(
                    "schema version {} is newer than supported version {}",
                    version, SCHEMA_VERSION
                ));
            }
            serde_json::from_value(value).map_err(|e| format!("invalid index: {}", e))
        }
        None => migrate_legacy(object),
    }
}

fn migrate_legacy(
    object: &serde_json::Map<String, serde_json::Value>,
) -> std::result::Result<BackupIndex, String> {
    let mut index = BackupIndex::new();
    for (tier, ids) in object {
        let ids = ids
            .as_array()
            .ok_or_else(|| format!("tier '{}' is not a list", tier))?;
        let mut parsed = Vec::with_capacity(ids.len());
        for id in ids {
            let raw = id
                .as_str()
                .ok_or_else(|| format!("tier '{}' contains a non-string entry", tier))?;
            parsed.push(SnapshotId::parse_lenient(raw).map_err(|e| e.to_string())?);
        }
        index.tiers.insert(tier.clone(), parsed);
    }
    tracing::info!("Migrating legacy index ({} tiers)", index.tiers.len());
    Ok(index)
}
