//! Index/storage reconciliation
//!
//! Before the index is trusted, the set of stored snapshot ids is compared
//! against the union of all tier lists. Drift is never repaired silently:
//! the fault names every offending id.

use crate::index::BackupIndex;
use std::collections::BTreeSet;
use tracing::{debug, warn};
use vault_core::{ConsistencyFault, SnapshotId, ARCHIVE_EXT};

/// Outcome of a successful reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Stored snapshots referenced by at least one tier
    pub live: BTreeSet<SnapshotId>,
    /// Stored, unreferenced snapshots the index recorded as intents
    pub acknowledged_orphans: BTreeSet<SnapshotId>,
    /// Intents whose artifact is already gone
    pub stale_intents: BTreeSet<SnapshotId>,
}

impl Reconciliation {
    pub fn is_clean(&self) -> bool {
        self.acknowledged_orphans.is_empty() && self.stale_intents.is_empty()
    }
}

/// Compare the index with the stored snapshot ids
pub fn reconcile(
    index: &BackupIndex,
    stored: &BTreeSet<SnapshotId>,
) -> Result<Reconciliation, ConsistencyFault> {
    let referenced = index.referenced();
    let intents = index.intents();

    let missing_from_storage: Vec<SnapshotId> = referenced.difference(stored).cloned().collect();
    let missing_from_index: Vec<SnapshotId> = stored
        .iter()
        .filter(|id| !referenced.contains(*id) && !intents.contains(*id))
        .cloned()
        .collect();

    let fault = ConsistencyFault {
        missing_from_storage,
        missing_from_index,
    };
    if !fault.is_empty() {
        return Err(fault);
    }

    let acknowledged_orphans: BTreeSet<SnapshotId> = intents
        .iter()
        .filter(|id| stored.contains(*id) && !referenced.contains(*id))
        .cloned()
        .collect();
    let stale_intents: BTreeSet<SnapshotId> = intents
        .iter()
        .filter(|id| !stored.contains(*id))
        .cloned()
        .collect();

    for id in &acknowledged_orphans {
        warn!("Snapshot {} is stored but unreferenced (recorded intent), scheduling removal", id);
    }

    Ok(Reconciliation {
        live: referenced,
        acknowledged_orphans,
        stale_intents,
    })
}

/// Snapshot ids among a store listing
///
/// Only archives directly under `prefix` count; nested keys, the index
/// itself, logs and locks are skipped. Archives whose name is not a
/// snapshot timestamp are ignored with a warning.
pub fn snapshot_ids_from_keys<'a>(
    prefix: &str,
    keys: impl IntoIterator<Item = &'a String>,
) -> BTreeSet<SnapshotId> {
    let mut ids = BTreeSet::new();
    for key in keys {
        let name = match key.strip_prefix(prefix) {
            Some(name) => name,
            None => continue,
        };
        if !name.ends_with(ARCHIVE_EXT) {
            continue;
        }
        if name.contains('/') {
            debug!("Ignoring nested archive {}", key);
            continue;
        }
        match SnapshotId::from_key(name) {
            Some(id) => {
                ids.insert(id);
            }
            None => warn!(
                "Ignoring archive without YYYYmmddHHMMSS name: {}",
                key
            ),
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> SnapshotId {
        SnapshotId::parse(s).unwrap()
    }

    fn set(ids: &[&str]) -> BTreeSet<SnapshotId> {
        ids.iter().map(|s| id(s)).collect()
    }

    fn index_with(tiers: &[(&str, &[&str])]) -> BackupIndex {
        let mut index = BackupIndex::new();
        for (tier, ids) in tiers {
            for s in *ids {
                index.append(tier, id(s)).unwrap();
            }
        }
        index
    }

    #[test]
    fn test_in_sync() {
        let index = index_with(&[
            ("daily", &["20240101000000", "20240102000000"]),
            ("weekly", &["20240101000000"]),
        ]);
        let stored = set(&["20240101000000", "20240102000000"]);

        let rec = reconcile(&index, &stored).unwrap();
        assert_eq!(rec.live, stored);
        assert!(rec.is_clean());
    }

    #[test]
    fn test_empty_index_empty_store() {
        let rec = reconcile(&BackupIndex::new(), &BTreeSet::new()).unwrap();
        assert!(rec.live.is_empty());
    }

    #[test]
    fn test_indexed_but_not_stored() {
        let index = index_with(&[("daily", &["20240101000000", "20240102000000"])]);
        let stored = set(&["20240102000000"]);

        let fault = reconcile(&index, &stored).unwrap_err();
        assert_eq!(fault.missing_from_storage, vec![id("20240101000000")]);
        assert!(fault.missing_from_index.is_empty());
        assert!(fault.to_string().contains("20240101000000"));
    }

    #[test]
    fn test_stored_but_not_indexed() {
        let index = index_with(&[("daily", &["20240101000000"])]);
        let stored = set(&["20240101000000", "20240109000000"]);

        let fault = reconcile(&index, &stored).unwrap_err();
        assert_eq!(fault.missing_from_index, vec![id("20240109000000")]);
        assert!(fault.missing_from_storage.is_empty());
    }

    #[test]
    fn test_both_directions_reported_together() {
        let index = index_with(&[("daily", &["20240101000000"])]);
        let stored = set(&["20240109000000"]);

        let fault = reconcile(&index, &stored).unwrap_err();
        assert_eq!(fault.missing_from_storage, vec![id("20240101000000")]);
        assert_eq!(fault.missing_from_index, vec![id("20240109000000")]);
    }

    #[test]
    fn test_pending_deletion_is_acknowledged() {
        let mut index = index_with(&[("daily", &["20240102000000"])]);
        index.pending_deletions.insert(id("20240101000000"));
        index.pending_deletions.insert(id("20231201000000"));
        let stored = set(&["20240101000000", "20240102000000"]);

        let rec = reconcile(&index, &stored).unwrap();
        assert_eq!(rec.acknowledged_orphans, set(&["20240101000000"]));
        assert_eq!(rec.stale_intents, set(&["20231201000000"]));
    }

    #[test]
    fn test_in_flight_is_acknowledged() {
        let mut index = index_with(&[("daily", &["20240101000000"])]);
        index.in_flight = Some(id("20240102000000"));
        let stored = set(&["20240101000000", "20240102000000"]);

        let rec = reconcile(&index, &stored).unwrap();
        assert_eq!(rec.acknowledged_orphans, set(&["20240102000000"]));
    }

    #[test]
    fn test_snapshot_ids_from_keys() {
        let keys: Vec<String> = vec![
            "20240101000000.zip".into(),
            "20240102000000.zip".into(),
            "backups_tracker.json".into(),
            "messages.log".into(),
            "holiday-photos.zip".into(),
        ];
        let ids = snapshot_ids_from_keys("", &keys);
        assert_eq!(ids, set(&["20240101000000", "20240102000000"]));
    }

    #[test]
    fn test_nested_archives_are_not_snapshots() {
        let keys: Vec<String> = vec![
            "site/20240101000000.zip".into(),
            "site/old/20240102000000.zip".into(),
            "old/20240103000000.zip".into(),
        ];
        assert_eq!(snapshot_ids_from_keys("site/", &keys), set(&["20240101000000"]));
        assert!(snapshot_ids_from_keys("", &keys).is_empty());
    }
}
