//! Retention planning
//!
//! Each tier is pruned independently down to its keep count. A snapshot is
//! only planned for deletion once no tier references it any more; a
//! snapshot still held by even one tier survives.

use crate::index::BackupIndex;
use std::collections::BTreeSet;
use tracing::{debug, warn};
use vault_core::{SnapshotId, TierSchedule};

/// Pruned index plus the snapshots it no longer references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPlan {
    /// Index with every tier trimmed to its keep count
    pub index: BackupIndex,
    /// Snapshots referenced before pruning and by no tier after
    pub deletions: BTreeSet<SnapshotId>,
}

impl RetentionPlan {
    pub fn is_noop(&self) -> bool {
        self.deletions.is_empty()
    }
}

/// Compute the full deletion set before anything is removed
pub fn plan_deletions(index: &BackupIndex, schedule: &TierSchedule) -> RetentionPlan {
    let before = index.referenced();
    let mut pruned = index.clone();

    // Phase 1: trim each tier to its keep count
    for (tier_key, ids) in pruned.tiers.iter_mut() {
        let tier = match schedule.get_by_key(tier_key) {
            Some(tier) => tier,
            None => {
                warn!(
                    "Tier '{}' is in the index but not in the schedule; keeping its {} snapshots",
                    tier_key,
                    ids.len()
                );
                continue;
            }
        };

        if tier.keep_count == 0 {
            continue;
        }
        let keep = tier.keep_count as usize;
        if ids.len() > keep {
            let excess = ids.len() - keep;
            let dropped: Vec<SnapshotId> = ids.drain(..excess).collect();
            debug!(
                "Tier {}: dropping {} references ({}..={})",
                tier.name,
                dropped.len(),
                dropped[0],
                dropped[dropped.len() - 1]
            );
        }
    }

    // Phase 2: anything no longer referenced by any tier is deletable
    let after = pruned.referenced();
    let deletions: BTreeSet<SnapshotId> = before.difference(&after).cloned().collect();

    RetentionPlan {
        index: pruned,
        deletions,
    }
}
