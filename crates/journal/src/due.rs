//! Due-ness evaluation
//!
//! A tier is due when it holds no snapshots, or when more than its
//! effective interval (`min_interval - slop`) has passed since its newest
//! snapshot.

use crate::index::BackupIndex;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::{debug, warn};
use vault_core::{Tier, TierName, TierSchedule};

/// Tiers that need a new snapshot at `now`
pub fn due_tiers(index: &BackupIndex, schedule: &TierSchedule, now: DateTime<Utc>) -> BTreeSet<TierName> {
    schedule
        .tiers()
        .filter(|tier| is_due(index, schedule, tier, now))
        .map(|tier| tier.name)
        .collect()
}

fn is_due(index: &BackupIndex, schedule: &TierSchedule, tier: &Tier, now: DateTime<Utc>) -> bool {
    let latest = match index.latest(tier.name.as_str()) {
        Some(id) => id,
        None => {
            debug!("Tier {} has no snapshots, due", tier.name);
            return true;
        }
    };

    let last = latest.created_at();
    if last > now {
        warn!(
            "Newest {} snapshot {} is in the future (now {}), treating tier as not due",
            tier.name,
            latest,
            now.format("%Y-%m-%d %H:%M:%S")
        );
        return false;
    }

    let elapsed = now - last;
    let due = elapsed > schedule.effective_interval(tier);
    debug!(
        "Tier {}: newest {}, elapsed {}s, interval {}s, due={}",
        tier.name,
        latest,
        elapsed.num_seconds(),
        schedule.effective_interval(tier).num_seconds(),
        due
    );
    due
}

/// Earliest time at which `tier` becomes due, `None` if it is due now
pub fn next_due_at(index: &BackupIndex, schedule: &TierSchedule, tier: &Tier) -> Option<DateTime<Utc>> {
    let last = index.latest(tier.name.as_str())?.created_at();
    // Strictly greater-than, so the first due second is one past the boundary
    Some(last + schedule.effective_interval(tier) + chrono::Duration::seconds(1))
}
