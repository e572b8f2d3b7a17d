//! Shared utilities for CLI commands

use chrono::{DateTime, Utc};
use vault_core::{ScheduleConfigError, VaultError};

/// Process exit status for an error returned by a command
///
/// Typed vault faults keep their own status; everything else is 1.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<VaultError>() {
        return e.exit_code();
    }
    if err.downcast_ref::<ScheduleConfigError>().is_some() {
        return 2;
    }
    1
}

/// Format `ts` relative to `now` ("2 hours ago", "in 3 days")
pub fn format_relative_time(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(ts);
    let (seconds, future) = if delta.num_seconds() >= 0 {
        (delta.num_seconds(), false)
    } else {
        (-delta.num_seconds(), true)
    };

    let amount = if seconds < 60 {
        format!("{} seconds", seconds)
    } else if seconds < 3600 {
        format!("{} minutes", seconds / 60)
    } else if seconds < 86400 {
        format!("{} hours", seconds / 3600)
    } else if seconds < 604800 {
        format!("{} days", seconds / 86400)
    } else {
        format!("{} weeks", seconds / 604800)
    };

    if future {
        format!("in {}", amount)
    } else {
        format!("{} ago", amount)
    }
}

/// Format timestamp as absolute time ("2024-01-03 14:30:00 UTC")
pub fn format_absolute_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
