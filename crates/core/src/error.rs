//! Error taxonomy
//!
//! Every fault class maps to a distinct process exit status so that
//! schedulers and operators can tell them apart without parsing output.

use crate::snapshot::SnapshotId;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error for a backup run
#[derive(Debug, Error)]
pub enum VaultError {
    /// Malformed tier schedule; raised before the index is touched
    #[error(transparent)]
    ScheduleConfig(#[from] ScheduleConfigError),

    /// Another run holds the backups directory lock
    #[error("backups directory is locked by another run: {0}")]
    LockContention(String),

    /// Index and storage disagree
    #[error(transparent)]
    Consistency(#[from] ConsistencyFault),

    /// The snapshot artifact could not be produced or stored
    #[error("snapshot creation failed: {0:#}")]
    CreationFailure(anyhow::Error),

    /// The persisted index is unreadable or violates its invariants
    #[error("backup index {}: {reason}", .path.display())]
    Index { path: PathBuf, reason: String },

    /// Listing the object store failed
    #[error("object store error: {0:#}")]
    Storage(anyhow::Error),
}

impl VaultError {
    pub fn index(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::Index {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Process exit status for this fault class
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ScheduleConfig(_) => 2,
            Self::LockContention(_) => 3,
            Self::Consistency(_) => 4,
            Self::CreationFailure(_) => 5,
            Self::Index { .. } => 6,
            Self::Storage(_) => 7,
        }
    }
}

/// Malformed tier definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleConfigError {
    #[error("unknown tier '{0}' (expected one of: hourly, daily, weekly, monthly, yearly)")]
    UnknownTier(String),

    #[error("tier '{tier}': keep count must be an integer, got {value}")]
    NonIntegerKeep { tier: String, value: String },

    #[error("tier '{tier}': keep count must not be negative, got {value}")]
    NegativeKeep { tier: String, value: i64 },

    #[error("tier '{tier}': invalid interval '{input}': {reason}")]
    Interval {
        tier: String,
        input: String,
        reason: String,
    },

    #[error("invalid slop '{input}': {reason}")]
    Slop { input: String, reason: String },

    #[error("tier '{tier}': slop must be shorter than the tier interval")]
    SlopTooLarge { tier: String },

    #[error("schedule defines no tiers")]
    Empty,
}

/// Index/storage drift detected by reconciliation
///
/// Carries every offending id so the operator can correct the index or the
/// storage by hand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyFault {
    /// Indexed ids with no stored artifact
    pub missing_from_storage: Vec<SnapshotId>,
    /// Stored artifacts referenced by no tier
    pub missing_from_index: Vec<SnapshotId>,
}

impl ConsistencyFault {
    pub fn is_empty(&self) -> bool {
        self.missing_from_storage.is_empty() && self.missing_from_index.is_empty()
    }
}

fn join_ids(ids: &[SnapshotId]) -> String {
    ids.iter()
        .map(SnapshotId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for ConsistencyFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backup index is out of sync with storage")?;
        if !self.missing_from_storage.is_empty() {
            write!(
                f,
                "; indexed but not stored: {}",
                join_ids(&self.missing_from_storage)
            )?;
        }
        if !self.missing_from_index.is_empty() {
            write!(
                f,
                "; stored but not indexed: {}",
                join_ids(&self.missing_from_index)
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for ConsistencyFault {}
