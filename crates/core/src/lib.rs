//! Core types for ccb-vault
//!
//! This crate provides:
//! - Timestamp-derived snapshot identifiers
//! - Retention tier schedules and their parsing
//! - The typed error taxonomy shared by every crate
//! - Crash-safe file writes

pub mod error;
pub mod schedule;
pub mod snapshot;
pub mod store;

// Re-exports
pub use error::{ConsistencyFault, ScheduleConfigError, VaultError};
pub use schedule::{format_interval, parse_interval, ScalarSpec, Tier, TierName, TierSchedule, TierSpec};
pub use snapshot::{InvalidSnapshotId, Snapshot, SnapshotId, ARCHIVE_EXT, TIMESTAMP_FORMAT};
pub use store::atomic_write;

/// Result type for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;
