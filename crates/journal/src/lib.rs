//! Backup index and run lifecycle
//!
//! This crate provides:
//! - The persisted backup index (`backups_tracker.json`)
//! - Index/storage reconciliation
//! - Due-ness evaluation and retention planning
//! - Collaborator traits for extraction, archiving, storage and notification
//! - The snapshot lifecycle controller driving one run

pub mod collab;
pub mod due;
pub mod index;
pub mod lifecycle;
pub mod reconcile;
pub mod report;
pub mod retention;

// Re-exports
pub use collab::{Archiver, Extractor, Notifier, ObjectStore};
pub use due::{due_tiers, next_due_at};
pub use index::{BackupIndex, IndexFile, INDEX_FILE_NAME, SCHEMA_VERSION};
pub use lifecycle::{Collaborators, LifecycleController, RunContext, RunState};
pub use reconcile::{reconcile, snapshot_ids_from_keys, Reconciliation};
pub use report::{format_size, notify_outcome, DeletionFailure, ExtractionFailure, RunReport};
pub use retention::{plan_deletions, RetentionPlan};
