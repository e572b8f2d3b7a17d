//! Snapshot lifecycle controller
//!
//! One run walks a fixed sequence of states:
//!
//! ```text
//! Start -> ReconcilePre -> EvaluateDue -> CreateSnapshot -> UpdateIndex
//!       -> PlanDeletions -> ApplyDeletions -> ReconcilePost -> Done
//! ```
//!
//! with `Failed` reachable from any state. When nothing is due the run
//! skips creation but still prunes tiers that exceed their keep count. The index is persisted after the
//! creation intent is recorded, after the new snapshot is appended, after
//! tier references are pruned and after deletions are applied, so a crash at
//! any point leaves either a consistent index or an acknowledged orphan that
//! the next run removes. A retained snapshot is never deleted.

use crate::collab::{Archiver, Extractor, ObjectStore};
use crate::due::due_tiers;
use crate::index::{BackupIndex, IndexFile};
use crate::reconcile::{reconcile, snapshot_ids_from_keys};
use crate::report::{DeletionFailure, ExtractionFailure, RunReport};
use crate::retention::plan_deletions;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use vault_core::{Result, Snapshot, SnapshotId, TierSchedule, VaultError};
use walkdir::WalkDir;

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Start,
    ReconcilePre,
    EvaluateDue,
    CreateSnapshot,
    UpdateIndex,
    PlanDeletions,
    ApplyDeletions,
    ReconcilePost,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Start => "START",
            RunState::ReconcilePre => "RECONCILE_PRE",
            RunState::EvaluateDue => "EVALUATE_DUE",
            RunState::CreateSnapshot => "CREATE_SNAPSHOT",
            RunState::UpdateIndex => "UPDATE_INDEX",
            RunState::PlanDeletions => "PLAN_DELETIONS",
            RunState::ApplyDeletions => "APPLY_DELETIONS",
            RunState::ReconcilePost => "RECONCILE_POST",
            RunState::Done => "DONE",
            RunState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Immutable inputs of one run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub site: String,
    pub schedule: TierSchedule,
    /// Start of the run; names the new snapshot
    pub now: DateTime<Utc>,
    /// Data sets handed to the extractor, in order
    pub data_sets: Vec<String>,
    pub archive_password: String,
    pub presign_ttl: std::time::Duration,
    pub index_file: IndexFile,
    /// Prefix of snapshot keys in the object store
    pub key_prefix: String,
    /// Parent directory for staging; system temp dir if `None`
    pub staging_root: Option<PathBuf>,
}

impl RunContext {
    pub fn object_key(&self, id: &SnapshotId) -> String {
        format!("{}{}", self.key_prefix, id.key())
    }
}

/// External collaborators used by a run
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub extractor: &'a dyn Extractor,
    pub archiver: &'a dyn Archiver,
    pub store: &'a dyn ObjectStore,
}

/// Drives one backup run against a site's index and store
pub struct LifecycleController<'a> {
    ctx: &'a RunContext,
    collab: Collaborators<'a>,
    state: RunState,
}

impl<'a> LifecycleController<'a> {
    pub fn new(ctx: &'a RunContext, collab: Collaborators<'a>) -> Self {
        Self {
            ctx,
            collab,
            state: RunState::Start,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Execute the run
    ///
    /// Faults found before any mutation abort with no side effects.
    /// Extraction, deletion and post-run drift problems are recorded in the
    /// report instead of failing the run.
    pub async fn run(&mut self) -> Result<RunReport> {
        match self.run_states().await {
            Ok(report) => {
                self.enter(RunState::Done);
                Ok(report)
            }
            Err(e) => {
                error!("Backup run for {} failed in {}: {}", self.ctx.site, self.state, e);
                self.state = RunState::Failed;
                Err(e)
            }
        }
    }

    fn enter(&mut self, next: RunState) {
        debug!("{} -> {}", self.state, next);
        self.state = next;
    }

    async fn run_states(&mut self) -> Result<RunReport> {
        let ctx = self.ctx;
        let mut report = RunReport::new(&ctx.site, ctx.now);

        let mut index = ctx.index_file.load()?;

        self.enter(RunState::ReconcilePre);
        let stored = self.stored_ids().await?;
        let rec = reconcile(&index, &stored)?;
        if !rec.is_clean() {
            self.clear_intents(&mut index, &rec.acknowledged_orphans, &rec.stale_intents, &mut report)
                .await?;
        }

        self.enter(RunState::EvaluateDue);
        let due = due_tiers(&index, &ctx.schedule, ctx.now);
        if due.is_empty() {
            info!("No backups to do for site {}", ctx.site);
            if self.prune(&mut index, &mut report).await? {
                self.enter(RunState::ReconcilePost);
                self.verify_after_run(&index, &mut report).await;
            } else {
                report.stored_count = stored.len() - report.orphans_cleaned.len();
                self.record_usage(&mut report).await;
            }
            return Ok(report);
        }
        let names: Vec<&str> = due.iter().map(|t| t.as_str()).collect();
        info!("Doing new backup for site {} on {} schedule", ctx.site, names.join(", "));
        report.due_tiers = due.clone();

        self.enter(RunState::CreateSnapshot);
        let snapshot = Snapshot::at(ctx.now);
        if stored.contains(&snapshot.id) {
            return Err(VaultError::CreationFailure(anyhow::anyhow!(
                "snapshot {} already exists",
                snapshot.id
            )));
        }
        index.in_flight = Some(snapshot.id.clone());
        self.persist(&index)?;
        self.create_snapshot(&snapshot.id, &mut report)
            .await
            .map_err(VaultError::CreationFailure)?;
        info!("Completed backup {} for site {}", snapshot.id, ctx.site);
        report.snapshot = Some(snapshot.id.clone());

        self.enter(RunState::UpdateIndex);
        for tier in &due {
            index
                .append(tier.as_str(), snapshot.id.clone())
                .map_err(|reason| VaultError::index(ctx.index_file.path(), reason))?;
        }
        index.in_flight = None;
        self.persist(&index)?;

        self.prune(&mut index, &mut report).await?;

        self.enter(RunState::ReconcilePost);
        self.verify_after_run(&index, &mut report).await;

        match self
            .collab
            .store
            .presign(&ctx.object_key(&snapshot.id), ctx.presign_ttl)
            .await
        {
            Ok(url) => report.presigned_url = Some(url),
            Err(e) => {
                warn!("Could not create retrieval URL for {}: {:#}", snapshot.id, e);
                report
                    .warnings
                    .push(format!("retrieval URL for {} unavailable: {:#}", snapshot.id, e));
            }
        }

        Ok(report)
    }

    async fn stored_ids(&self) -> Result<BTreeSet<SnapshotId>> {
        let listing = self
            .collab
            .store
            .list(&self.ctx.key_prefix)
            .await
            .map_err(VaultError::Storage)?;
        Ok(snapshot_ids_from_keys(&self.ctx.key_prefix, listing.keys()))
    }

    /// Trim every tier to its keep count and delete what no tier references
    ///
    /// Returns whether the index changed.
    async fn prune(&mut self, index: &mut BackupIndex, report: &mut RunReport) -> Result<bool> {
        self.enter(RunState::PlanDeletions);
        let plan = plan_deletions(index, &self.ctx.schedule);
        if plan.index == *index {
            return Ok(false);
        }
        let deletions = plan.deletions;
        *index = plan.index;
        index.pending_deletions.extend(deletions.iter().cloned());
        self.persist(index)?;

        self.enter(RunState::ApplyDeletions);
        if !deletions.is_empty() {
            self.apply_deletions(index, &deletions, report).await;
            self.persist(index)?;
        }
        Ok(true)
    }

    async fn record_usage(&self, report: &mut RunReport) {
        match self.collab.store.usage(&self.ctx.key_prefix).await {
            Ok(bytes) => report.stored_bytes = bytes,
            Err(e) => debug!("Could not measure storage usage: {:#}", e),
        }
    }

    fn persist(&self, index: &BackupIndex) -> Result<()> {
        self.ctx.index_file.persist(index)
    }

    /// Remove acknowledged orphans and forget intents that are already gone
    async fn clear_intents(
        &self,
        index: &mut BackupIndex,
        orphans: &BTreeSet<SnapshotId>,
        stale: &BTreeSet<SnapshotId>,
        report: &mut RunReport,
    ) -> Result<()> {
        for id in stale {
            debug!("Intent {} has no stored artifact, clearing", id);
            forget_intent(index, id);
        }
        for id in orphans {
            match self.collab.store.delete(&self.ctx.object_key(id)).await {
                Ok(()) => {
                    info!("Deleted leftover backup {}", id);
                    forget_intent(index, id);
                    report.orphans_cleaned.push(id.clone());
                }
                Err(e) => {
                    error!("Could not delete leftover backup {}: {:#}", id, e);
                    // Free the in-flight slot; retry as a pending deletion
                    if index.in_flight.as_ref() == Some(id) {
                        index.in_flight = None;
                        index.pending_deletions.insert(id.clone());
                    }
                    report.deletion_failures.push(DeletionFailure {
                        id: id.clone(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }
        self.persist(index)
    }

    async fn create_snapshot(&self, id: &SnapshotId, report: &mut RunReport) -> anyhow::Result<()> {
        let ctx = self.ctx;
        let mut builder = tempfile::Builder::new();
        builder.prefix("ccb_backup_");
        let staging = match &ctx.staging_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .context("Failed to create staging directory")?;

        let data_dir = staging.path().join("data");
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;

        for data_set in &ctx.data_sets {
            debug!("Extracting {} into {}", data_set, data_dir.display());
            match self.collab.extractor.extract(data_set, &data_dir).await {
                Ok(()) => info!("Extracted {}", data_set),
                Err(e) => {
                    error!("Extraction of {} failed: {:#}", data_set, e);
                    report.extraction_failures.push(ExtractionFailure {
                        data_set: data_set.clone(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        let files = collect_files(&data_dir)?;
        if files.is_empty() {
            anyhow::bail!(
                "no data was extracted ({} of {} data sets failed)",
                report.extraction_failures.len(),
                ctx.data_sets.len()
            );
        }

        let archive_path = staging.path().join(id.key());
        let archive = self
            .collab
            .archiver
            .create_archive(&files, &ctx.archive_password, &archive_path)
            .await
            .context("Failed to create archive")?;

        let key = ctx.object_key(id);
        self.collab
            .store
            .put_file(&key, &archive)
            .await
            .with_context(|| format!("Failed to store {}", key))?;

        let staging_path = staging.path().to_path_buf();
        match staging.close() {
            Ok(()) => debug!("Removed staging directory {}", staging_path.display()),
            Err(e) => warn!(
                "Could not remove staging directory {}: {}",
                staging_path.display(),
                e
            ),
        }
        Ok(())
    }

    async fn apply_deletions(
        &self,
        index: &mut BackupIndex,
        deletions: &BTreeSet<SnapshotId>,
        report: &mut RunReport,
    ) {
        for id in deletions {
            match self.collab.store.delete(&self.ctx.object_key(id)).await {
                Ok(()) => {
                    info!("Backup {} deleted", id);
                    index.pending_deletions.remove(id);
                    report.deleted.push(id.clone());
                }
                Err(e) => {
                    error!("Failed to delete backup {}: {:#}", id, e);
                    report.deletion_failures.push(DeletionFailure {
                        id: id.clone(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }
    }

    async fn verify_after_run(&self, index: &BackupIndex, report: &mut RunReport) {
        let stored = match self.stored_ids().await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Post-run verification could not list storage: {}", e);
                report.warnings.push(format!("post-run verification skipped: {}", e));
                return;
            }
        };
        report.stored_count = stored.len();
        self.record_usage(report).await;

        match reconcile(index, &stored) {
            Ok(rec) => {
                for id in &rec.acknowledged_orphans {
                    report
                        .warnings
                        .push(format!("{} is awaiting deletion on the next run", id));
                }
            }
            Err(fault) => {
                warn!("Post-run verification: {}", fault);
                report.warnings.push(fault.to_string());
            }
        }
    }
}

fn forget_intent(index: &mut BackupIndex, id: &SnapshotId) {
    index.pending_deletions.remove(id);
    if index.in_flight.as_ref() == Some(id) {
        index.in_flight = None;
    }
}

/// Regular files below `dir`, sorted
fn collect_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}
