//! Perform one backup run

use crate::archive::ZipArchiver;
use crate::extract::CommandExtractor;
use crate::locks::RunLock;
use crate::notify;
use crate::store::LocalStore;
use crate::system_config::SystemConfig;
use crate::util;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use vault_core::{SnapshotId, VaultError};
use vault_journal::{
    format_size, notify_outcome, Collaborators, IndexFile, LifecycleController, Notifier,
    RunContext, RunReport,
};

pub async fn run(config: &SystemConfig, no_email: bool) -> Result<()> {
    let notifier = notify::notifier_for(&config.notify, no_email);
    let outcome = execute(config, Utc::now()).await;
    finish(config, notifier.as_ref(), outcome).await
}

/// Run the lifecycle under the backups directory lock
pub async fn execute(config: &SystemConfig, now: DateTime<Utc>) -> Result<RunReport> {
    config.validate().context("Invalid configuration")?;
    let schedule = config.schedule().map_err(VaultError::from)?;
    let password = config.archive_password()?;

    std::fs::create_dir_all(&config.backups_dir)
        .with_context(|| format!("Failed to create {}", config.backups_dir.display()))?;
    let _lock = RunLock::acquire(&config.backups_dir)?;

    let ctx = RunContext {
        site: config.site.clone(),
        schedule,
        now,
        data_sets: config.data_set_names(),
        archive_password: password,
        presign_ttl: config.presign_ttl(),
        index_file: IndexFile::open(&config.backups_dir),
        key_prefix: String::new(),
        staging_root: None,
    };
    let extractor = CommandExtractor::new(&config.data_sets, config.extract_timeout(), now);
    let archiver = ZipArchiver;
    let store = LocalStore::new(&config.backups_dir);

    let mut controller = LifecycleController::new(
        &ctx,
        Collaborators {
            extractor: &extractor,
            archiver: &archiver,
            store: &store,
        },
    );
    let report = controller.run().await?;
    Ok(report)
}

/// Notify, print the summary and hand the outcome back to `main`
pub async fn finish(
    config: &SystemConfig,
    notifier: &dyn Notifier,
    outcome: Result<RunReport>,
) -> Result<()> {
    if let Err(e) = notify_outcome(notifier, &config.notify.recipients, &config.site, &outcome).await {
        tracing::error!("Failed to send notification: {:#}", e);
    }

    let report = outcome?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    match &report.snapshot {
        Some(id) => {
            let tiers: Vec<&str> = report.due_tiers.iter().map(|t| t.as_str()).collect();
            println!(
                "{} {} ({})",
                "Created backup".green().bold(),
                id.as_str().yellow(),
                tiers.join(", ")
            );
        }
        None => println!("{}", "No backups due".dimmed()),
    }

    print_ids("Deleted", &report.deleted);
    print_ids("Removed leftovers", &report.orphans_cleaned);
    for failure in &report.extraction_failures {
        println!("{} {}: {}", "Extraction failed".red(), failure.data_set, failure.error);
    }
    for failure in &report.deletion_failures {
        println!("{} {}: {}", "Delete failed".red(), failure.id, failure.error);
    }
    for warning in &report.warnings {
        println!("{} {}", "Warning:".yellow(), warning);
    }
    if let Some(url) = &report.presigned_url {
        println!("Retrieve: {}", url.cyan());
    }
    let size = report
        .stored_bytes
        .map(|b| format!(", {}", format_size(b)))
        .unwrap_or_default();
    println!(
        "Backups stored: {}{}  ({})",
        report.stored_count,
        size,
        util::format_absolute_time(report.started_at).dimmed()
    );
}

fn print_ids(label: &str, ids: &[SnapshotId]) {
    if ids.is_empty() {
        return;
    }
    let ids: Vec<&str> = ids.iter().map(SnapshotId::as_str).collect();
    println!("{}: {}", label, ids.join(", "));
}
