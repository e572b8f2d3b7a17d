//! Run reports and the end-of-run notification

use crate::collab::Notifier;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt::{self, Write as _};
use tracing::{info, warn};
use vault_core::{SnapshotId, TierName};

/// A data set that could not be extracted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionFailure {
    pub data_set: String,
    pub error: String,
}

/// A planned deletion that did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionFailure {
    pub id: SnapshotId,
    pub error: String,
}

/// What one run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub site: String,
    pub started_at: DateTime<Utc>,
    /// Snapshot created by this run
    pub snapshot: Option<SnapshotId>,
    pub due_tiers: BTreeSet<TierName>,
    pub extraction_failures: Vec<ExtractionFailure>,
    pub deleted: Vec<SnapshotId>,
    pub deletion_failures: Vec<DeletionFailure>,
    /// Unreferenced snapshots from earlier runs removed during pre-run reconciliation
    pub orphans_cleaned: Vec<SnapshotId>,
    pub presigned_url: Option<String>,
    /// Non-fatal problems (post-run drift, presign failures)
    pub warnings: Vec<String>,
    /// Snapshots stored after the run
    pub stored_count: usize,
    /// Bytes used by the store after the run, if known
    pub stored_bytes: Option<u64>,
}

impl RunReport {
    pub fn new(site: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            site: site.to_string(),
            started_at,
            snapshot: None,
            due_tiers: BTreeSet::new(),
            extraction_failures: Vec::new(),
            deleted: Vec::new(),
            deletion_failures: Vec::new(),
            orphans_cleaned: Vec::new(),
            presigned_url: None,
            warnings: Vec::new(),
            stored_count: 0,
            stored_bytes: None,
        }
    }

    /// No tier was due
    pub fn is_noop(&self) -> bool {
        self.snapshot.is_none()
    }

    pub fn has_errors(&self) -> bool {
        !self.extraction_failures.is_empty()
            || !self.deletion_failures.is_empty()
            || !self.warnings.is_empty()
    }

    pub fn subject(&self) -> String {
        if self.has_errors() {
            format!("{} backup completed with errors", self.site)
        } else {
            format!("{} backup completed without errors", self.site)
        }
    }

    pub fn body(&self) -> String {
        let mut body = String::new();
        let started = self.started_at.format("%Y-%m-%d %H:%M:%S UTC");

        match &self.snapshot {
            Some(id) => {
                let tiers: Vec<&str> = self.due_tiers.iter().map(TierName::as_str).collect();
                let _ = writeln!(
                    body,
                    "Completed backup {} for site {} ({}) on tiers: {}",
                    id,
                    self.site,
                    started,
                    tiers.join(", ")
                );
            }
            None => {
                let _ = writeln!(body, "No backups were due for site {} ({})", self.site, started);
            }
        }

        if let Some(url) = &self.presigned_url {
            let _ = writeln!(body, "\nRetrieve the archive at:\n  {}", url);
        }

        if !self.deleted.is_empty() {
            let ids: Vec<&str> = self.deleted.iter().map(SnapshotId::as_str).collect();
            let _ = writeln!(body, "\nDeleted aged-out backups: {}", ids.join(", "));
        }
        if !self.orphans_cleaned.is_empty() {
            let ids: Vec<&str> = self.orphans_cleaned.iter().map(SnapshotId::as_str).collect();
            let _ = writeln!(body, "Removed leftovers from earlier runs: {}", ids.join(", "));
        }
        match self.stored_bytes {
            Some(bytes) => {
                let _ = writeln!(
                    body,
                    "Backups now stored: {} ({})",
                    self.stored_count,
                    format_size(bytes)
                );
            }
            None => {
                let _ = writeln!(body, "Backups now stored: {}", self.stored_count);
            }
        }

        if !self.extraction_failures.is_empty() {
            let _ = writeln!(body, "\nERROR: data sets that failed to extract:");
            for f in &self.extraction_failures {
                let _ = writeln!(body, "  {}: {}", f.data_set, f.error);
            }
        }
        if !self.deletion_failures.is_empty() {
            let _ = writeln!(body, "\nERROR: backups that could not be deleted (retried next run):");
            for f in &self.deletion_failures {
                let _ = writeln!(body, "  {}: {}", f.id, f.error);
            }
        }
        if !self.warnings.is_empty() {
            let _ = writeln!(body, "\nWarnings:");
            for w in &self.warnings {
                let _ = writeln!(body, "  {}", w);
            }
        }
        body
    }
}

/// Human-readable byte count, binary units
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Send the end-of-run summary, at most once per run
///
/// A run where nothing was due sends nothing. Returns whether a message
/// was sent.
pub async fn notify_outcome<E: fmt::Display>(
    notifier: &dyn Notifier,
    recipients: &[String],
    site: &str,
    outcome: &Result<RunReport, E>,
) -> anyhow::Result<bool> {
    let (subject, body) = match outcome {
        Ok(report) if report.is_noop() && !report.has_errors() && report.orphans_cleaned.is_empty() => {
            return Ok(false)
        }
        Ok(report) => (report.subject(), report.body()),
        Err(e) => (
            format!("{} backup failed", site),
            format!("ERROR: backup run for site {} failed:\n  {:#}\n", site, e),
        ),
    };

    if recipients.is_empty() {
        warn!("No notification recipients configured; not sending '{}'", subject);
        return Ok(false);
    }

    notifier.send(recipients, &subject, &body).await?;
    info!("Sent notification '{}' to {}", subject, recipients.join(", "));
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use vault_core::VaultError;

    #[derive(Default)]
    struct Outbox(Mutex<Vec<(Vec<String>, String, String)>>);

    #[async_trait]
    impl Notifier for Outbox {
        async fn send(&self, recipients: &[String], subject: &str, body: &str) -> anyhow::Result<()> {
            self.0
                .lock()
                .unwrap()
                .push((recipients.to_vec(), subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    fn report() -> RunReport {
        RunReport::new("ccb_backup", Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap())
    }

    #[test]
    fn test_body_lists_failures() {
        let mut r = report();
        r.snapshot = Some(SnapshotId::parse("20240501030000").unwrap());
        r.due_tiers = BTreeSet::from([TierName::Daily, TierName::Weekly]);
        r.extraction_failures.push(ExtractionFailure {
            data_set: "pledges".into(),
            error: "exit status 1".into(),
        });
        r.presigned_url = Some("file:///backups/20240501030000.zip".into());

        let body = r.body();
        assert!(body.contains("Completed backup 20240501030000"));
        assert!(body.contains("daily, weekly"));
        assert!(body.contains("pledges: exit status 1"));
        assert!(body.contains("file:///backups/20240501030000.zip"));
        assert_eq!(r.subject(), "ccb_backup backup completed with errors");
    }

    #[test]
    fn test_body_reports_storage_size() {
        let mut r = report();
        r.stored_count = 3;
        assert!(r.body().contains("Backups now stored: 3\n"));

        r.stored_bytes = Some(5 * 1024 * 1024 + 512 * 1024);
        assert!(r.body().contains("Backups now stored: 3 (5.5 MiB)"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    #[tokio::test]
    async fn test_noop_run_sends_nothing() {
        let outbox = Outbox::default();
        let recipients = vec!["admin@example.org".to_string()];
        let sent = notify_outcome(&outbox, &recipients, "ccb_backup", &Ok::<_, VaultError>(report()))
            .await
            .unwrap();
        assert!(!sent);
        assert!(outbox.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_notified() {
        let outbox = Outbox::default();
        let recipients = vec!["admin@example.org".to_string()];
        let outcome: Result<RunReport, VaultError> = Err(VaultError::LockContention("pid 42".into()));

        assert!(notify_outcome(&outbox, &recipients, "ccb_backup", &outcome)
            .await
            .unwrap());
        let sent = outbox.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "ccb_backup backup failed");
        assert!(sent[0].2.contains("pid 42"));
    }
}
