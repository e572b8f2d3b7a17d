//! Logging setup
//!
//! Human-readable output goes to stderr, filtered by `--log-level` or
//! `RUST_LOG`. Everything at debug and above is also written to a daily
//! `<backups_dir>/messages.<date>.log`; only the newest `MAX_LOG_FILES` are kept.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Message log file prefix inside the backups directory
pub const MESSAGE_LOG_PREFIX: &str = "messages";

/// Rotated message logs retained
pub const MAX_LOG_FILES: usize = 7;

/// Keeps the file writer alive; logs are flushed when dropped
pub struct LogGuard {
    _guard: Option<WorkerGuard>,
}

/// Install the global subscriber
///
/// `level` wins over `RUST_LOG`; with neither, stderr shows `info`.
pub fn init(level: Option<&str>, log_dir: Option<&Path>) -> Result<LogGuard> {
    let stderr_filter = match level {
        Some(level) => EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{}'", level))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_filter);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(message_log(dir)?);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_filter(LevelFilter::DEBUG);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Logging already initialized")?;

    Ok(LogGuard { _guard: guard })
}

/// Daily-rotated message log in `dir`
pub fn message_log(dir: &Path) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(MESSAGE_LOG_PREFIX)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
        .with_context(|| format!("Failed to open message log in {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_message_log_is_dated() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("backups");

        let mut appender = message_log(&dir).unwrap();
        appender.write_all(b"Backup 20240301020000 deleted\n").unwrap();
        appender.flush().unwrap();
        drop(appender);

        let logs: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].starts_with("messages."));
        assert!(logs[0].ends_with(".log"));
        let text = std::fs::read_to_string(dir.join(&logs[0])).unwrap();
        assert!(text.contains("20240301020000 deleted"));
    }
}
