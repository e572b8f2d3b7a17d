//! Data-set extraction through external commands

use crate::system_config::DataSetConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use vault_core::TIMESTAMP_FORMAT;
use vault_journal::Extractor;

/// Runs `command... --output-filename <dest>/<name>_<stamp>.csv` per data set
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    data_sets: BTreeMap<String, DataSetConfig>,
    timeout: Duration,
    stamp: String,
}

impl CommandExtractor {
    pub fn new(data_sets: &[DataSetConfig], timeout: Duration, started_at: DateTime<Utc>) -> Self {
        Self {
            data_sets: data_sets
                .iter()
                .map(|ds| (ds.name.clone(), ds.clone()))
                .collect(),
            timeout,
            stamp: started_at.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    /// File the extractor for `data_set` is asked to write
    pub fn output_file(&self, data_set: &str, destination: &Path) -> std::path::PathBuf {
        destination.join(format!("{}_{}.csv", data_set, self.stamp))
    }
}

#[async_trait]
impl Extractor for CommandExtractor {
    async fn extract(&self, data_set: &str, destination: &Path) -> Result<()> {
        let config = self
            .data_sets
            .get(data_set)
            .with_context(|| format!("No command configured for data set '{}'", data_set))?;
        let (program, args) = config
            .command
            .split_first()
            .with_context(|| format!("Empty command for data set '{}'", data_set))?;
        let output_file = self.output_file(data_set, destination);

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("--output-filename")
            .arg(&output_file)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!("Running {:?} for {}", config.command, data_set);
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.with_context(|| format!("Failed to run {}", program))?,
            Err(_) => bail!(
                "{} timed out after {}s",
                program,
                self.timeout.as_secs()
            ),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} exited with {}: {}", program, output.status, stderr.trim());
        }
        if !output_file.is_file() {
            bail!(
                "{} succeeded but did not write {}",
                program,
                output_file.display()
            );
        }
        Ok(())
    }
}
