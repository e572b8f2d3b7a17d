//! ccb-vault configuration
//!
//! Stored at `~/.config/ccb-vault/config.toml` (Linux/macOS) or
//! `%APPDATA%\ccb-vault\config.toml` (Windows) unless `--config` names
//! another file. One file describes one site.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use vault_core::{ScalarSpec, ScheduleConfigError, TierSchedule, TierSpec};

/// Environment variable that overrides `[archive] password`
pub const PASSWORD_ENV: &str = "CCB_VAULT_ARCHIVE_PASSWORD";

/// Site configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Directory holding the archives, the index, the run lock and the message log
    pub backups_dir: PathBuf,

    /// Site name used in notifications (default: ccb_backup)
    pub site: String,

    /// Allowance for early scheduler kickoff, e.g. "15m" (default: 0s)
    pub slop: String,

    /// Lifetime of retrieval URLs in seconds (default: 604800 = 7 days)
    pub presign_ttl_secs: u64,

    /// Per-command extraction timeout in seconds (default: 1800)
    pub extract_timeout_secs: u64,

    pub archive: ArchiveConfig,

    /// Tier name -> keep count, or `{ keep, interval }`
    pub tiers: BTreeMap<String, TierSpec>,

    pub data_sets: Vec<DataSetConfig>,

    pub notify: NotifyConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let tiers = [("daily", 7), ("weekly", 4), ("monthly", 12)]
            .into_iter()
            .map(|(name, keep)| (name.to_string(), TierSpec::Keep(ScalarSpec::Int(keep))))
            .collect();
        Self {
            backups_dir: PathBuf::from("/var/backups/ccb"),
            site: "ccb_backup".to_string(),
            slop: "0s".to_string(),
            presign_ttl_secs: 604_800,
            extract_timeout_secs: 1_800,
            archive: ArchiveConfig::default(),
            tiers,
            data_sets: Vec::new(),
            notify: NotifyConfig::default(),
        }
    }
}

/// Archive settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Zip password; `CCB_VAULT_ARCHIVE_PASSWORD` takes precedence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// One extracted data set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSetConfig {
    pub name: String,

    /// Program and arguments; `--output-filename <file>` is appended
    pub command: Vec<String>,

    /// Extra environment for the command
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Notification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// No recipients means notifications are only logged
    pub recipients: Vec<String>,

    /// Mail command reading an RFC 5322 message on stdin
    pub command: Vec<String>,

    pub from: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            command: vec!["/usr/sbin/sendmail".to_string(), "-t".to_string()],
            from: "ccb-vault@localhost".to_string(),
        }
    }
}

/// Configuration problems outside the tier schedule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("site must not be empty")]
    EmptySite,

    #[error("{0} must be a positive number of seconds")]
    ZeroSeconds(&'static str),

    #[error("no data sets configured")]
    NoDataSets,

    #[error("data set '{name}': {reason}")]
    DataSet { name: String, reason: String },

    #[error("data set '{0}' is configured more than once")]
    DuplicateDataSet(String),

    #[error("no archive password (set [archive] password or CCB_VAULT_ARCHIVE_PASSWORD)")]
    MissingPassword,
}

impl SystemConfig {
    /// Check everything except the tier schedule
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.site.trim().is_empty() {
            return Err(ConfigError::EmptySite);
        }
        if self.presign_ttl_secs == 0 {
            return Err(ConfigError::ZeroSeconds("presign_ttl_secs"));
        }
        if self.extract_timeout_secs == 0 {
            return Err(ConfigError::ZeroSeconds("extract_timeout_secs"));
        }
        if self.data_sets.is_empty() {
            return Err(ConfigError::NoDataSets);
        }

        let mut seen = BTreeSet::new();
        for ds in &self.data_sets {
            if ds.name.is_empty() || ds.name.contains(['/', '\\']) {
                return Err(ConfigError::DataSet {
                    name: ds.name.clone(),
                    reason: "name must be non-empty and contain no path separators".to_string(),
                });
            }
            if ds.command.is_empty() {
                return Err(ConfigError::DataSet {
                    name: ds.name.clone(),
                    reason: "command is empty".to_string(),
                });
            }
            if !seen.insert(ds.name.as_str()) {
                return Err(ConfigError::DuplicateDataSet(ds.name.clone()));
            }
        }
        Ok(())
    }

    /// Parsed tier schedule
    pub fn schedule(&self) -> Result<TierSchedule, ScheduleConfigError> {
        TierSchedule::from_specs(self.tiers.iter(), &self.slop)
    }

    /// Archive password from the environment or the config file
    pub fn archive_password(&self) -> Result<String, ConfigError> {
        self.archive_password_with(std::env::var(PASSWORD_ENV).ok())
    }

    fn archive_password_with(&self, from_env: Option<String>) -> Result<String, ConfigError> {
        from_env
            .or_else(|| self.archive.password.clone())
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::MissingPassword)
    }

    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.presign_ttl_secs)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn data_set_names(&self) -> Vec<String> {
        self.data_sets.iter().map(|ds| ds.name.clone()).collect()
    }

    /// Default settings plus the data sets the original scripts exported
    pub fn example() -> Self {
        let data_sets = [
            "individuals",
            "groups",
            "attendance",
            "pledges",
            "contributions",
            "transactions",
        ]
        .iter()
        .map(|name| DataSetConfig {
            name: name.to_string(),
            command: vec![format!("/opt/ccb/get_{}.py", name)],
            env: BTreeMap::new(),
        })
        .collect();

        Self {
            archive: ArchiveConfig {
                password: Some("change-me".to_string()),
            },
            data_sets,
            notify: NotifyConfig {
                recipients: vec!["admin@example.org".to_string()],
                from: "backups@example.org".to_string(),
                ..NotifyConfig::default()
            },
            ..Self::default()
        }
    }
}

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        dirs::home_dir().map(|h| h.join(".config/ccb-vault"))
    }

    #[cfg(not(target_os = "macos"))]
    {
        dirs::config_dir().map(|c| c.join("ccb-vault"))
    }
}

/// Get the default config file path
pub fn config_file_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Config file for this invocation
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => config_file_path().context("Could not determine config directory; pass --config"),
    }
}

/// Load configuration from `explicit` or the default location
///
/// Unlike most settings files a missing config is an error: a backup run
/// cannot proceed without data sets and a password.
pub fn load(explicit: Option<&Path>) -> Result<SystemConfig> {
    let config_path = resolve_path(explicit)?;
    if !config_path.exists() {
        anyhow::bail!(
            "No configuration at {} (create one with 'ccb-vault config init')",
            config_path.display()
        );
    }

    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config at {}", config_path.display()))?;
    let config: SystemConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config at {}", config_path.display()))?;

    tracing::debug!("Loaded config from {}", config_path.display());
    Ok(config)
}

/// Write the example configuration if no file exists yet
///
/// Returns whether a file was written.
pub fn init_if_missing(explicit: Option<&Path>) -> Result<bool> {
    let config_path = resolve_path(explicit)?;
    if config_path.exists() {
        return Ok(false);
    }
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory at {}", parent.display()))?;
    }
    fs::write(&config_path, example_config())
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    tracing::info!("Wrote example config to {}", config_path.display());
    Ok(true)
}

/// Generate example config content for display
pub fn example_config() -> String {
    let config = SystemConfig::example();
    let mut content = String::from("# ccb-vault configuration\n");
    content.push_str("#\n");
    content.push_str("# Tiers: hourly, daily, weekly, monthly, yearly.\n");
    content.push_str("#   daily = 7                                # keep 7, default interval (23h)\n");
    content.push_str("#   weekly = { keep = 4, interval = \"6d12h\" } # keep 4, explicit interval\n");
    content.push_str("#   keep = 0 keeps every snapshot of that tier.\n");
    content.push_str("# The archive password may be supplied via CCB_VAULT_ARCHIVE_PASSWORD instead.\n\n");

    content.push_str(&toml::to_string_pretty(&config).unwrap_or_default());
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vault_core::TierName;

    #[test]
    fn test_default_config() {
        let config = SystemConfig::default();

        assert_eq!(config.site, "ccb_backup");
        assert_eq!(config.presign_ttl_secs, 604_800);
        assert_eq!(config.extract_timeout_secs, 1_800);
        assert_eq!(config.notify.command, vec!["/usr/sbin/sendmail", "-t"]);

        let schedule = config.schedule().unwrap();
        assert_eq!(schedule.get(TierName::Daily).unwrap().keep_count, 7);
        assert!(schedule.get(TierName::Hourly).is_none());
    }

    #[test]
    fn test_example_round_trips_and_validates() {
        let parsed: SystemConfig = toml::from_str(&example_config()).unwrap();

        parsed.validate().unwrap();
        assert_eq!(parsed.data_sets.len(), 6);
        assert_eq!(parsed.data_sets[0].command, vec!["/opt/ccb/get_individuals.py"]);
        assert_eq!(parsed.schedule().unwrap(), SystemConfig::example().schedule().unwrap());
    }

    #[test]
    fn test_parse_mixed_tier_forms() {
        let config: SystemConfig = toml::from_str(
            r#"
            backups_dir = "/srv/backups"
            slop = "15m"

            [tiers]
            hourly = 24
            weekly = { keep = 4, interval = "6d12h" }
            yearly = { keep = "0" }

            [[data_sets]]
            name = "pledges"
            command = ["/opt/ccb/get_pledges.py", "--verbose"]
            env = { CCB_SITE = "example" }
            "#,
        )
        .unwrap();

        let schedule = config.schedule().unwrap();
        assert_eq!(schedule.slop(), chrono::Duration::minutes(15));
        assert_eq!(schedule.get(TierName::Hourly).unwrap().keep_count, 24);
        assert_eq!(
            schedule.get(TierName::Weekly).unwrap().min_interval,
            chrono::Duration::days(6) + chrono::Duration::hours(12)
        );
        assert_eq!(schedule.get(TierName::Yearly).unwrap().keep_count, 0);
        assert_eq!(config.data_sets[0].env["CCB_SITE"], "example");
        // Unset sections keep their defaults
        assert_eq!(config.site, "ccb_backup");
    }

    #[test]
    fn test_bad_tier_is_schedule_error() {
        let config: SystemConfig = toml::from_str("[tiers]\nfortnightly = 2\n").unwrap();
        assert!(matches!(
            config.schedule(),
            Err(ScheduleConfigError::UnknownTier(_))
        ));

        let config: SystemConfig = toml::from_str("[tiers]\ndaily = -1\n").unwrap();
        assert!(matches!(
            config.schedule(),
            Err(ScheduleConfigError::NegativeKeep { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empty_commands() {
        let mut config = SystemConfig::example();
        config.data_sets.push(config.data_sets[0].clone());
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateDataSet("individuals".to_string()))
        );

        let mut config = SystemConfig::example();
        config.data_sets[1].command.clear();
        assert!(matches!(config.validate(), Err(ConfigError::DataSet { .. })));

        let mut config = SystemConfig::example();
        config.presign_ttl_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroSeconds("presign_ttl_secs"))
        );
    }

    #[test]
    fn test_password_precedence() {
        let mut config = SystemConfig::example();
        assert_eq!(config.archive_password_with(None).unwrap(), "change-me");
        assert_eq!(
            config.archive_password_with(Some("from-env".into())).unwrap(),
            "from-env"
        );

        config.archive.password = Some(String::new());
        assert_eq!(
            config.archive_password_with(None),
            Err(ConfigError::MissingPassword)
        );
    }

    #[test]
    fn test_load_and_init() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/config.toml");

        assert!(load(Some(&path)).is_err());
        assert!(init_if_missing(Some(&path)).unwrap());
        assert!(!init_if_missing(Some(&path)).unwrap());

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.notify.recipients, vec!["admin@example.org"]);
    }
}
