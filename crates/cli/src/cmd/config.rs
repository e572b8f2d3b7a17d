//! Configuration commands

use crate::system_config::{self, SystemConfig};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;
use vault_core::{format_interval, VaultError};

/// Print the config file this invocation would use
pub async fn run_path(explicit: Option<&Path>) -> Result<()> {
    let path = system_config::resolve_path(explicit)?;
    println!("{}", path.display());
    Ok(())
}

/// Print an example configuration
pub async fn run_example() -> Result<()> {
    print!("{}", system_config::example_config());
    Ok(())
}

/// Write the example configuration unless one exists
pub async fn run_init(explicit: Option<&Path>) -> Result<()> {
    let path = system_config::resolve_path(explicit)?;
    if system_config::init_if_missing(explicit)? {
        println!("{} {}", "Wrote".green(), path.display());
        println!("{}", "Edit data sets, password and recipients before the first run".dimmed());
    } else {
        println!("{} already exists", path.display());
    }
    Ok(())
}

/// Validate the configuration and show the resulting schedule
pub async fn run_check(config: &SystemConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let schedule = config.schedule().map_err(VaultError::from)?;
    config.archive_password()?;

    println!("{}", "Configuration OK".green().bold());
    println!("{}: {}", "Site".dimmed(), config.site);
    println!("{}: {}", "Backups dir".dimmed(), config.backups_dir.display());

    println!("\n{}", "[tiers]".yellow());
    for tier in schedule.tiers() {
        println!(
            "  {} keep={} interval={} (due after {})",
            tier.name.as_str().cyan(),
            tier.keep_count,
            format_interval(tier.min_interval),
            format_interval(schedule.effective_interval(tier))
        );
    }

    println!("\n{}", "[data_sets]".yellow());
    for ds in &config.data_sets {
        println!("  {} = {}", ds.name.cyan(), ds.command.join(" "));
    }

    println!("\n{}", "[notify]".yellow());
    if config.notify.recipients.is_empty() {
        println!("  {}", "no recipients; notifications are only logged".dimmed());
    } else {
        println!("  {}", config.notify.recipients.join(", "));
    }
    Ok(())
}
