//! Show tiers, retained snapshots and when each tier is next due

use crate::system_config::SystemConfig;
use crate::util;
use anyhow::Result;
use chrono::Utc;
use owo_colors::OwoColorize;
use vault_core::{format_interval, VaultError};
use vault_journal::{due_tiers, next_due_at, IndexFile};

pub async fn run(config: &SystemConfig) -> Result<()> {
    let schedule = config.schedule().map_err(VaultError::from)?;
    let index = IndexFile::open(&config.backups_dir).load()?;
    let now = Utc::now();
    let due = due_tiers(&index, &schedule, now);

    println!("{}", "Backup Status".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("Site:          {}", config.site.cyan());
    println!("Backups dir:   {}", config.backups_dir.display());
    println!("Slop:          {}", format_interval(schedule.slop()));
    println!();

    for tier in schedule.tiers() {
        let ids = index.tier(tier.name.as_str());
        let keep = if tier.keep_count == 0 {
            "unlimited".to_string()
        } else {
            tier.keep_count.to_string()
        };
        println!(
            "{:<8} every {:<8} keeping {:<9} holds {}",
            tier.name.as_str().yellow(),
            format_interval(tier.min_interval),
            keep,
            ids.len()
        );

        match ids.last() {
            Some(last) => println!(
                "  Latest:      {} ({})",
                last,
                util::format_relative_time(last.created_at(), now).dimmed()
            ),
            None => println!("  Latest:      {}", "none yet".dimmed()),
        }
        if due.contains(&tier.name) {
            println!("  Next:        {}", "due now".green());
        } else if let Some(next) = next_due_at(&index, &schedule, tier) {
            println!(
                "  Next:        {} ({})",
                util::format_absolute_time(next),
                util::format_relative_time(next, now).dimmed()
            );
        }
    }

    let unscheduled: Vec<&String> = index
        .tiers
        .keys()
        .filter(|name| schedule.get_by_key(name).is_none())
        .collect();
    if !unscheduled.is_empty() {
        println!();
        for name in unscheduled {
            println!(
                "{} tier '{}' is no longer scheduled; its {} snapshots are kept",
                "Note:".yellow(),
                name,
                index.tier(name).len()
            );
        }
    }

    println!();
    println!("Snapshots:     {}", index.referenced().len());
    let intents = index.intents();
    if !intents.is_empty() {
        let ids: Vec<&str> = intents.iter().map(|id| id.as_str()).collect();
        println!(
            "Pending:       {} {}",
            ids.join(", "),
            "(removed on the next run)".dimmed()
        );
    }

    Ok(())
}
