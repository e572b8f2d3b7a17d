//! ccb-vault - tiered backups for a church-management site

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli_lib::{cmd, logging, system_config, util};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::process::ExitCode;

/// ccb-vault - Tiered, self-pruning backups of church-management data
#[derive(Parser)]
#[command(name = "ccb-vault")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/ccb-vault/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Stderr log filter, e.g. "debug" (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a backup for every due tier and prune aged-out backups
    Run {
        /// Log the notification instead of mailing it
        #[arg(long)]
        no_email: bool,
    },
    /// Show tiers, retained backups and next due times
    Status,
    /// Check that the index and the stored archives agree
    Verify,
    /// Print a time-limited retrieval URL for a backup
    Presign {
        /// Backup id (YYYYmmddHHMMSS, optionally with .zip)
        snapshot: String,
        /// URL lifetime in seconds (default: presign_ttl_secs from config)
        #[arg(long)]
        expire_time_in_secs: Option<String>,
    },
    /// Inspect or create the configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the config file location
    Path,
    /// Print an example configuration
    Example,
    /// Write the example configuration if none exists
    Init,
    /// Validate the configuration
    Check,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(util::exit_code(&e) as u8)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    let log_level = cli.log_level.as_deref();

    // These work without a loadable config
    match &cli.command {
        Commands::Config(ConfigCommands::Path) => {
            let _guard = logging::init(log_level, None)?;
            return cmd::config::run_path(config_path).await;
        }
        Commands::Config(ConfigCommands::Example) => {
            let _guard = logging::init(log_level, None)?;
            return cmd::config::run_example().await;
        }
        Commands::Config(ConfigCommands::Init) => {
            let _guard = logging::init(log_level, None)?;
            return cmd::config::run_init(config_path).await;
        }
        _ => {}
    }

    let config = system_config::load(config_path)?;
    let log_dir = match cli.command {
        Commands::Run { .. } => Some(config.backups_dir.as_path()),
        _ => None,
    };
    let _guard = logging::init(log_level, log_dir)?;

    match cli.command {
        Commands::Run { no_email } => cmd::run::run(&config, no_email).await,
        Commands::Status => cmd::status::run(&config).await,
        Commands::Verify => cmd::verify::run(&config).await,
        Commands::Presign {
            snapshot,
            expire_time_in_secs,
        } => cmd::presign::run(&config, &snapshot, expire_time_in_secs.as_deref()).await,
        Commands::Config(_) => cmd::config::run_check(&config).await,
    }
}
