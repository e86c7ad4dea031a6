//! fbackup: tiered backup rotation for the Fragalysis database
//!
//! Run by a scheduler once per tier:
//!
//! ```text
//! BACKUP_TYPE=hourly  fbackup run     # every hour
//! BACKUP_TYPE=daily   fbackup run     # once a day
//! FROM_BACKUP=LATEST  fbackup recover # pick the artifact to restore
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use fragalysis_backup_core::config::BackupConfig;
use fragalysis_backup_core::error::{EXIT_CONFIG, format_error_with_remediation};
use fragalysis_backup_core::logging::{LogFormat, LogOutput, init_logging};
use fragalysis_backup_core::recovery::{BackupCatalog, RecoverySelector, Selection};
use fragalysis_backup_core::runner::BackupRunner;
use fragalysis_backup_core::{Error, VERSION};

/// Tiered backup rotation and recovery
#[derive(Parser, Debug)]
#[command(name = "fbackup")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct GlobalOptions {
    /// Backup root directory (overrides BACKUP_ROOT_DIR)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// TOML config file
    #[arg(long, env = "FBACKUP_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FBACKUP_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Log format (pretty or json)
    #[arg(long, env = "FBACKUP_LOG_FORMAT", global = true)]
    log_format: Option<String>,

    /// Print the command result as JSON on stdout (logs move to stderr)
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the configured tier once: produce or promote, then prune
    Run {
        /// Exit non-zero when the dump fails or produces nothing
        #[arg(long)]
        strict: bool,
    },

    /// List the backups on the volume and select one to recover from
    Recover {
        /// LATEST, NONE, or part of an artifact name such as 2018-06-25T21:05:07Z
        #[arg(long, env = "FROM_BACKUP")]
        from: Option<String>,
    },

    /// List artifacts per tier, newest first
    List {
        /// Only this tier directory
        #[arg(long)]
        tier: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            let code = match err.downcast_ref::<Error>() {
                Some(core) => {
                    eprintln!("{}", format_error_with_remediation(core));
                    core.exit_code()
                }
                None => {
                    eprintln!("Error: {err:#}");
                    EXIT_CONFIG
                }
            };
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    let config = load_config(&cli.global)?;
    init_logging(&config.log).context("failed to initialise logging")?;
    info!("fbackup {VERSION}");

    match cli.command {
        Commands::Run { strict } => run_tier(&config, strict, cli.global.json),
        Commands::Recover { from } => {
            let selector = from.as_deref().map_or_else(
                || config.recovery_selector(),
                RecoverySelector::parse,
            );
            recover(&config, &selector, cli.global.json)
        }
        Commands::List { tier } => list(&config, tier.as_deref(), cli.global.json),
    }
}

/// Defaults, then the config file, then the environment, then flags.
fn load_config(global: &GlobalOptions) -> Result<BackupConfig> {
    let mut config = BackupConfig::load(global.config.as_deref())?;
    if let Some(root) = &global.root {
        config.root_dir = root.display().to_string();
    }
    if let Some(level) = &global.log_level {
        config.log.level.clone_from(level);
    }
    if let Some(format) = &global.log_format {
        config.log.format = format
            .parse::<LogFormat>()
            .map_err(anyhow::Error::msg)?;
    }
    if global.json {
        config.log.output = LogOutput::Stderr;
    }
    Ok(config)
}

fn run_tier(config: &BackupConfig, strict: bool, json: bool) -> Result<u8> {
    let runner = BackupRunner::new(config, config.dump_producer())?;
    for line in config.describe() {
        info!("# {line}");
    }

    let report = runner.run(Utc::now())?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(report.outcome.exit_code(strict))
}

#[derive(Serialize)]
struct RecoverOutput<'a> {
    selector: String,
    selected: Option<&'a std::path::Path>,
    distinct_matches: usize,
}

fn recover(config: &BackupConfig, selector: &RecoverySelector, json: bool) -> Result<u8> {
    let root = config.root_path();
    info!(from_backup = ?selector, root = %root.display(), "Recovery requested");

    let catalog = BackupCatalog::scan(&root, &config.naming)?;
    catalog.log_known();

    let selection = catalog.select(selector);
    let (selected, distinct_matches) = match &selection {
        Selection::ListOnly => {
            info!("Backup from is NONE. Nothing to do");
            (None, 0)
        }
        Selection::NotFound => {
            match selector {
                RecoverySelector::Latest => {
                    info!("Asked to recover LATEST but there are no backups. Sorry.");
                }
                _ => info!("Could not find the backup. Leaving."),
            }
            (None, 0)
        }
        Selection::Found {
            entry,
            distinct_matches,
        } => {
            if *distinct_matches > 1 {
                warn!(
                    distinct_matches,
                    "Several backups match. Using the oldest match"
                );
            }
            info!(tier = %entry.tier, "Recovering from {}", entry.path.display());
            (Some(entry.path.as_path()), *distinct_matches)
        }
    };

    if json {
        let output = RecoverOutput {
            selector: format!("{selector:?}"),
            selected,
            distinct_matches,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if let Some(path) = selected {
        println!("{}", path.display());
    }
    Ok(0)
}

fn list(config: &BackupConfig, tier: Option<&str>, json: bool) -> Result<u8> {
    let catalog = BackupCatalog::scan(&config.root_path(), &config.naming)?;

    let mut tiers: Vec<&str> = Vec::new();
    for entry in catalog.entries() {
        if !tiers.contains(&entry.tier.as_str()) {
            tiers.push(&entry.tier);
        }
    }
    if let Some(only) = tier {
        tiers.retain(|t| *t == only);
    }

    if json {
        let entries: Vec<_> = tiers.iter().flat_map(|t| catalog.in_tier(t)).collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(0);
    }

    for t in tiers {
        let entries = catalog.in_tier(t);
        println!("{t} ({})", entries.len());
        for entry in entries {
            println!("    {}", entry.file_name);
        }
    }
    Ok(0)
}
