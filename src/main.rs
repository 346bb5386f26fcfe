use anyhow::Result;
use clap::{error::ErrorKind, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod confirm;
mod executor;
mod exit_codes;
mod extensions;
mod output;
mod preflight;
mod promote;
mod runner;
mod sql;
mod status;
mod timing;
mod tools;

use commands::RunOutcome;
use config::{ConfigFile, UpgradeArgs, UpgradeConfig, UpgradeMode, UsageError};
use confirm::{AssumeYes, Prompt};
use output::Output;
use runner::SystemRunner;

/// Version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "pgshift")]
#[command(version = VERSION)]
#[command(
    about = "In-place PostgreSQL major version upgrades",
    long_about = "Upgrades a PostgreSQL cluster to a new major version with pg_upgrade.\n\n\
                  If the old instance is a running standby it is promoted first; the listed \
                  extensions are dropped before the upgrade and recreated afterwards, the new \
                  instance is started and analyzed, and a timing summary is written to \
                  pg_upgrade_summary.log."
)]
#[command(subcommand_required = true, arg_required_else_help = true)]
struct Cli {
    /// Path to config file (default: ./pgshift.toml)
    #[arg(long = "config", global = true)]
    config_path: Option<PathBuf>,

    /// Minimal output (warnings and errors only)
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Show every external command before it runs
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the clusters are compatible (pg_upgrade --check); changes nothing
    Check(UpgradeArgs),
    /// Upgrade using copy-on-write file clones (pg_upgrade --clone)
    Clone(UpgradeArgs),
    /// Upgrade using hard links (pg_upgrade --link); the old cluster is unusable afterwards
    Link(UpgradeArgs),
    /// Upgrade by copying all data files (pg_upgrade --copy)
    Copy(UpgradeArgs),
}

impl Commands {
    fn into_parts(self) -> (UpgradeMode, UpgradeArgs) {
        match self {
            Commands::Check(args) => (UpgradeMode::Check, args),
            Commands::Clone(args) => (UpgradeMode::Clone, args),
            Commands::Link(args) => (UpgradeMode::Link, args),
            Commands::Copy(args) => (UpgradeMode::Copy, args),
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before parsing CLI so PGUSER is available)
    let _ = dotenvy::dotenv();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => {
                let _ = e.print();
                std::process::exit(exit_codes::USAGE_ERROR);
            }
        },
    };

    let output = Output::new(cli.quiet, cli.verbose);

    match run(cli, &output).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            if let Some(usage) = e.downcast_ref::<UsageError>() {
                output.error(&format!("Error: {}", usage));
                eprintln!("Run 'pgshift help' for usage.");
                std::process::exit(exit_codes::USAGE_ERROR);
            }
            output.error(&format!("Error: {e:#}"));
            std::process::exit(exit_codes::FAILURE);
        }
    }
}

async fn run(cli: Cli, output: &Output) -> Result<i32> {
    let (mode, args) = cli.command.into_parts();

    let file = ConfigFile::load(cli.config_path.as_deref())?;
    let config = UpgradeConfig::resolve(mode, &args, &file, std::env::var("PGUSER").ok())?;

    for warning in preflight::check(&config)? {
        output.warn(&format!("Warning: {}", warning));
    }

    let outcome = if args.yes {
        commands::upgrade(&config, &SystemRunner, &AssumeYes, output).await?
    } else {
        commands::upgrade(&config, &SystemRunner, &Prompt, output).await?
    };

    Ok(match outcome {
        RunOutcome::Cancelled => exit_codes::CANCELLED,
        RunOutcome::Completed { .. } => exit_codes::SUCCESS,
    })
}
