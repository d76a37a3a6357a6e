//! snapcycle CLI
//!
//! Command-line front end for the snapshot rotation engine.
//!
//! # Commands
//!
//! - `run` - Take this run's snapshots, purging old ones
//! - `status` - List tiers, snapshots and the last confirmed snapshot
//! - `version` - Show version information

mod commands;

use clap::{Args, Parser, Subcommand};
use commands::CliError;
use snapcycle_core::Settings;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Rotating hard-linked snapshots of a directory tree.
#[derive(Parser)]
#[command(name = "snapcycle")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take this run's snapshots, purging old ones
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Fail instead of waiting if another run holds the lock
        #[arg(long)]
        no_wait: bool,
    },

    /// List tiers, snapshots and the last confirmed snapshot
    Status {
        #[command(flatten)]
        target: TargetArgs,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

/// Where settings come from. Command-line values override the file.
#[derive(Args, Debug, Default)]
struct TargetArgs {
    /// JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory to snapshot
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Directory holding the tier folders
    #[arg(short, long)]
    destination: Option<PathBuf>,

    /// Retention count for a tier, as TIER=COUNT (repeatable)
    #[arg(short, long = "interval", value_parser = commands::parse_interval)]
    intervals: Vec<(String, u32)>,

    /// Flag passed verbatim to the sync tool (repeatable)
    #[arg(long = "sync-flag", allow_hyphen_values = true)]
    sync_flags: Vec<String>,

    /// Sync tool executable
    #[arg(long)]
    sync_program: Option<String>,

    /// Directory for lock files
    #[arg(long)]
    lock_dir: Option<PathBuf>,
}

impl TargetArgs {
    /// Merges the settings file, if any, with command-line values.
    fn into_settings(self) -> Result<Settings, CliError> {
        let mut settings = match &self.config {
            Some(path) => Settings::from_json_file(path)?,
            None => Settings::default(),
        };

        if self.source.is_some() {
            settings.source = self.source;
        }
        if self.destination.is_some() {
            settings.destination = self.destination;
        }
        if !self.intervals.is_empty() {
            settings = settings.with_intervals(self.intervals);
        }
        if !self.sync_flags.is_empty() {
            settings = settings.with_sync_flags(self.sync_flags);
        }
        if let Some(program) = self.sync_program {
            settings = settings.with_sync_program(program);
        }
        if let Some(dir) = self.lock_dir {
            settings = settings.with_lock_dir(dir);
        }
        Ok(settings)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match execute(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Run { target, no_wait } => {
            commands::run::run(target.into_settings()?, no_wait)?;
        }
        Commands::Status { target, format } => {
            commands::status::run(target.into_settings()?, &format)?;
        }
        Commands::Version => {
            println!("snapcycle CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("snapcycle core v{}", snapcycle_core::VERSION);
        }
    }

    Ok(())
}
