//! deltamirror CLI - Operator commands for deltamirror
//!
//! Provides commands for:
//! - Inspecting the sync record of a collection
//! - Cancelling a running sync from another process
//! - Watching a run until it settles
//! - Recovering runs left behind by a crashed host
//! - Viewing and validating configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use deltamirror_core::config::{Config, LoggingConfig};

mod commands;
mod output;

use commands::{
    cancel::CancelCommand, config::ConfigCommand, recover::RecoverCommand,
    status::StatusCommand, watch::WatchCommand,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "deltamirror",
    version,
    about = "Incremental remote-to-collection sync"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the sync record of a collection
    Status(StatusCommand),
    /// Request cancellation of a running sync
    Cancel(CancelCommand),
    /// Follow a running sync until it finishes
    Watch(WatchCommand),
    /// Fail sync runs interrupted by a crash
    Recover(RecoverCommand),
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);

    init_tracing(&config.logging, cli.verbose, cli.json);

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    match cli.command {
        Commands::Status(cmd) => cmd.execute(&config, format).await,
        Commands::Cancel(cmd) => cmd.execute(&config, format).await,
        Commands::Watch(cmd) => cmd.execute(&config, format).await,
        Commands::Recover(cmd) => cmd.execute(&config, format).await,
        Commands::Config(cmd) => cmd.execute(&config_path, format).await,
    }
}

/// `RUST_LOG` wins, then `-v`, then `logging.level`. Logs go to stderr so
/// `--json` output on stdout stays parseable.
fn init_tracing(logging: &LoggingConfig, verbose: u8, json: bool) {
    let level = match verbose {
        0 => logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json || json {
        builder.json().init();
    } else {
        builder.init();
    }
}
