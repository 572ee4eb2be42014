//! govingest CLI: runs source contracts and persists their raw-layer artifacts.
//!
//! Scheduling and retries live outside this binary; each invocation runs the
//! named contracts once.

mod commands;
mod runner;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// govingest: extract and validate government data feeds
#[derive(Parser, Debug)]
#[command(name = "govingest", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Extract sources and write raw-layer artifacts
    Run {
        /// Contract names or paths (every contract in the contracts directory if omitted)
        contracts: Vec<String>,

        /// Extract every non-empty sheet of spreadsheet sources
        #[arg(long)]
        all_sheets: bool,

        /// Persist results even when the content hash is unchanged
        #[arg(long)]
        force: bool,

        /// Number of sources extracted concurrently
        #[arg(short, long, default_value_t = 4)]
        jobs: usize,
    },
    /// Load and validate contracts without fetching anything
    Check {
        /// Contract names or paths (every contract if omitted)
        contracts: Vec<String>,
    },
    /// List the contracts in the contracts directory
    List,
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = govingest_core::config::log_dir();
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "govingest.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref()).await
}
