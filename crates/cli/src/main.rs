mod cmd;
mod output;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::output::OutputFormat;

/// keel - supervise servers from live-updated JSON documents
#[derive(Parser)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Parse and validate a server document
  Check {
    /// Path to the server document
    #[arg(env = "KEEL_CONFIG")]
    config: PathBuf,
  },

  /// Show what reloading one document on top of another would change
  Plan {
    /// Document currently applied
    from: PathBuf,

    /// Document to apply next
    to: PathBuf,

    #[arg(long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Run a supervised server on the simulated engine
  Run {
    /// Path to the server document
    #[arg(env = "KEEL_CONFIG")]
    config: PathBuf,

    /// How often to poll the document for changes
    #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
    interval: Duration,

    /// Apply the document, print the server state and stop
    #[arg(long)]
    once: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Check { config } => cmd::cmd_check(&config),
    Commands::Plan { from, to, output } => cmd::cmd_plan(&from, &to, output, cli.verbose),
    Commands::Run { config, interval, once } => cmd::cmd_run(&config, interval, once),
  }
}
