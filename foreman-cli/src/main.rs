//! Foreman CLI
//!
//! Command-line interface for driving jobs on a Foreman orchestrator.

mod commands;
mod config;
mod id_resolver;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "foreman")]
#[command(about = "Foreman job orchestrator CLI", long_about = None)]
struct Cli {
    /// Orchestrator URL
    #[arg(
        long,
        env = "FOREMAN_ORCHESTRATOR_URL",
        default_value = "http://localhost:8080"
    )]
    orchestrator_url: String,

    /// Seconds between polls when following a log
    #[arg(long, default_value_t = 2)]
    follow_interval: u64,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        orchestrator_url: cli.orchestrator_url,
        follow_interval: Duration::from_secs(cli.follow_interval.max(1)),
    };

    handle_command(cli.command, &config).await
}
