//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod job;

pub use job::JobCommands;

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use foreman_client::{ClientError, OrchestratorClient};

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Job management
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Show orchestrator health
    Health,
}

/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::Health => show_health(config).await,
    }
}

async fn show_health(config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    // A degraded orchestrator answers 503 with the same report as the body
    let report = match client.health().await {
        Ok(report) => report,
        Err(ClientError::ApiError {
            status: 503,
            message,
            ..
        }) => serde_json::from_str(&message)?,
        Err(err) => return Err(err.into()),
    };

    let status = report["status"].as_str().unwrap_or("unknown");
    let status_colored = if status == "ok" {
        status.green()
    } else {
        status.red()
    };
    println!("{} {}", "Orchestrator:".bold(), status_colored);
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
