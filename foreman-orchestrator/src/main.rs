use anyhow::Context as AnyhowContext;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod context;
pub mod db;
pub mod gate;
pub mod layout;
pub mod process;
pub mod reaper;
pub mod repository;
pub mod service;
pub mod workflow;

#[cfg(test)]
mod testing;

use crate::config::Config;
use crate::context::AppContext;
use crate::reaper::StaleRunReaper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foreman_orchestrator=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Foreman Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        "Data directory: {}, max concurrent runs: {}",
        config.data_dir.display(),
        config.max_concurrent_runs
    );

    let ctx = AppContext::from_config(config).await?;

    tracing::info!("Job store ready at {}", ctx.config.database_path.display());

    // Safety net for runs that never finish
    let reaper = StaleRunReaper::new(
        ctx.registry.clone(),
        ctx.config.reaper_interval,
        ctx.config.max_run_duration,
    );
    tokio::spawn(reaper.run());

    let addr = ctx.config.bind_addr.clone();

    // Build router with all API endpoints
    let app = api::create_router(ctx);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .await
        .context("Server terminated unexpectedly")?;

    Ok(())
}
