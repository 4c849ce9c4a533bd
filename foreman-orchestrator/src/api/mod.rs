//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod job;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;

/// Create the main API router with all endpoints
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Job catalogue
        .route("/api/jobs", get(job::list_jobs).post(job::create_job))
        .route(
            "/api/jobs/{id}",
            get(job::get_job)
                .patch(job::update_job)
                .delete(job::delete_job),
        )
        .route("/api/jobs/{id}/clone", post(job::clone_job))
        // Run lifecycle
        .route("/api/jobs/{id}/run", post(job::run_job))
        .route("/api/jobs/{id}/stop", post(job::stop_job))
        .route("/api/jobs/{id}/log", get(job::get_job_log))
        .route("/api/jobs/{id}/runs", get(job::list_runs))
        // Add state and middleware
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
}
