//! Job API Handlers
//!
//! HTTP endpoints for the job catalogue and run lifecycle.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use foreman_core::domain::job::Job;
use foreman_core::dto::job::{CloneJob, CreateJob, UpdateJob};
use foreman_core::dto::log::JobLog;
use foreman_core::dto::run::{RunHistory, RunJobRequest, RunLaunched, StopJobRequest, StopOutcome};
use serde::Deserialize;

use crate::api::error::ApiResult;
use crate::context::AppContext;
use crate::service::{history_service, job_service, launch_service, log_service, stop_service};

// =============================================================================
// Catalogue Endpoints
// =============================================================================

/// GET /api/jobs
/// List all jobs, newest first
pub async fn list_jobs(State(ctx): State<AppContext>) -> ApiResult<Json<Vec<Job>>> {
    tracing::debug!("Listing all jobs");

    let jobs = job_service::list_jobs(&ctx).await?;
    Ok(Json(jobs))
}

/// POST /api/jobs
/// Create a saved job
pub async fn create_job(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateJob>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = job_service::create_job(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    tracing::debug!("Getting job: {}", id);

    let job = job_service::get_job(&ctx, &id).await?;
    Ok(Json(job))
}

/// PATCH /api/jobs/{id}
/// Update descriptive fields
pub async fn update_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(req): Json<UpdateJob>,
) -> ApiResult<Json<Job>> {
    let job = job_service::update_job(&ctx, &id, req).await?;
    Ok(Json(job))
}

/// DELETE /api/jobs/{id}
pub async fn delete_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    job_service::delete_job(&ctx, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/jobs/{id}/clone
pub async fn clone_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(overrides): Json<CloneJob>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = job_service::clone_job(&ctx, &id, overrides).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

// =============================================================================
// Run Lifecycle Endpoints
// =============================================================================

/// POST /api/jobs/{id}/run
/// Start a single run, or a multi-group run when two or more groups are given
pub async fn run_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(req): Json<RunJobRequest>,
) -> ApiResult<(StatusCode, Json<RunLaunched>)> {
    tracing::info!("Run requested for job {} ({} group(s))", id, req.groups.len().max(1));

    let launched = launch_service::run_job(&ctx, &id, req).await?;
    Ok((StatusCode::ACCEPTED, Json(launched)))
}

/// POST /api/jobs/{id}/stop
pub async fn stop_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(req): Json<StopJobRequest>,
) -> ApiResult<Json<StopOutcome>> {
    let outcome = stop_service::stop_job(&ctx, &id, req.group_id.as_deref()).await?;
    Ok(Json(outcome))
}

/// Query parameters of the log endpoint
#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub offset: u64,
    pub group: Option<String>,
}

/// GET /api/jobs/{id}/log?offset=&group=
pub async fn get_job_log(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<JobLog>> {
    let group = query.group.as_deref().filter(|g| !g.is_empty());
    let log = log_service::job_log(&ctx, &id, query.offset, group).await?;
    Ok(Json(log))
}

/// GET /api/jobs/{id}/runs
pub async fn list_runs(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<RunHistory>> {
    let history = history_service::list_runs(&ctx, &id).await?;
    Ok(Json(history))
}
