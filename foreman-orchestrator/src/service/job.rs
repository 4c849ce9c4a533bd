//! Job Service
//!
//! Job catalogue operations and reads through the status reconciler.

use chrono::Utc;
use foreman_core::domain::job::Job;
use foreman_core::dto::job::{CloneJob, CreateJob, UpdateJob};
use uuid::Uuid;

use crate::context::AppContext;
use crate::gate::GateGuard;
use crate::layout::{is_valid_job_id, slugify, write_json_atomic};
use crate::repository::job_repository;
use crate::service::error::JobError;
use crate::service::reconcile::{has_live_group, reconcile};
use crate::workflow::playbook_key;

/// Workflow used when a new job does not name one
pub const DEFAULT_WORKFLOW: &str = "configbuild";

/// Rejects ids that could not have been issued by [`create_job`]
pub fn check_job_id(job_id: &str) -> Result<(), JobError> {
    if is_valid_job_id(job_id) {
        Ok(())
    } else {
        Err(JobError::Validation(format!("Invalid job id: {job_id:?}")))
    }
}

/// Create a saved job
pub async fn create_job(ctx: &AppContext, req: CreateJob) -> Result<Job, JobError> {
    let name = req.job_name.trim();
    if name.is_empty() {
        return Err(JobError::Validation("jobName is required".to_string()));
    }

    let workflow = normalize_workflow(ctx, req.workflow.as_deref().unwrap_or(DEFAULT_WORKFLOW))?;
    let server_class = server_class_for(&workflow, req.server_class.as_deref().unwrap_or(""))?;

    let now = Utc::now();
    let suffix = Uuid::new_v4().simple().to_string();
    let job_id = format!(
        "{}_{}_{}",
        slugify(name),
        now.format("%Y%m%d_%H%M%S"),
        &suffix[..6]
    );

    let mut job = Job::new(job_id, name, workflow, now);
    job.server_class = server_class;
    job.host_limit = req.host_limit.unwrap_or_default().trim().to_string();
    job.inventory_path = req.inventory_path.unwrap_or_default().trim().to_string();
    job.notes = req.notes.unwrap_or_default();

    ctx.layout.create_job_dirs(&job.job_id)?;
    save_job(ctx, &mut job).await?;

    tracing::info!("Job created: {} ({})", job.job_id, job.workflow);

    Ok(job)
}

/// Get a job by ID, reconciled against the OS
pub async fn get_job(ctx: &AppContext, job_id: &str) -> Result<Job, JobError> {
    check_job_id(job_id)?;

    let mut job = job_repository::find_by_id(&ctx.pool, job_id)
        .await?
        .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

    if !reconcile(ctx, &mut job) {
        return Ok(job);
    }

    // Persist only under the gate so a read never overwrites a launch
    match ctx.gate.acquire().await {
        Ok(guard) => load_reconciled(ctx, &guard, job_id).await,
        Err(e) => {
            tracing::warn!("Returning unpersisted view of job {}: {}", job_id, e);
            Ok(job)
        }
    }
}

/// List all jobs, newest first, reconciled against the OS
pub async fn list_jobs(ctx: &AppContext) -> Result<Vec<Job>, JobError> {
    let mut jobs = job_repository::list_all(&ctx.pool).await?;

    let changed: Vec<usize> = jobs
        .iter_mut()
        .enumerate()
        .filter_map(|(i, job)| reconcile(ctx, job).then_some(i))
        .collect();
    if changed.is_empty() {
        return Ok(jobs);
    }

    let guard = match ctx.gate.acquire().await {
        Ok(guard) => guard,
        Err(e) => {
            tracing::warn!("Returning unpersisted job list: {}", e);
            return Ok(jobs);
        }
    };

    let mut deleted = Vec::new();
    for i in changed {
        let job_id = jobs[i].job_id.clone();
        match load_reconciled(ctx, &guard, &job_id).await {
            Ok(fresh) => jobs[i] = fresh,
            Err(JobError::NotFound(_)) => deleted.push(job_id),
            Err(e) => return Err(e),
        }
    }

    jobs.retain(|job| !deleted.contains(&job.job_id));
    Ok(jobs)
}

/// Update descriptive fields of a job
pub async fn update_job(ctx: &AppContext, job_id: &str, req: UpdateJob) -> Result<Job, JobError> {
    check_job_id(job_id)?;
    let guard = ctx.gate.acquire().await?;
    let mut job = load_reconciled(ctx, &guard, job_id).await?;

    if let Some(name) = req.job_name {
        let name = name.trim();
        if name.is_empty() {
            return Err(JobError::Validation("jobName cannot be empty".to_string()));
        }
        job.job_name = name.to_string();
    }
    if let Some(workflow) = req.workflow {
        job.workflow = normalize_workflow(ctx, &workflow)?;
    }
    if let Some(class) = req.server_class {
        job.server_class = class;
    }
    job.server_class = server_class_for(&job.workflow, &job.server_class)?;
    if let Some(hosts) = req.host_limit {
        job.host_limit = hosts.trim().to_string();
    }
    if let Some(inventory) = req.inventory_path {
        job.inventory_path = inventory.trim().to_string();
    }
    if let Some(notes) = req.notes {
        job.notes = notes;
    }

    save_job(ctx, &mut job).await?;
    drop(guard);

    tracing::info!("Job updated: {}", job_id);

    Ok(job)
}

/// Copy the descriptive fields of a job into a new saved job
pub async fn clone_job(ctx: &AppContext, job_id: &str, overrides: CloneJob) -> Result<Job, JobError> {
    let source = get_job(ctx, job_id).await?;

    let req = CreateJob {
        job_name: overrides
            .job_name
            .unwrap_or_else(|| format!("{} (copy)", source.job_name)),
        workflow: Some(overrides.workflow.unwrap_or(source.workflow)),
        server_class: Some(overrides.server_class.unwrap_or(source.server_class)),
        host_limit: Some(overrides.host_limit.unwrap_or(source.host_limit)),
        inventory_path: Some(overrides.inventory_path.unwrap_or(source.inventory_path)),
        notes: Some(overrides.notes.unwrap_or(source.notes)),
    };

    let job = create_job(ctx, req).await?;
    tracing::info!("Job {} cloned from {}", job.job_id, job_id);

    Ok(job)
}

/// Delete a job and its directory; refused while any group is live
pub async fn delete_job(ctx: &AppContext, job_id: &str) -> Result<(), JobError> {
    check_job_id(job_id)?;
    let guard = ctx.gate.acquire().await?;
    let job = load_reconciled(ctx, &guard, job_id).await?;

    if has_live_group(&job) {
        return Err(JobError::Validation(
            "Cannot delete a running job. Stop it first.".to_string(),
        ));
    }

    job_repository::delete(&ctx.pool, job_id).await?;
    drop(guard);

    let dir = ctx.layout.job_dir(job_id);
    if dir.is_dir() {
        std::fs::remove_dir_all(&dir)?;
    }

    tracing::info!("Job deleted: {}", job_id);

    Ok(())
}

// =============================================================================
// Persistence Helpers
// =============================================================================

/// Reads a job, reconciles it and persists the result if it changed.
///
/// Taking the guard by reference proves the caller holds the gate.
pub async fn load_reconciled(
    ctx: &AppContext,
    _guard: &GateGuard,
    job_id: &str,
) -> Result<Job, JobError> {
    let mut job = job_repository::find_by_id(&ctx.pool, job_id)
        .await?
        .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

    if reconcile(ctx, &mut job) {
        save_job(ctx, &mut job).await?;
    }

    Ok(job)
}

/// Writes the job document to the store, then refreshes the debug mirror
pub async fn save_job(ctx: &AppContext, job: &mut Job) -> Result<(), JobError> {
    job.refresh_legacy_mirror();
    job.updated_at = Some(Utc::now());

    job_repository::upsert(&ctx.pool, job).await?;

    if ctx.layout.job_dir(&job.job_id).is_dir() {
        let path = ctx.layout.job_mirror_path(&job.job_id);
        if let Err(e) = write_json_atomic(&path, job) {
            tracing::warn!("Failed to write job mirror {}: {}", path.display(), e);
        }
    }

    Ok(())
}

fn normalize_workflow(ctx: &AppContext, raw: &str) -> Result<String, JobError> {
    let workflow = raw.trim().to_lowercase();
    if ctx.resolver.knows_workflow(&workflow) {
        Ok(workflow)
    } else {
        Err(JobError::Validation(format!("Invalid workflow: {workflow}")))
    }
}

fn server_class_for(workflow: &str, raw: &str) -> Result<String, JobError> {
    Ok(playbook_key(workflow, raw)?.1)
}
