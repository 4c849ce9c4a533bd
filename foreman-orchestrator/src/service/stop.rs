//! Terminator
//!
//! Stops one group or every live group of a job under the run gate.

use foreman_core::domain::job::{GroupStatus, JobStatus};
use foreman_core::dto::run::StopOutcome;

use crate::config::STOP_POLL_INTERVAL;
use crate::context::AppContext;
use crate::process::terminate;
use crate::service::error::JobError;
use crate::service::job::{check_job_id, load_reconciled, save_job};

/// Stop the process of `group_id`, or of every running group
pub async fn stop_job(
    ctx: &AppContext,
    job_id: &str,
    group_id: Option<&str>,
) -> Result<StopOutcome, JobError> {
    check_job_id(job_id)?;
    let guard = ctx.gate.acquire().await?;

    // Groups that died on their own are classified here, not marked stopped
    let mut job = load_reconciled(ctx, &guard, job_id).await?;

    let targets: Vec<String> = match group_id {
        Some(group_id) => {
            if !job.active_runs.contains_key(group_id) {
                return Err(JobError::GroupNotFound {
                    job_id: job_id.to_string(),
                    group_id: group_id.to_string(),
                });
            }
            vec![group_id.to_string()]
        }
        None => job.running_groups().map(|(id, _)| id.clone()).collect(),
    };

    let pids: Vec<u32> = targets
        .iter()
        .filter_map(|id| job.active_runs.get(id))
        .filter(|group| group.status == GroupStatus::Running)
        .filter_map(|group| group.pid())
        .collect();

    // A job whose processes already exited keeps its reconciled
    // completed/failed status; it is not rewritten to stopped
    if pids.is_empty() {
        tracing::info!("Stop requested for job {} but nothing is running", job_id);
        return Ok(StopOutcome {
            job_id: job_id.to_string(),
            stopped: Vec::new(),
            note: Some("not running".to_string()),
        });
    }

    let grace = ctx.config.stop_grace;
    let to_signal = pids.clone();
    let stopped = tokio::task::spawn_blocking(move || {
        terminate(&to_signal, grace, STOP_POLL_INTERVAL)
    })
    .await
    .map_err(|e| JobError::Execution(format!("Stop task failed: {e}")))??;

    for pid in &pids {
        ctx.registry.reap(*pid);
    }

    for id in &targets {
        if let Some(group) = job.active_runs.get_mut(id) {
            if group.status == GroupStatus::Running {
                group.status = GroupStatus::Stopped;
                group.pid.clear();
            }
        }
    }

    if job.running_groups().next().is_none() {
        job.status = JobStatus::Stopped;
    }

    save_job(ctx, &mut job).await?;
    drop(guard);

    tracing::info!(
        "Stopped job {} ({}): pids {:?}",
        job_id,
        group_id.unwrap_or("all groups"),
        stopped
    );

    Ok(StopOutcome {
        job_id: job_id.to_string(),
        stopped,
        note: None,
    })
}
