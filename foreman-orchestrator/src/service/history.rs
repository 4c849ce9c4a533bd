//! Run history
//!
//! Summaries of past run attempts, read back from the run directories.

use chrono::{DateTime, Utc};
use foreman_core::domain::job::LEGACY_GROUP_ID;
use foreman_core::domain::outcome::RunOutcome;
use foreman_core::domain::run::{GroupMeta, RunMeta, run_id_timestamp};
use foreman_core::dto::run::{GroupSummary, RunHistory, RunSummary};
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::context::AppContext;
use crate::layout::{LOG_FILE, META_FILE};
use crate::service::error::JobError;
use crate::service::job::get_job;
use crate::service::reconcile::classify_log;

/// List the runs of a job, newest first
pub async fn list_runs(ctx: &AppContext, job_id: &str) -> Result<RunHistory, JobError> {
    // Reconciles too, so a run that just ended is reported as such
    get_job(ctx, job_id).await?;

    let runs_dir = ctx.layout.runs_dir(job_id);
    let mut run_ids: Vec<String> = match std::fs::read_dir(&runs_dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    run_ids.sort_unstable_by(|a, b| b.cmp(a));

    let runs = run_ids
        .iter()
        .map(|run_id| summarize_run(&runs_dir.join(run_id), run_id))
        .collect();

    Ok(RunHistory {
        job_id: job_id.to_string(),
        runs,
    })
}

fn summarize_run(run_dir: &Path, run_id: &str) -> RunSummary {
    let meta: Option<RunMeta> = read_meta(&run_dir.join(META_FILE));
    let fallback_start = meta
        .as_ref()
        .map(|m| m.started_at)
        .or_else(|| run_id_timestamp(run_id));

    let mut groups = group_summaries(run_dir);

    // Runs recorded before groups existed keep their log at the top level
    let legacy_log = run_dir.join(LOG_FILE);
    if groups.is_empty() && legacy_log.is_file() {
        groups.push(GroupSummary {
            group_id: LEGACY_GROUP_ID.to_string(),
            label: "Run 1".to_string(),
            tags: meta.as_ref().map(|m| m.tags.clone()).unwrap_or_default(),
            started_at: fallback_start.unwrap_or_else(Utc::now),
            ended_at: modified_at(&legacy_log),
            result: classify_log(&legacy_log),
        });
    }

    let started = groups.iter().map(|g| g.started_at).min();
    let ended = groups.iter().filter_map(|g| g.ended_at).max();
    let duration_secs = match (started, ended) {
        (Some(start), Some(end)) => (end - start).num_seconds().max(0) as u64,
        _ => 0,
    };

    RunSummary {
        run_id: run_id.to_string(),
        timestamp: run_id_timestamp(run_id).or(fallback_start),
        workflow: meta.as_ref().map(|m| m.workflow.clone()).unwrap_or_default(),
        tags: meta.map(|m| m.tags).unwrap_or_default(),
        result: aggregate(groups.iter().map(|g| g.result)),
        duration_secs,
        groups,
    }
}

fn group_summaries(run_dir: &Path) -> Vec<GroupSummary> {
    let Ok(entries) = std::fs::read_dir(run_dir) else {
        return Vec::new();
    };

    let mut groups: Vec<GroupSummary> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let dir = entry.path();
            let meta: GroupMeta = read_meta(&dir.join(META_FILE))?;
            let log = dir.join(LOG_FILE);
            Some(GroupSummary {
                group_id: meta.group_id,
                label: meta.label,
                tags: meta.tags,
                started_at: meta.started_at,
                ended_at: modified_at(&log),
                result: classify_log(&log),
            })
        })
        .collect();

    groups.sort_by(|a, b| (a.started_at, &a.group_id).cmp(&(b.started_at, &b.group_id)));
    groups
}

/// Failed if any group failed, passed only if every group passed
fn aggregate(results: impl Iterator<Item = RunOutcome>) -> RunOutcome {
    let mut any = false;
    let mut all_passed = true;
    for result in results {
        any = true;
        match result {
            RunOutcome::Failed => return RunOutcome::Failed,
            RunOutcome::Unknown => all_passed = false,
            RunOutcome::Passed => {}
        }
    }
    if any && all_passed {
        RunOutcome::Passed
    } else {
        RunOutcome::Unknown
    }
}

fn read_meta<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let text = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(meta) => Some(meta),
        Err(e) => {
            tracing::warn!("Skipping unreadable run metadata {}: {}", path.display(), e);
            None
        }
    }
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}
