//! Log Service
//!
//! Incremental reads of run group logs.

use foreman_core::domain::job::{GroupStatus, Job};
use foreman_core::dto::log::{GroupLogInfo, JobLog, LogChunk, LogOverview};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::context::AppContext;
use crate::service::error::JobError;
use crate::service::job::get_job;

/// Bytes returned when a caller starts reading a log from scratch
pub const TAIL_BYTES: u64 = 200_000;

/// Read a job log from `offset`.
///
/// A job with several groups and no `group_id` yields a per-group overview.
pub async fn job_log(
    ctx: &AppContext,
    job_id: &str,
    offset: u64,
    group_id: Option<&str>,
) -> Result<JobLog, JobError> {
    let job = get_job(ctx, job_id).await?;

    let (log_path, group_status) = match group_id {
        Some(group_id) => {
            let group = job
                .active_runs
                .get(group_id)
                .ok_or_else(|| JobError::GroupNotFound {
                    job_id: job_id.to_string(),
                    group_id: group_id.to_string(),
                })?;
            (group.log_path.clone(), Some(group.status))
        }
        None if job.active_runs.len() > 1 => return Ok(JobLog::Overview(overview(&job))),
        None => (
            job.last_log_path.clone(),
            job.mirror_group().map(|(_, group)| group.status),
        ),
    };

    Ok(JobLog::Chunk(read_chunk(&job, &log_path, offset, group_status)))
}

fn overview(job: &Job) -> LogOverview {
    let mut groups: Vec<_> = job.active_runs.iter().collect();
    groups.sort_by(|(_, a), (_, b)| (&a.run_id, a.ordinal).cmp(&(&b.run_id, b.ordinal)));

    LogOverview {
        status: job.status,
        groups: groups
            .into_iter()
            .map(|(group_id, group)| GroupLogInfo {
                group_id: group_id.clone(),
                label: group.label.clone(),
                status: group.status,
                log_size: std::fs::metadata(&group.log_path).map_or(0, |m| m.len()),
                tags: group.tags.clone(),
                hosts: group.hosts.clone(),
            })
            .collect(),
    }
}

fn read_chunk(job: &Job, log_path: &str, offset: u64, group_status: Option<GroupStatus>) -> LogChunk {
    let note = |text: String| LogChunk {
        text: String::new(),
        offset: 0,
        size: 0,
        status: job.status,
        group_status,
        note: Some(text),
    };

    if log_path.is_empty() {
        return note("No run started yet.".to_string());
    }

    let path = Path::new(log_path);
    if !path.is_file() {
        return note(format!("Log not found yet: {log_path}"));
    }

    match read_from(path, offset) {
        Ok((text, size)) => LogChunk {
            text,
            offset: size,
            size,
            status: job.status,
            group_status,
            note: None,
        },
        Err(e) => {
            tracing::warn!("Unable to read log {}: {}", log_path, e);
            note(format!("Unable to read log: {e}"))
        }
    }
}

/// Reads from `offset` to the end, or the last [`TAIL_BYTES`] when
/// `offset` is zero or past the end. Returns the text and the file size.
fn read_from(path: &Path, offset: u64) -> std::io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();

    let start = if offset > 0 && offset <= size {
        offset
    } else {
        size.saturating_sub(TAIL_BYTES)
    };
    file.seek(SeekFrom::Start(start))?;

    let mut buf = Vec::with_capacity((size - start) as usize);
    file.take(size - start).read_to_end(&mut buf)?;
    Ok((String::from_utf8_lossy(&buf).into_owned(), size))
}
