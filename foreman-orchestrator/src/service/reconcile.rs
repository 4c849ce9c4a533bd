//! Status reconciler
//!
//! Re-derives run state from pids and logs whenever a job is read. Nothing
//! here trusts a stored status: a group stays running only while its pid
//! passes the liveness probe.

use foreman_core::domain::job::{GroupStatus, Job, JobStatus, parse_pid};
use foreman_core::domain::outcome::RunOutcome;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::context::AppContext;
use crate::process::is_alive;

/// Only the end of a log is scanned for the completion marker
pub const RECAP_SCAN_BYTES: u64 = 1024 * 1024;

/// Brings `job` in line with the OS and its logs.
///
/// Returns true if the document changed and should be persisted. Running the
/// pass again on its own output changes nothing.
pub fn reconcile(ctx: &AppContext, job: &mut Job) -> bool {
    let before = job.clone();
    let previous_status = job.status;

    if job.adopt_legacy_run() {
        tracing::info!("Adopted legacy run of job {} as a run group", job.job_id);
    }

    let mut any_alive = false;
    for (group_id, group) in job.active_runs.iter_mut() {
        if group.status != GroupStatus::Running {
            continue;
        }

        if let Some(pid) = group.pid() {
            if is_alive(pid) {
                any_alive = true;
                continue;
            }
            // Only succeeds on the worker that spawned it
            ctx.registry.reap(pid);
        }

        group.status = match classify_log(Path::new(&group.log_path)) {
            RunOutcome::Failed => GroupStatus::Failed,
            RunOutcome::Passed | RunOutcome::Unknown => GroupStatus::Completed,
        };
        group.pid.clear();

        tracing::info!(
            "Job {} group {} finished: {}",
            job.job_id,
            group_id,
            group.status
        );
    }

    if any_alive {
        job.status = JobStatus::Running;
    } else if job.status == JobStatus::Running {
        job.status = job.settled_status();
        tracing::info!("Job {} settled as {}", job.job_id, job.status);
    }

    job.refresh_legacy_mirror();

    let counters_missing =
        job.host_count.is_none() || job.artifact_count.is_none() || job.last_run_result.is_none();
    if any_alive || job.status != previous_status || counters_missing {
        refresh_counters(ctx, job);
    }

    *job != before
}

/// Number of live run groups a job holds, as counted for admission
pub fn live_group_count(job: &Job) -> usize {
    if job.active_runs.is_empty() {
        return parse_pid(&job.last_pid).filter(|pid| is_alive(*pid)).map_or(0, |_| 1);
    }

    job.running_groups()
        .filter_map(|(_, group)| group.pid())
        .filter(|pid| is_alive(*pid))
        .count()
}

/// True if any group of the job has a live process
pub fn has_live_group(job: &Job) -> bool {
    live_group_count(job) > 0
}

/// Classifies a finished run from the tail of its log.
///
/// An unreadable or missing log is logged and reported as unknown.
pub fn classify_log(path: &Path) -> RunOutcome {
    if path.as_os_str().is_empty() {
        return RunOutcome::Unknown;
    }
    match read_tail(path, RECAP_SCAN_BYTES) {
        Ok(text) => RunOutcome::from_recap(&text),
        Err(e) => {
            tracing::warn!("Cannot read log {}: {}", path.display(), e);
            RunOutcome::Unknown
        }
    }
}

/// Last `max` bytes of a file, lossily decoded
pub fn read_tail(path: &Path, max: u64) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(max);
    file.seek(SeekFrom::Start(start))?;

    let mut buf = Vec::with_capacity((len - start) as usize);
    file.take(max).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn refresh_counters(ctx: &AppContext, job: &mut Job) {
    let inventory = if job.inventory_path.trim().is_empty() {
        ctx.config
            .playbook_root
            .join(crate::workflow::DEFAULT_INVENTORY)
    } else {
        PathBuf::from(job.inventory_path.trim())
    };

    job.host_count = Some(count_hosts(&inventory));
    job.artifact_count = Some(count_files(&ctx.layout.artifacts_dir(&job.job_id)));
    job.last_run_result = Some(
        classify_log(Path::new(&job.last_log_path))
            .as_result()
            .to_string(),
    );
}

/// Inventory lines that start with an IPv4 address
fn count_hosts(inventory: &Path) -> u32 {
    let Ok(text) = std::fs::read_to_string(inventory) else {
        return 0;
    };
    text.lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|token| token.parse::<Ipv4Addr>().is_ok())
        .count() as u32
}

fn count_files(dir: &Path) -> u32 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| match entry.file_type() {
            Ok(kind) if kind.is_dir() => count_files(&entry.path()),
            Ok(kind) if kind.is_file() => 1,
            _ => 0,
        })
        .sum()
}
