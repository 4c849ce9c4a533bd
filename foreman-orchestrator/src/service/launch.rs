//! Run launcher
//!
//! Every launch runs the whole count, admit, spawn, persist sequence under
//! one acquisition of the run gate. Requests are fully validated before the
//! gate is taken, and every command is resolved before the first process
//! starts, so a rejected request never leaves a partial launch behind.

use chrono::Utc;
use foreman_core::domain::job::{GroupStatus, Job, JobStatus, RunGroup};
use foreman_core::domain::run::{GroupMeta, GroupRef, RunMeta};
use foreman_core::dto::run::{
    GroupSpec, GroupStarted, GroupsStarted, RunJobRequest, RunLaunched, RunStarted,
};
use std::collections::{BTreeMap, BTreeSet};

use crate::context::AppContext;
use crate::layout::{is_valid_group_id, write_json_atomic};
use crate::process::spawn::spawn_logged;
use crate::repository::job_repository;
use crate::service::error::JobError;
use crate::service::job::{check_job_id, load_reconciled, save_job};
use crate::service::reconcile::{has_live_group, live_group_count};
use crate::workflow::{LaunchScope, ResolvedCommand};

/// Label of a single run that selects no tags
pub const FULL_WORKFLOW_LABEL: &str = "Full Workflow";

/// One process to start, as requested by the caller
#[derive(Debug, Clone)]
struct PlannedGroup {
    /// Caller supplied id; single runs get a generated `run<N>` id
    requested_id: Option<String>,
    label: Option<String>,
    tags: Vec<String>,
    /// `None` falls back to the job's host limit
    hosts: Option<String>,
    workflow: Option<String>,
    server_class: Option<String>,
}

/// A planned group after id assignment and command resolution
struct ReadyGroup {
    group_id: String,
    label: String,
    tags: Vec<String>,
    hosts: String,
    command: ResolvedCommand,
}

/// Groups started by one launch, in launch order
struct Launch {
    run_id: String,
    started: Vec<(String, RunGroup, u32)>,
}

/// POST /api/jobs/{id}/run entry point.
///
/// Two or more groups start a multi-group run; exactly one group is a
/// single run that keeps that group's id, label and scope.
pub async fn run_job(
    ctx: &AppContext,
    job_id: &str,
    req: RunJobRequest,
) -> Result<RunLaunched, JobError> {
    let RunJobRequest {
        tags,
        workflow_override,
        hosts,
        groups,
    } = req;

    match groups.len() {
        0 => run_single(ctx, job_id, tags, workflow_override, hosts)
            .await
            .map(RunLaunched::Single),
        1 => {
            check_job_id(job_id)?;
            let mut spec = groups.into_iter().next().unwrap_or_default();
            spec.workflow = spec.workflow.or(workflow_override);
            let mut plan = plan_group(ctx, spec)?;
            plan.hosts = plan.hosts.filter(|h| !h.trim().is_empty());
            launch_one(ctx, job_id, plan).await.map(RunLaunched::Single)
        }
        _ => run_job_groups(ctx, job_id, groups)
            .await
            .map(RunLaunched::Groups),
    }
}

/// Starts one process for the job, merged next to any live groups
pub async fn run_single(
    ctx: &AppContext,
    job_id: &str,
    tags: Vec<String>,
    workflow_override: Option<String>,
    hosts: Option<String>,
) -> Result<RunStarted, JobError> {
    check_job_id(job_id)?;

    let tags = ctx.tags.validate(&tags).map_err(|unknown| {
        JobError::Validation(format!(
            "Unknown task tags: {}. Valid: {}",
            unknown.join(", "),
            ctx.tags.describe()
        ))
    })?;

    let plan = PlannedGroup {
        requested_id: None,
        label: None,
        tags,
        hosts: hosts.filter(|h| !h.trim().is_empty()),
        workflow: workflow_override,
        server_class: None,
    };

    launch_one(ctx, job_id, plan).await
}

async fn launch_one(
    ctx: &AppContext,
    job_id: &str,
    plan: PlannedGroup,
) -> Result<RunStarted, JobError> {
    let launch = launch(ctx, job_id, vec![plan]).await?;
    let (group_id, group, pid) = launch
        .started
        .into_iter()
        .next()
        .ok_or_else(|| JobError::Execution("No process was started".to_string()))?;

    Ok(RunStarted {
        job_id: job_id.to_string(),
        run_id: launch.run_id,
        group_id,
        pid,
        log_path: group.log_path,
        tags: group.tags,
    })
}

/// Starts one process per group; requires at least two groups
pub async fn run_job_groups(
    ctx: &AppContext,
    job_id: &str,
    groups: Vec<GroupSpec>,
) -> Result<GroupsStarted, JobError> {
    check_job_id(job_id)?;

    if groups.len() < 2 {
        return Err(JobError::Validation(
            "A multi-group run requires at least 2 groups".to_string(),
        ));
    }

    let mut seen = BTreeSet::new();
    let mut plans = Vec::with_capacity(groups.len());
    for spec in groups {
        let plan = plan_group(ctx, spec)?;
        let group_id = plan.requested_id.clone().unwrap_or_default();
        if !seen.insert(group_id.clone()) {
            return Err(JobError::Validation(format!("Duplicate groupId: {group_id}")));
        }
        plans.push(plan);
    }

    let launch = launch(ctx, job_id, plans).await?;

    let groups = launch
        .started
        .into_iter()
        .map(|(group_id, group, pid)| {
            let started = GroupStarted {
                pid,
                label: group.label,
                log_path: group.log_path,
                tags: group.tags,
                hosts: group.hosts,
                workflow: group.workflow,
            };
            (group_id, started)
        })
        .collect::<BTreeMap<_, _>>();

    Ok(GroupsStarted {
        job_id: job_id.to_string(),
        run_id: launch.run_id,
        groups,
    })
}

/// Validates one group spec; its hosts are taken as given
fn plan_group(ctx: &AppContext, spec: GroupSpec) -> Result<PlannedGroup, JobError> {
    let group_id = spec.group_id.trim().to_string();
    if !is_valid_group_id(&group_id) {
        return Err(JobError::Validation(format!(
            "Invalid groupId {group_id:?}: use 1-64 of [A-Za-z0-9_.-]"
        )));
    }

    let label = spec
        .label
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| group_id.clone());

    let tags = ctx.tags.validate(&spec.tags).map_err(|unknown| {
        JobError::Validation(format!(
            "Group '{}': unknown tags: {}. Valid: {}",
            label,
            unknown.join(", "),
            ctx.tags.describe()
        ))
    })?;

    Ok(PlannedGroup {
        requested_id: Some(group_id),
        label: Some(label),
        tags,
        hosts: Some(spec.hosts),
        workflow: spec.workflow,
        server_class: spec.server_class,
    })
}

async fn launch(
    ctx: &AppContext,
    job_id: &str,
    plans: Vec<PlannedGroup>,
) -> Result<Launch, JobError> {
    let guard = ctx.gate.acquire().await?;

    let mut job = load_reconciled(ctx, &guard, job_id).await?;
    if !has_live_group(&job) {
        // Finished groups of earlier attempts are not carried into a new one
        job.active_runs.clear();
    }

    let active = active_run_groups(ctx).await?;
    let max = ctx.config.max_concurrent_runs;
    if active + plans.len() > max {
        return Err(JobError::Admission(format!(
            "Run queue full ({} active + {} requested > {} limit). \
             Wait for running jobs to finish or stop some first.",
            active,
            plans.len(),
            max
        )));
    }

    let started_at = Utc::now();
    let ready = resolve_all(ctx, &job, &plans)?;
    let run_id = ctx.layout.allocate_run_dir(job_id, started_at)?;
    let ready = assign_group_ids(&job, ready, &run_id);

    let base_ordinal = next_ordinal(&job, &run_id);
    let mut started: Vec<(String, RunGroup, u32)> = Vec::with_capacity(ready.len());

    for (offset, group) in ready.into_iter().enumerate() {
        match start_group(ctx, &job, &run_id, &group, started_at) {
            Ok(pid) => {
                tracing::info!(
                    "Started job {} group {} (run={}, pid={}, tags={}, hosts={})",
                    job_id,
                    group.group_id,
                    run_id,
                    pid,
                    describe_tags(&group.tags),
                    if group.hosts.is_empty() { "all" } else { group.hosts.as_str() }
                );
                let record = RunGroup {
                    pid: pid.to_string(),
                    log_path: ctx
                        .layout
                        .group_log_path(job_id, &run_id, &group.group_id)
                        .to_string_lossy()
                        .into_owned(),
                    tags: group.tags,
                    hosts: group.hosts,
                    label: group.label,
                    status: GroupStatus::Running,
                    workflow: group.command.workflow,
                    run_id: run_id.clone(),
                    ordinal: base_ordinal + offset as u32,
                    started_at: Some(started_at),
                };
                started.push((group.group_id, record, pid));
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to start job {} group {}: {}",
                    job_id,
                    group.group_id,
                    e
                );
                abort(ctx, &started);
                return Err(JobError::Execution(format!(
                    "Failed to start group '{}': {}",
                    group.label, e
                )));
            }
        }
    }

    let meta = run_meta(&job, &run_id, &started, started_at);
    if let Err(e) = write_json_atomic(&ctx.layout.run_meta_path(job_id, &run_id), &meta) {
        abort(ctx, &started);
        return Err(e.into());
    }

    job.status = JobStatus::Running;
    job.last_run_id = run_id.clone();
    for (group_id, record, _) in &started {
        job.active_runs.insert(group_id.clone(), record.clone());
    }

    // Success is only reported once the pids are durable
    if let Err(e) = save_job(ctx, &mut job).await {
        abort(ctx, &started);
        return Err(e);
    }
    drop(guard);

    Ok(Launch { run_id, started })
}

/// Live run groups across every job the store lists as running
async fn active_run_groups(ctx: &AppContext) -> Result<usize, JobError> {
    let running = job_repository::list_by_status(&ctx.pool, JobStatus::Running).await?;
    Ok(running.iter().map(live_group_count).sum())
}

fn resolve_all(
    ctx: &AppContext,
    job: &Job,
    plans: &[PlannedGroup],
) -> Result<Vec<(PlannedGroup, ResolvedCommand)>, JobError> {
    plans
        .iter()
        .map(|plan| {
            let scope = LaunchScope {
                workflow: plan
                    .workflow
                    .as_deref()
                    .map(|w| w.trim().to_lowercase())
                    .filter(|w| !w.is_empty())
                    .unwrap_or_else(|| job.workflow.clone()),
                server_class: plan
                    .server_class
                    .as_deref()
                    .map(str::trim)
                    .filter(|class| !class.is_empty())
                    .unwrap_or(&job.server_class)
                    .to_string(),
                tags: plan.tags.clone(),
                hosts: plan
                    .hosts
                    .as_deref()
                    .unwrap_or(&job.host_limit)
                    .trim()
                    .to_string(),
            };
            let command = ctx.resolver.resolve(job, &scope)?;
            let plan = PlannedGroup {
                hosts: Some(scope.hosts),
                ..plan.clone()
            };
            Ok((plan, command))
        })
        .collect()
}

/// Names every group so that no id collides with a group still present in
/// the job or with another group of the same launch
fn assign_group_ids(
    job: &Job,
    resolved: Vec<(PlannedGroup, ResolvedCommand)>,
    run_id: &str,
) -> Vec<ReadyGroup> {
    let mut scratch = job.clone();
    let mut ready = Vec::with_capacity(resolved.len());

    for (plan, command) in resolved {
        let group_id = match &plan.requested_id {
            Some(requested) => scratch.unique_group_id(requested, run_id),
            None => {
                let base = format!("run{}", scratch.active_runs.len() + 1);
                if scratch.active_runs.contains_key(&base) {
                    scratch.unique_group_id(&format!("run_{run_id}"), run_id)
                } else {
                    base
                }
            }
        };

        let label = plan.label.clone().unwrap_or_else(|| {
            if plan.tags.is_empty() {
                FULL_WORKFLOW_LABEL.to_string()
            } else {
                plan.tags.join(", ")
            }
        });

        // Reserve the id for the rest of this launch
        scratch.active_runs.insert(
            group_id.clone(),
            RunGroup {
                pid: String::new(),
                log_path: String::new(),
                tags: Vec::new(),
                hosts: String::new(),
                label: label.clone(),
                status: GroupStatus::Running,
                workflow: String::new(),
                run_id: run_id.to_string(),
                ordinal: 0,
                started_at: None,
            },
        );

        ready.push(ReadyGroup {
            group_id,
            label,
            tags: plan.tags,
            hosts: plan.hosts.unwrap_or_default(),
            command,
        });
    }

    ready
}

fn next_ordinal(job: &Job, run_id: &str) -> u32 {
    job.active_runs
        .values()
        .filter(|group| group.run_id == run_id)
        .map(|group| group.ordinal + 1)
        .max()
        .unwrap_or(0)
}

/// Writes the group metadata and starts its process
fn start_group(
    ctx: &AppContext,
    job: &Job,
    run_id: &str,
    group: &ReadyGroup,
    started_at: chrono::DateTime<Utc>,
) -> std::io::Result<u32> {
    let dir = ctx.layout.group_dir(&job.job_id, run_id, &group.group_id);
    std::fs::create_dir_all(&dir)?;

    let meta = GroupMeta {
        group_id: group.group_id.clone(),
        label: group.label.clone(),
        tags: group.tags.clone(),
        hosts: group.hosts.clone(),
        workflow: group.command.workflow.clone(),
        server_class: group.command.server_class.clone(),
        command: group.command.display(),
        started_at,
    };
    write_json_atomic(
        &ctx.layout.group_meta_path(&job.job_id, run_id, &group.group_id),
        &meta,
    )?;

    let log_path = ctx.layout.group_log_path(&job.job_id, run_id, &group.group_id);
    let child = spawn_logged(&group.command, &log_path, &group.label)?;
    Ok(ctx.registry.register(child, &job.job_id, &group.group_id))
}

fn run_meta(
    job: &Job,
    run_id: &str,
    started: &[(String, RunGroup, u32)],
    started_at: chrono::DateTime<Utc>,
) -> RunMeta {
    let single = started.len() == 1;
    RunMeta {
        run_id: run_id.to_string(),
        workflow: started
            .first()
            .filter(|_| single)
            .map(|(_, group, _)| group.workflow.clone())
            .unwrap_or_else(|| job.workflow.clone()),
        server_class: job.server_class.clone(),
        tags: started
            .first()
            .filter(|_| single)
            .map(|(_, group, _)| group.tags.clone())
            .unwrap_or_default(),
        groups: started
            .iter()
            .map(|(group_id, group, _)| GroupRef {
                group_id: group_id.clone(),
                label: group.label.clone(),
            })
            .collect(),
        started_at,
    }
}

/// Kills and reaps the processes a failed launch already started
fn abort(ctx: &AppContext, started: &[(String, RunGroup, u32)]) {
    for (group_id, _, pid) in started {
        tracing::warn!("Killing group {} (pid {}) of aborted launch", group_id, pid);
        ctx.registry.kill(*pid);
    }
}

fn describe_tags(tags: &[String]) -> String {
    if tags.is_empty() {
        "full".to_string()
    } else {
        tags.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::process::is_alive;
    use crate::service::job::{create_job, get_job};
    use crate::service::stop::stop_job;
    use crate::testing::{self, TestEnv};
    use foreman_core::dto::job::CreateJob;
    use std::time::Duration;

    async fn job(env: &TestEnv, name: &str, workflow: &str) -> Job {
        create_job(
            &env.ctx,
            CreateJob {
                job_name: name.to_string(),
                workflow: Some(workflow.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    fn spec(group_id: &str, tags: &[&str]) -> GroupSpec {
        GroupSpec {
            group_id: group_id.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            hosts: format!("{group_id}.example"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_single_run_is_durable_before_return() {
        let env = testing::env(5).await;
        let job = job(&env, "Single", "sleep").await;

        let started = run_single(&env.ctx, &job.job_id, vec!["powerup".to_string()], None, None)
            .await
            .unwrap();
        assert_eq!(started.group_id, "run1");
        assert_eq!(started.tags, vec!["powerup"]);
        assert!(is_alive(started.pid));

        // A second pool stands in for another server process
        let other = db::create_pool(&env.ctx.config.database_path).await.unwrap();
        let stored = job_repository::find_by_id(&other, &job.job_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.last_pid, started.pid.to_string());
        assert_eq!(stored.last_log_path, started.log_path);
        assert_eq!(stored.active_runs["run1"].label, "powerup");

        let log = std::fs::read_to_string(&started.log_path).unwrap();
        assert!(log.starts_with("=== Run Group: powerup ==="));
        assert!(env.ctx.layout.run_meta_path(&job.job_id, &started.run_id).is_file());

        let outcome = stop_job(&env.ctx, &job.job_id, None).await.unwrap();
        assert_eq!(outcome.stopped, vec![started.pid]);
    }

    #[tokio::test]
    async fn test_unknown_tag_starts_nothing() {
        let env = testing::env(5).await;
        let job = job(&env, "Tags", "sleep").await;

        let err = run_single(&env.ctx, &job.job_id, vec!["powerup,bogus".to_string()], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
        assert!(err.to_string().contains("bogus"));
        assert!(env.ctx.registry.is_empty());

        let err = run_job_groups(
            &env.ctx,
            &job.job_id,
            vec![spec("g1", &["lldp"]), spec("g2", &["nope"])],
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Group 'g2'"));
        assert!(env.ctx.registry.is_empty());

        let stored = get_job(&env.ctx, &job.job_id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Saved);
        assert!(std::fs::read_dir(env.ctx.layout.runs_dir(&job.job_id))
            .unwrap()
            .next()
            .is_none());
    }

    #[tokio::test]
    async fn test_group_spec_validation() {
        let env = testing::env(5).await;
        let job = job(&env, "Specs", "sleep").await;

        let err = run_job_groups(&env.ctx, &job.job_id, vec![spec("g1", &[])])
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));

        let err = run_job_groups(&env.ctx, &job.job_id, vec![spec("g1", &[]), spec("g1", &[])])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate"));

        let err = run_job_groups(&env.ctx, &job.job_id, vec![spec("g1", &[]), spec("../x", &[])])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid groupId"));
    }

    #[tokio::test]
    async fn test_admission_ceiling_under_concurrency() {
        let env = testing::env(2).await;
        let a = job(&env, "A", "sleep").await;
        let b = job(&env, "B", "sleep").await;
        let c = job(&env, "C", "sleep").await;

        let (ra, rb, rc) = tokio::join!(
            run_single(&env.ctx, &a.job_id, Vec::new(), None, None),
            run_single(&env.ctx, &b.job_id, Vec::new(), None, None),
            run_single(&env.ctx, &c.job_id, Vec::new(), None, None),
        );
        let results = [ra, rb, rc];

        let ok: Vec<&RunStarted> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        let rejected: Vec<&JobError> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(ok.len(), 2);
        assert_eq!(rejected.len(), 1);
        assert!(matches!(rejected[0], JobError::Admission(_)));
        assert!(rejected[0].is_retryable());

        // Free a slot behind the orchestrator's back, then retry
        let victim = ok[0].clone();
        env.ctx.registry.kill(victim.pid);
        get_job(&env.ctx, &victim.job_id).await.unwrap();

        let waiting = [&a, &b, &c]
            .into_iter()
            .find(|j| ok.iter().all(|s| s.job_id != j.job_id))
            .unwrap();
        let retried = run_single(&env.ctx, &waiting.job_id, Vec::new(), None, None).await;
        assert!(retried.is_ok());
    }

    #[tokio::test]
    async fn test_multi_group_run() {
        let env = testing::env(5).await;
        let job = job(&env, "Groups", "sleep").await;

        let started = run_job_groups(
            &env.ctx,
            &job.job_id,
            vec![spec("g1", &["powerup"]), spec("g2", &["lldp"])],
        )
        .await
        .unwrap();
        assert_eq!(started.groups.len(), 2);
        assert_eq!(started.groups["g2"].hosts, "g2.example");

        let stored = get_job(&env.ctx, &job.job_id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.active_runs.len(), 2);
        assert_eq!(stored.last_pid, started.groups["g1"].pid.to_string());
        assert_eq!(stored.last_run_tags, vec!["powerup"]);

        let meta: RunMeta = serde_json::from_str(
            &std::fs::read_to_string(env.ctx.layout.run_meta_path(&job.job_id, &started.run_id))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(meta.groups.len(), 2);
    }

    #[tokio::test]
    async fn test_groups_merge_with_live_groups() {
        let env = testing::env(10).await;
        let job = job(&env, "Merge", "sleep").await;

        run_job_groups(&env.ctx, &job.job_id, vec![spec("g1", &[]), spec("g2", &[])])
            .await
            .unwrap();
        // Run ids have one second resolution
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let second = run_job_groups(&env.ctx, &job.job_id, vec![spec("g1", &[]), spec("g3", &[])])
            .await
            .unwrap();

        let renamed = format!("g1_{}", second.run_id);
        assert!(second.groups.contains_key(&renamed));
        assert!(second.groups.contains_key("g3"));

        let stored = get_job(&env.ctx, &job.job_id).await.unwrap();
        assert_eq!(stored.active_runs.len(), 4);
        assert_eq!(stored.last_run_id, second.run_id);
        assert_eq!(stored.last_pid, second.groups[&renamed].pid.to_string());

        let single = run_single(&env.ctx, &job.job_id, Vec::new(), None, None)
            .await
            .unwrap();
        assert_eq!(single.group_id, "run5");
    }

    #[tokio::test]
    async fn test_group_isolation() {
        let env = testing::env(5).await;
        let job = job(&env, "Isolation", "sleep").await;

        let mut failing = spec("bad", &[]);
        failing.workflow = Some("fail".to_string());
        let started = run_job_groups(&env.ctx, &job.job_id, vec![failing, spec("good", &[])])
            .await
            .unwrap();

        let bad_pid = started.groups["bad"].pid;
        assert!(testing::wait_dead(bad_pid).await);

        let stored = get_job(&env.ctx, &job.job_id).await.unwrap();
        assert_eq!(stored.active_runs["bad"].status, GroupStatus::Failed);
        assert_eq!(stored.active_runs["good"].status, GroupStatus::Running);
        assert_eq!(stored.status, JobStatus::Running);

        env.ctx.registry.kill(started.groups["good"].pid);
        let stored = get_job(&env.ctx, &job.job_id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_external_kill_is_classified_from_log() {
        let env = testing::env(5).await;
        let job = job(&env, "External", "fail_then_sleep").await;

        let started = run_single(&env.ctx, &job.job_id, Vec::new(), None, None)
            .await
            .unwrap();
        let log = started.log_path.clone();
        assert!(
            testing::wait_for(Duration::from_secs(5), || {
                std::fs::read_to_string(&log)
                    .map(|text| text.contains("PLAY RECAP"))
                    .unwrap_or(false)
            })
            .await
        );

        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(started.pid as i32),
            nix::sys::signal::Signal::SIGKILL,
        )
        .unwrap();
        assert!(testing::wait_dead(started.pid).await);

        let stored = get_job(&env.ctx, &job.job_id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.last_pid.is_empty());
        assert!(stored.active_runs["run1"].pid.is_empty());
        assert!(!env.ctx.registry.contains(started.pid));
    }

    #[tokio::test]
    async fn test_rerun_after_completion_starts_fresh() {
        let env = testing::env(5).await;
        let job = job(&env, "Rerun", "ok").await;

        let first = run_single(&env.ctx, &job.job_id, Vec::new(), None, None)
            .await
            .unwrap();
        assert!(testing::wait_dead(first.pid).await);
        assert_eq!(
            get_job(&env.ctx, &job.job_id).await.unwrap().status,
            JobStatus::Completed
        );

        let second = run_single(&env.ctx, &job.job_id, Vec::new(), Some("sleep".to_string()), None)
            .await
            .unwrap();
        assert_eq!(second.group_id, "run1");
        assert_ne!(second.run_id, first.run_id);

        let stored = get_job(&env.ctx, &job.job_id).await.unwrap();
        assert_eq!(stored.active_runs.len(), 1);
        assert_eq!(stored.active_runs["run1"].workflow, "sleep");
        assert_eq!(stored.workflow, "ok");
    }

    fn group_meta(env: &TestEnv, job_id: &str, run_id: &str, group_id: &str) -> GroupMeta {
        let path = env.ctx.layout.group_meta_path(job_id, run_id, group_id);
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    async fn scoped_job(env: &TestEnv, name: &str, host_limit: &str) -> Job {
        create_job(
            &env.ctx,
            CreateJob {
                job_name: name.to_string(),
                workflow: Some("sleep".to_string()),
                host_limit: Some(host_limit.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_single_run_defaults_to_job_host_limit() {
        let env = testing::env(5).await;
        let job = scoped_job(&env, "Scoped", "10.0.0.1").await;

        let started = run_single(&env.ctx, &job.job_id, Vec::new(), None, None)
            .await
            .unwrap();
        let stored = get_job(&env.ctx, &job.job_id).await.unwrap();
        assert_eq!(stored.active_runs["run1"].hosts, "10.0.0.1");

        let meta = group_meta(&env, &job.job_id, &started.run_id, "run1");
        assert_eq!(meta.hosts, "10.0.0.1");
        assert!(meta.command.ends_with("--limit 10.0.0.1"));

        // A blank request value still means "use the job's limit"
        let other = scoped_job(&env, "Blank", "10.0.0.1").await;
        run_single(&env.ctx, &other.job_id, Vec::new(), None, Some("  ".to_string()))
            .await
            .unwrap();
        let stored = get_job(&env.ctx, &other.job_id).await.unwrap();
        assert_eq!(stored.active_runs["run1"].hosts, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_request_hosts_override_job_host_limit() {
        let env = testing::env(5).await;
        let job = scoped_job(&env, "Override", "10.0.0.1").await;

        let started = run_single(
            &env.ctx,
            &job.job_id,
            Vec::new(),
            None,
            Some(" 10.0.0.9 ".to_string()),
        )
        .await
        .unwrap();

        let stored = get_job(&env.ctx, &job.job_id).await.unwrap();
        assert_eq!(stored.active_runs["run1"].hosts, "10.0.0.9");
        let meta = group_meta(&env, &job.job_id, &started.run_id, "run1");
        assert!(meta.command.ends_with("--limit 10.0.0.9"));
        assert!(!meta.command.contains("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_run_job_without_groups_is_single_run() {
        let env = testing::env(5).await;
        let job = job(&env, "Plain", "sleep").await;

        let launched = run_job(
            &env.ctx,
            &job.job_id,
            RunJobRequest {
                tags: vec!["lldp".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let RunLaunched::Single(started) = launched else {
            panic!("expected a single run");
        };
        assert_eq!(started.group_id, "run1");
        assert_eq!(started.tags, vec!["lldp"]);
    }

    #[tokio::test]
    async fn test_run_job_with_one_group_keeps_its_identity() {
        let env = testing::env(5).await;
        let job = scoped_job(&env, "OneGroup", "10.0.0.1").await;

        let launched = run_job(
            &env.ctx,
            &job.job_id,
            RunJobRequest {
                groups: vec![GroupSpec {
                    group_id: "rackA".to_string(),
                    label: Some("Rack A".to_string()),
                    server_class: Some("I".to_string()),
                    tags: vec!["powerup".to_string()],
                    ..Default::default()
                }],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let RunLaunched::Single(started) = launched else {
            panic!("expected a single run");
        };
        assert_eq!(started.group_id, "rackA");
        assert_eq!(started.tags, vec!["powerup"]);

        let stored = get_job(&env.ctx, &job.job_id).await.unwrap();
        let group = &stored.active_runs["rackA"];
        assert_eq!(group.label, "Rack A");
        assert_eq!(group.hosts, "10.0.0.1");

        let meta = group_meta(&env, &job.job_id, &started.run_id, "rackA");
        assert_eq!(meta.server_class, "I");
        assert_eq!(meta.label, "Rack A");
    }

    #[tokio::test]
    async fn test_run_job_with_two_groups_is_multi_group_run() {
        let env = testing::env(5).await;
        let job = job(&env, "TwoGroups", "sleep").await;

        let launched = run_job(
            &env.ctx,
            &job.job_id,
            RunJobRequest {
                groups: vec![spec("g1", &[]), spec("g2", &[])],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let RunLaunched::Groups(started) = launched else {
            panic!("expected a multi-group run");
        };
        assert_eq!(started.groups.len(), 2);
        assert_eq!(started.groups["g1"].hosts, "g1.example");
    }

    #[tokio::test]
    async fn test_group_batch_is_admitted_as_a_whole() {
        let env = testing::env(2).await;
        let busy = job(&env, "Busy", "sleep").await;
        let batch = job(&env, "Batch", "sleep").await;

        run_single(&env.ctx, &busy.job_id, Vec::new(), None, None)
            .await
            .unwrap();
        assert_eq!(env.ctx.registry.len(), 1);

        // One slot is free but the batch needs two
        let err = run_job_groups(&env.ctx, &batch.job_id, vec![spec("g1", &[]), spec("g2", &[])])
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Admission(_)));
        assert_eq!(env.ctx.registry.len(), 1);

        let stored = get_job(&env.ctx, &batch.job_id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Saved);
        assert!(stored.active_runs.is_empty());
        assert!(std::fs::read_dir(env.ctx.layout.runs_dir(&batch.job_id))
            .unwrap()
            .next()
            .is_none());
    }
}
