//! Job domain types
//!
//! A [`Job`] is persisted as one JSON document and replaced wholesale on every
//! write. Run state lives in `active_runs`; the `last_*` fields are a
//! single-run projection of that map kept for readers that predate groups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Group id used when a pre-group document is folded into `active_runs`.
pub const LEGACY_GROUP_ID: &str = "run1";

/// Job record
///
/// Field names serialize in camelCase so documents stay readable by the
/// existing web frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub job_name: String,
    pub workflow: String,
    #[serde(default)]
    pub server_class: String,
    #[serde(default)]
    pub host_limit: String,
    #[serde(default)]
    pub inventory_path: String,
    #[serde(default)]
    pub notes: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Run groups keyed by group id
    #[serde(default)]
    pub active_runs: BTreeMap<String, RunGroup>,

    /// Most recent run attempt; names its directory under `runs/`
    #[serde(default)]
    pub last_run_id: String,
    #[serde(default)]
    pub last_pid: String,
    #[serde(default)]
    pub last_log_path: String,
    #[serde(default)]
    pub last_run_tags: Vec<String>,

    // Cached counters, refreshed by the reconciler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_result: Option<String>,
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Saved,
    Running,
    Completed,
    Failed,
    Stopped,
}

/// One OS subprocess belonging to a run attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunGroup {
    /// Decimal pid, empty once the group is no longer running
    #[serde(default)]
    pub pid: String,
    pub log_path: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Host scope passed to the automation tool (`--limit`)
    #[serde(default)]
    pub hosts: String,
    pub label: String,
    pub status: GroupStatus,
    #[serde(default)]
    pub workflow: String,
    #[serde(default)]
    pub run_id: String,
    /// Launch position within its run attempt
    #[serde(default)]
    pub ordinal: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

/// Group-local status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

/// Parses a stored pid. Only values a signal can safely target are accepted:
/// zero and anything outside the positive `pid_t` range would address a
/// process group or every process instead of one process.
pub fn parse_pid(raw: &str) -> Option<u32> {
    raw.trim()
        .parse::<u32>()
        .ok()
        .filter(|pid| *pid > 0 && *pid <= i32::MAX as u32)
}

impl Job {
    /// Creates a new job in the `saved` state
    pub fn new(
        job_id: impl Into<String>,
        job_name: impl Into<String>,
        workflow: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            job_name: job_name.into(),
            workflow: workflow.into(),
            server_class: String::new(),
            host_limit: String::new(),
            inventory_path: String::new(),
            notes: String::new(),
            status: JobStatus::Saved,
            created_at,
            updated_at: None,
            active_runs: BTreeMap::new(),
            last_run_id: String::new(),
            last_pid: String::new(),
            last_log_path: String::new(),
            last_run_tags: Vec::new(),
            host_count: None,
            artifact_count: None,
            last_run_result: None,
        }
    }

    /// Groups currently recorded as running (not verified against the OS)
    pub fn running_groups(&self) -> impl Iterator<Item = (&String, &RunGroup)> {
        self.active_runs
            .iter()
            .filter(|(_, group)| group.status == GroupStatus::Running)
    }

    /// Folds a document written before run groups existed into a single
    /// [`LEGACY_GROUP_ID`] group so every later step only deals with groups.
    ///
    /// Returns true if the document was changed.
    pub fn adopt_legacy_run(&mut self) -> bool {
        if !self.active_runs.is_empty() || self.status != JobStatus::Running {
            return false;
        }
        if parse_pid(&self.last_pid).is_none() {
            return false;
        }

        let group = RunGroup {
            pid: self.last_pid.clone(),
            log_path: self.last_log_path.clone(),
            tags: self.last_run_tags.clone(),
            hosts: self.host_limit.clone(),
            label: "Run 1".to_string(),
            status: GroupStatus::Running,
            workflow: self.workflow.clone(),
            run_id: self.last_run_id.clone(),
            ordinal: 0,
            started_at: None,
        };
        self.active_runs.insert(LEGACY_GROUP_ID.to_string(), group);
        true
    }

    /// The group the legacy `last_*` fields mirror: the first group launched
    /// by the most recent run attempt.
    pub fn mirror_group(&self) -> Option<(&String, &RunGroup)> {
        self.active_runs
            .iter()
            .filter(|(_, group)| group.run_id == self.last_run_id)
            .min_by_key(|(_, group)| group.ordinal)
    }

    /// Recomputes the legacy single-run fields from `active_runs`.
    ///
    /// Must be called before every write of run state.
    pub fn refresh_legacy_mirror(&mut self) {
        let mirror = self
            .mirror_group()
            .map(|(_, group)| (group.pid.clone(), group.log_path.clone(), group.tags.clone()));

        match mirror {
            Some((pid, log_path, tags)) => {
                self.last_pid = pid;
                self.last_log_path = log_path;
                self.last_run_tags = tags;
            }
            None if self.status != JobStatus::Running => self.last_pid.clear(),
            None => {}
        }
    }

    /// Picks a group id that is not present in `active_runs`.
    ///
    /// A colliding id is suffixed with the run id of the attempt adding it.
    pub fn unique_group_id(&self, base: &str, run_id: &str) -> String {
        if !self.active_runs.contains_key(base) {
            return base.to_string();
        }

        let suffixed = format!("{base}_{run_id}");
        if !self.active_runs.contains_key(&suffixed) {
            return suffixed;
        }

        (2u32..)
            .map(|n| format!("{suffixed}_{n}"))
            .find(|candidate| !self.active_runs.contains_key(candidate))
            .unwrap_or(suffixed)
    }

    /// Terminal status once no group is running: failed if any group failed
    pub fn settled_status(&self) -> JobStatus {
        if self
            .active_runs
            .values()
            .any(|group| group.status == GroupStatus::Failed)
        {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        }
    }
}

impl RunGroup {
    /// Stored pid, if it is a usable process id
    pub fn pid(&self) -> Option<u32> {
        parse_pid(&self.pid)
    }
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Saved => "saved",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "saved" => Some(JobStatus::Saved),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "stopped" => Some(JobStatus::Stopped),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Running => "running",
            GroupStatus::Completed => "completed",
            GroupStatus::Failed => "failed",
            GroupStatus::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(run_id: &str, ordinal: u32, pid: &str) -> RunGroup {
        RunGroup {
            pid: pid.to_string(),
            log_path: format!("/jobs/demo/runs/{run_id}/g{ordinal}/run.log"),
            tags: vec![format!("tag{ordinal}")],
            hosts: String::new(),
            label: format!("Group {ordinal}"),
            status: GroupStatus::Running,
            workflow: "quickqc".to_string(),
            run_id: run_id.to_string(),
            ordinal,
            started_at: None,
        }
    }

    fn job() -> Job {
        Job::new("demo_20250101_000000_abcdef", "Demo", "quickqc", Utc::now())
    }

    #[test]
    fn test_parse_pid_rejects_unsafe_values() {
        assert_eq!(parse_pid("1234"), Some(1234));
        assert_eq!(parse_pid(" 42 "), Some(42));
        assert_eq!(parse_pid("0"), None);
        assert_eq!(parse_pid("-1"), None);
        assert_eq!(parse_pid(""), None);
        assert_eq!(parse_pid("abc"), None);
        assert_eq!(parse_pid("4294967295"), None);
    }

    #[test]
    fn test_document_uses_camel_case_keys() {
        let mut job = job();
        job.active_runs.insert("g1".to_string(), group("r1", 0, "10"));
        let value = serde_json::to_value(&job).unwrap();

        assert!(value.get("jobId").is_some());
        assert!(value.get("activeRuns").is_some());
        assert!(value.get("lastPid").is_some());
        assert_eq!(value["status"], "saved");
        assert_eq!(value["activeRuns"]["g1"]["logPath"], job.active_runs["g1"].log_path);
        assert_eq!(value["activeRuns"]["g1"]["status"], "running");
    }

    #[test]
    fn test_legacy_document_without_groups_deserializes() {
        let raw = r#"{
            "jobId": "old_job",
            "jobName": "Old",
            "workflow": "configbuild",
            "status": "running",
            "createdAt": "2024-05-01T10:00:00Z",
            "lastPid": "4321",
            "lastLogPath": "/jobs/old_job/runs/20240501_100000/run.log",
            "lastRunTags": ["powerup"]
        }"#;
        let job: Job = serde_json::from_str(raw).unwrap();
        assert!(job.active_runs.is_empty());
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.last_pid, "4321");
    }

    #[test]
    fn test_adopt_legacy_run() {
        let mut job = job();
        job.status = JobStatus::Running;
        job.last_pid = "999".to_string();
        job.last_log_path = "/tmp/run.log".to_string();
        job.last_run_tags = vec!["lldp".to_string()];

        assert!(job.adopt_legacy_run());
        let adopted = &job.active_runs[LEGACY_GROUP_ID];
        assert_eq!(adopted.pid(), Some(999));
        assert_eq!(adopted.log_path, "/tmp/run.log");
        assert_eq!(adopted.tags, vec!["lldp".to_string()]);

        // Second call is a no-op
        assert!(!job.adopt_legacy_run());
    }

    #[test]
    fn test_adopt_legacy_run_ignores_idle_jobs() {
        let mut job = job();
        job.last_pid = "999".to_string();
        assert!(!job.adopt_legacy_run());

        job.status = JobStatus::Running;
        job.last_pid.clear();
        assert!(!job.adopt_legacy_run());
    }

    #[test]
    fn test_mirror_follows_first_group_of_latest_run() {
        let mut job = job();
        job.active_runs.insert("old".to_string(), group("r1", 0, "11"));
        job.active_runs.insert("b".to_string(), group("r2", 1, "22"));
        job.active_runs.insert("a".to_string(), group("r2", 0, "21"));
        job.last_run_id = "r2".to_string();
        job.status = JobStatus::Running;

        job.refresh_legacy_mirror();
        assert_eq!(job.last_pid, "21");
        assert_eq!(job.last_run_tags, vec!["tag0".to_string()]);
        assert_eq!(job.last_log_path, job.active_runs["a"].log_path);
    }

    #[test]
    fn test_mirror_clears_pid_without_groups_when_idle() {
        let mut job = job();
        job.last_pid = "77".to_string();
        job.status = JobStatus::Completed;
        job.refresh_legacy_mirror();
        assert!(job.last_pid.is_empty());
    }

    #[test]
    fn test_unique_group_id_suffixes_collisions() {
        let mut job = job();
        assert_eq!(job.unique_group_id("g1", "r2"), "g1");

        job.active_runs.insert("g1".to_string(), group("r1", 0, "1"));
        assert_eq!(job.unique_group_id("g1", "r2"), "g1_r2");

        job.active_runs.insert("g1_r2".to_string(), group("r2", 0, "2"));
        assert_eq!(job.unique_group_id("g1", "r2"), "g1_r2_2");
    }

    #[test]
    fn test_settled_status() {
        let mut job = job();
        let mut done = group("r1", 0, "");
        done.status = GroupStatus::Completed;
        job.active_runs.insert("a".to_string(), done.clone());
        assert_eq!(job.settled_status(), JobStatus::Completed);

        done.status = GroupStatus::Failed;
        job.active_runs.insert("b".to_string(), done);
        assert_eq!(job.settled_status(), JobStatus::Failed);
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            JobStatus::Saved,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Stopped,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("queued"), None);
    }
}
