//! On-disk run attempt metadata
//!
//! Every run attempt owns `runs/<run_id>/run_meta.json`, and each of its groups
//! owns `runs/<run_id>/<group_id>/run_meta.json` next to the group's `run.log`.
//! These documents are written once at launch and only read afterwards.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format of run ids; sorts lexically in time order
pub const RUN_ID_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Attempt-level metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMeta {
    pub run_id: String,
    pub workflow: String,
    #[serde(default)]
    pub server_class: String,
    /// Tags of a single-group run; empty for multi-group runs
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub groups: Vec<GroupRef>,
    pub started_at: DateTime<Utc>,
}

/// Group listing inside [`RunMeta`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRef {
    pub group_id: String,
    pub label: String,
}

/// Group-level metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMeta {
    pub group_id: String,
    pub label: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub hosts: String,
    pub workflow: String,
    #[serde(default)]
    pub server_class: String,
    /// Display form of the launched command
    #[serde(default)]
    pub command: String,
    pub started_at: DateTime<Utc>,
}

/// Base run id for an attempt started at `at`
pub fn run_id_at(at: DateTime<Utc>) -> String {
    at.format(RUN_ID_FORMAT).to_string()
}

/// Start time encoded in a run id, ignoring any `_N` dedupe suffix
pub fn run_id_timestamp(run_id: &str) -> Option<DateTime<Utc>> {
    let base = run_id.get(..15)?;
    NaiveDateTime::parse_from_str(base, RUN_ID_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
