//! Log tail DTOs

use serde::{Deserialize, Serialize};

use crate::domain::job::{GroupStatus, JobStatus};

/// Response of the log endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobLog {
    Overview(LogOverview),
    Chunk(LogChunk),
}

/// Per-group summary returned when a multi-group job is viewed without
/// selecting a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogOverview {
    pub status: JobStatus,
    pub groups: Vec<GroupLogInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupLogInfo {
    pub group_id: String,
    pub label: String,
    pub status: GroupStatus,
    pub log_size: u64,
    pub tags: Vec<String>,
    pub hosts: String,
}

/// A slice of one log file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogChunk {
    pub text: String,
    /// Byte offset to pass on the next poll
    pub offset: u64,
    pub size: u64,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_status: Option<GroupStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}
