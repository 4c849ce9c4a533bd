//! Service error type

use crate::gate::GateError;
use crate::process::TerminateError;
use crate::workflow::ResolveError;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {0} not found")]
    NotFound(String),

    #[error("Group {group_id} not found in job {job_id}")]
    GroupNotFound { job_id: String, group_id: String },

    #[error("{0}")]
    Validation(String),

    /// Concurrency ceiling reached or gate busy; the caller may retry
    #[error("{0}")]
    Admission(String),

    #[error("{0}")]
    Execution(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    /// Short machine-readable kind used in API responses
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::NotFound(_) | JobError::GroupNotFound { .. } => "not_found",
            JobError::Validation(_) => "validation",
            JobError::Admission(_) => "admission",
            JobError::Execution(_) => "execution",
            JobError::Database(_) => "database",
            JobError::Io(_) => "io",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Admission(_))
    }
}

impl From<ResolveError> for JobError {
    fn from(err: ResolveError) -> Self {
        if err.is_validation() {
            JobError::Validation(err.to_string())
        } else {
            JobError::Execution(err.to_string())
        }
    }
}

impl From<TerminateError> for JobError {
    fn from(err: TerminateError) -> Self {
        JobError::Execution(err.to_string())
    }
}

impl From<GateError> for JobError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Timeout(waited) => JobError::Admission(format!(
                "System busy: waited {waited:?} for the run admission gate. Retry shortly."
            )),
            other => JobError::Execution(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_resolve_error_mapping() {
        let err: JobError = ResolveError::UnknownWorkflow("x".to_string()).into();
        assert!(matches!(err, JobError::Validation(_)));

        let err: JobError = ResolveError::InventoryMissing(PathBuf::from("/inv")).into();
        assert!(matches!(err, JobError::Execution(_)));
        assert!(err.to_string().contains("/inv"));
    }

    #[test]
    fn test_gate_timeout_is_retryable() {
        let err: JobError = GateError::Timeout(Duration::from_secs(15)).into();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "admission");
    }

    #[test]
    fn test_terminate_error_is_execution() {
        let err: JobError = TerminateError::Forceful {
            pid: 7,
            source: nix::errno::Errno::EPERM,
        }
        .into();
        assert_eq!(err.kind(), "execution");
        assert!(err.to_string().contains("SIGKILL"));
    }
}
