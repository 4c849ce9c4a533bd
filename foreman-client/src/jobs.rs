//! Job-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use foreman_core::domain::job::Job;
use foreman_core::dto::job::{CloneJob, CreateJob, UpdateJob};
use foreman_core::dto::log::JobLog;
use foreman_core::dto::run::{
    GroupSpec, RunHistory, RunJobRequest, RunLaunched, StopJobRequest, StopOutcome,
};

impl OrchestratorClient {
    // =============================================================================
    // Job Catalogue
    // =============================================================================

    /// Create a saved job
    pub async fn create_job(&self, req: CreateJob) -> Result<Job> {
        let response = self
            .client
            .post(self.url("/api/jobs"))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List all jobs, newest first
    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let response = self.client.get(self.url("/api/jobs")).send().await?;

        self.handle_response(response).await
    }

    /// Get a job by ID
    pub async fn get_job(&self, job_id: &str) -> Result<Job> {
        let url = self.url(&format!("/api/jobs/{}", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Update descriptive fields of a job
    pub async fn update_job(&self, job_id: &str, req: UpdateJob) -> Result<Job> {
        let url = self.url(&format!("/api/jobs/{}", job_id));
        let response = self.client.patch(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Copy a job into a new saved job
    pub async fn clone_job(&self, job_id: &str, overrides: CloneJob) -> Result<Job> {
        let url = self.url(&format!("/api/jobs/{}/clone", job_id));
        let response = self.client.post(&url).json(&overrides).send().await?;

        self.handle_response(response).await
    }

    /// Delete a job and its files
    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        let url = self.url(&format!("/api/jobs/{}", job_id));
        let response = self.client.delete(&url).send().await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Run Lifecycle
    // =============================================================================

    /// Start a run
    ///
    /// A request with two or more groups starts a multi-group run. A 429
    /// error (see [`crate::ClientError::is_retryable`]) means the run queue
    /// is full.
    pub async fn run_job(&self, job_id: &str, req: RunJobRequest) -> Result<RunLaunched> {
        let url = self.url(&format!("/api/jobs/{}/run", job_id));
        let response = self.client.post(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Start one group per spec in parallel
    pub async fn run_job_groups(&self, job_id: &str, groups: Vec<GroupSpec>) -> Result<RunLaunched> {
        self.run_job(
            job_id,
            RunJobRequest {
                groups,
                ..Default::default()
            },
        )
        .await
    }

    /// Stop one group, or every running group when `group_id` is `None`
    pub async fn stop_job(&self, job_id: &str, group_id: Option<&str>) -> Result<StopOutcome> {
        let url = self.url(&format!("/api/jobs/{}/stop", job_id));
        let req = StopJobRequest {
            group_id: group_id.map(str::to_string),
        };
        let response = self.client.post(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Logs and History
    // =============================================================================

    /// Read a job log from `offset`
    ///
    /// Pass the returned offset back in to follow a running log.
    pub async fn get_job_log(
        &self,
        job_id: &str,
        offset: u64,
        group_id: Option<&str>,
    ) -> Result<JobLog> {
        let url = self.url(&format!("/api/jobs/{}/log", job_id));
        let mut query = vec![("offset", offset.to_string())];
        if let Some(group_id) = group_id {
            query.push(("group", group_id.to_string()));
        }
        let response = self.client.get(&url).query(&query).send().await?;

        self.handle_response(response).await
    }

    /// List past runs of a job, newest first
    pub async fn list_runs(&self, job_id: &str) -> Result<RunHistory> {
        let url = self.url(&format!("/api/jobs/{}/runs", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Orchestrator health report
    pub async fn health(&self) -> Result<serde_json::Value> {
        let response = self.client.get(self.url("/health")).send().await?;

        self.handle_response(response).await
    }
}
