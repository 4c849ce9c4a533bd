//! Job Repository
//!
//! Durable job store. Each row holds one whole job document; writes replace
//! it entirely.

use chrono::{DateTime, SecondsFormat, Utc};
use foreman_core::domain::job::{Job, JobStatus};
use sqlx::SqlitePool;

/// Find a job by ID
pub async fn find_by_id(pool: &SqlitePool, job_id: &str) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>("SELECT job_id, data FROM jobs WHERE job_id = ?")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    row.map(|r| r.decode().map_err(|e| sqlx::Error::Decode(Box::new(e))))
        .transpose()
}

/// Insert or replace a job document
///
/// Returns once the write is committed.
pub async fn upsert(pool: &SqlitePool, job: &Job) -> Result<(), sqlx::Error> {
    let data = serde_json::to_string(job).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        r#"
        INSERT INTO jobs (job_id, job_name, workflow, status, created_at, updated_at, data)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(job_id) DO UPDATE SET
            job_name = excluded.job_name,
            workflow = excluded.workflow,
            status = excluded.status,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            data = excluded.data
        "#,
    )
    .bind(&job.job_id)
    .bind(&job.job_name)
    .bind(&job.workflow)
    .bind(job.status.as_str())
    .bind(timestamp(job.created_at))
    .bind(job.updated_at.map(timestamp))
    .bind(data)
    .execute(pool)
    .await?;

    Ok(())
}

/// List all jobs, newest first
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Job>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobRow>(
        "SELECT job_id, data FROM jobs ORDER BY created_at DESC, job_id ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(decode_rows(rows))
}

/// List jobs whose stored status is `status`, newest first
pub async fn list_by_status(pool: &SqlitePool, status: JobStatus) -> Result<Vec<Job>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobRow>(
        "SELECT job_id, data FROM jobs WHERE status = ? ORDER BY created_at DESC, job_id ASC",
    )
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    Ok(decode_rows(rows))
}

/// Delete a job by ID
pub async fn delete(pool: &SqlitePool, job_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM jobs WHERE job_id = ?")
        .bind(job_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_rows(rows: Vec<JobRow>) -> Vec<Job> {
    rows.into_iter()
        .filter_map(|row| match row.decode() {
            Ok(job) => Some(job),
            Err(e) => {
                tracing::warn!("Skipping job {} with unreadable document: {}", row.job_id, e);
                None
            }
        })
        .collect()
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    job_id: String,
    data: String,
}

impl JobRow {
    fn decode(&self) -> Result<Job, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}
