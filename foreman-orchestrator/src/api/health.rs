//! Health Check API Handler
//!
//! Reports whether the job store and the data directory are usable.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::context::AppContext;

/// GET /health
/// Health check endpoint; 503 when degraded
pub async fn health_check(State(ctx): State<AppContext>) -> impl IntoResponse {
    let database = match sqlx::query("SELECT 1").execute(&ctx.pool).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!("Health check: database unreachable: {}", e);
            false
        }
    };
    let data_dir = ctx.config.data_dir.is_dir();

    let healthy = database && data_dir;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "ok" } else { "degraded" },
            "database": database,
            "dataDir": data_dir,
            "localProcesses": ctx.registry.len(),
        })),
    )
}
