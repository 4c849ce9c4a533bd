//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::JobError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    /// Retryable back-pressure from the admission gate
    TooManyRequests(String),
    DatabaseError(sqlx::Error),
    InternalError { kind: &'static str, message: String },
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "validation",
            ApiError::TooManyRequests(_) => "admission",
            ApiError::DatabaseError(_) => "database",
            ApiError::InternalError { kind, .. } => *kind,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::TooManyRequests(msg) => {
                let body = serde_json::json!({
                    "error": msg,
                    "type": kind,
                    "retryable": true,
                });
                return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            }
            ApiError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::InternalError { message, .. } => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };

        (
            status,
            Json(serde_json::json!({ "error": message, "type": kind })),
        )
            .into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        let kind = err.kind();
        match err {
            JobError::NotFound(_) | JobError::GroupNotFound { .. } => {
                ApiError::NotFound(err.to_string())
            }
            JobError::Validation(msg) => ApiError::BadRequest(msg),
            JobError::Admission(msg) => ApiError::TooManyRequests(msg),
            JobError::Database(err) => ApiError::DatabaseError(err),
            JobError::Execution(_) | JobError::Io(_) => ApiError::InternalError {
                kind,
                message: err.to_string(),
            },
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
