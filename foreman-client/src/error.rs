//! Error types for the Foreman client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when using the Foreman client
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
        /// Error kind reported by the API (`not_found`, `admission`, ...)
        kind: Option<String>,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl ClientError {
    /// Create an API error from status code and response body.
    ///
    /// JSON bodies of the form `{"error": ..., "type": ...}` are unpacked;
    /// anything else is kept verbatim.
    pub fn api_error(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let parsed = serde_json::from_str::<serde_json::Value>(&body).ok();

        let message = parsed
            .as_ref()
            .and_then(|v| v.get("error"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or(body);
        let kind = parsed
            .as_ref()
            .and_then(|v| v.get("type"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Self::ApiError {
            status,
            message,
            kind,
        }
    }

    /// HTTP status of an API error
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Check if the orchestrator asked the caller to retry later (run queue
    /// full or admission gate busy)
    pub fn is_retryable(&self) -> bool {
        self.status() == Some(429)
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(status) if (400..500).contains(&status))
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self.status(), Some(status) if status >= 500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_unpacks_json_body() {
        let err = ClientError::api_error(
            429,
            r#"{"error":"Run queue full","type":"admission","retryable":true}"#,
        );
        assert!(err.is_retryable());
        assert!(err.is_client_error());
        assert!(!err.is_not_found());
        match err {
            ClientError::ApiError { message, kind, .. } => {
                assert_eq!(message, "Run queue full");
                assert_eq!(kind.as_deref(), Some("admission"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_api_error_keeps_plain_body() {
        let err = ClientError::api_error(502, "Bad Gateway");
        assert!(err.is_server_error());
        assert!(err.to_string().contains("Bad Gateway"));
    }

    #[test]
    fn test_not_found() {
        let err = ClientError::api_error(404, r#"{"error":"Job x not found","type":"not_found"}"#);
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }
}
