//! Foreman HTTP Client
//!
//! Thin async wrapper over the orchestrator's REST API. Every endpoint
//! method returns the typed body from `foreman-core`, and failed requests
//! surface as [`ClientError`] with the server's status code attached.
//!
//! ```no_run
//! use foreman_client::OrchestratorClient;
//! use foreman_core::dto::run::RunJobRequest;
//!
//! # async fn launch() -> foreman_client::Result<()> {
//! let client = OrchestratorClient::new("http://localhost:8080");
//! match client.run_job("rack_12_20250101_120000_a1b2c3", RunJobRequest::default()).await {
//!     Err(e) if e.is_retryable() => eprintln!("queue full, try again later"),
//!     other => println!("{:?}", other?),
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
mod jobs;

pub use error::{ClientError, Result};

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

/// Handle on one orchestrator; cheap to clone
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Scheme, host and port, never with a trailing slash
    base_url: String,
    client: Client,
}

impl OrchestratorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Uses a preconfigured `reqwest` client (timeouts, proxies, TLS)
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Decodes the JSON body of a successful response
    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Invalid response body: {}", e)))
    }

    /// For endpoints whose success carries nothing worth reading
    async fn handle_empty_response(&self, response: Response) -> Result<()> {
        check_status(response).await.map(drop)
    }
}

/// Turns a non-2xx response into a [`ClientError::ApiError`] built from the
/// orchestrator's error body
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::debug!("{} {} -> {}", status.as_u16(), status.canonical_reason().unwrap_or(""), body);
    Err(ClientError::api_error(status.as_u16(), body))
}
