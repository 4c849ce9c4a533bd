//! CLI configuration

use std::time::Duration;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the orchestrator service
    pub orchestrator_url: String,
    /// Delay between polls when following a log
    pub follow_interval: Duration,
}
