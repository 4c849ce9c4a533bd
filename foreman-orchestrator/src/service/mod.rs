//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between the job store, the run gate and the OS.

pub mod error;
pub mod history;
pub mod job;
pub mod launch;
pub mod log;
pub mod reconcile;
pub mod stop;

// Re-export for convenience
pub use error::JobError;
pub use history as history_service;
pub use job as job_service;
pub use launch as launch_service;
pub use log as log_service;
pub use stop as stop_service;
