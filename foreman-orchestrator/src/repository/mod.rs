//! Repository Module
//!
//! Data access layer for the orchestrator.

pub mod job;

pub use job as job_repository;
