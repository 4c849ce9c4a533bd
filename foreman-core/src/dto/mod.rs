//! Data Transfer Objects exchanged between the orchestrator API and its clients

pub mod job;
pub mod log;
pub mod run;
