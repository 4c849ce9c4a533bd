//! Core domain types
//!
//! These types describe the persisted job document and the on-disk run
//! history. They are shared between the orchestrator (which owns and mutates
//! them) and the client/CLI (which only read them).

pub mod job;
pub mod outcome;
pub mod run;
pub mod tags;
