//! Foreman Core
//!
//! Core types shared by the Foreman orchestrator, client and CLI.
//!
//! This crate contains:
//! - Domain types: jobs, run groups, run metadata, tag vocabulary
//! - DTOs: request/response bodies exchanged over the HTTP API

pub mod domain;
pub mod dto;
