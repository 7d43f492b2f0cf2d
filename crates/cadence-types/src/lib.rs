//! Shared domain types for Cadence.
//!
//! This crate contains the data model of the orchestration kernel: workflow
//! steps and directives, runs and checkpoints, agent tasks and activity
//! records, the error taxonomy, escalation records, configuration and kernel
//! events.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod agent;
pub mod config;
pub mod error;
pub mod escalation;
pub mod event;
pub mod state;
pub mod variables;
pub mod workflow;
