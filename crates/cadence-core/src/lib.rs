//! Orchestration kernel logic and port traits for Cadence.
//!
//! This crate defines the "ports" (collaborator and storage traits) that the
//! infrastructure layer implements, plus the kernel itself: the error
//! classifier and retry executor, the state-store contract, the agent
//! dispatch pool and the workflow execution engine. It depends only on
//! `cadence-types` -- never on `cadence-infra` or any filesystem-bound crate.

pub mod agent;
pub mod error;
pub mod event;
pub mod state;
pub mod workflow;
