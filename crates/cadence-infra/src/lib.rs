//! Infrastructure implementations for Cadence.
//!
//! Adapters for the ports defined in `cadence-core`: the file-backed state
//! store (with best-effort git commits), project configuration loading,
//! filesystem personas, the JSONL escalation queue, command-line model
//! clients and file-based template rendering.

pub mod config;
pub mod escalation;
pub mod filesystem;
pub mod model;
pub mod persona;
pub mod state;
pub mod template;
