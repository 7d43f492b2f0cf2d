//! State persistence adapters.

pub mod file_store;
pub mod git;

pub use file_store::{FileStateStore, STATE_FILE, STATUS_FILE};
pub use git::GitCommitter;
