//! Run state persistence contract.
//!
//! - `store` -- the `StateStore` trait, `StateError` and the `state.json` document
//! - `projection` -- phase summary and task status projections
//! - `narrative` -- `STATUS.md` rendering
//! - `memory` -- in-memory store

pub mod memory;
pub mod narrative;
pub mod projection;
pub mod store;

pub use memory::MemoryStateStore;
pub use narrative::render_status;
pub use projection::{phase_summary, task_status};
pub use store::{STATE_SCHEMA_VERSION, StateDocument, StateError, StateStore};
