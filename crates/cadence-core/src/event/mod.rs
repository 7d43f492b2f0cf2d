//! Kernel lifecycle events.

pub mod bus;

pub use bus::{DEFAULT_EVENT_CAPACITY, EventBus, RunEvents};
