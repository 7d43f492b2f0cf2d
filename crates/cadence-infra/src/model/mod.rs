//! Model client adapters.

pub mod command;

pub use command::{CommandClient, CommandClientFactory};
