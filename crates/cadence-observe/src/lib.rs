//! Observability for Cadence: subscriber setup and optional OpenTelemetry
//! span export.

pub mod tracing_setup;

pub use tracing_setup::{LogFormat, TracingOptions, init_tracing, shutdown_tracing};
