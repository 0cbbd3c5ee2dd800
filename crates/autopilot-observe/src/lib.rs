//! Observability setup for Autopilot: tracing subscriber initialization and
//! the structured field names shared by engine log lines.

pub mod fields;
pub mod tracing_setup;
