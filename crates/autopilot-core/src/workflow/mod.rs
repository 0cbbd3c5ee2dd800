//! Workflow execution engine.
//!
//! Leaves first: [`classifier`] and [`retry`] decide what a failed attempt
//! means, [`executor`] runs one step through the gate and tool with retries,
//! [`resume`] picks the next step from stored state, [`admission`] bounds
//! per-org concurrency, [`dead_letter`] captures exhausted workflows, and
//! [`orchestrator`] composes all of them.

pub mod admission;
pub mod classifier;
pub mod context;
pub mod dead_letter;
pub mod executor;
pub mod gate;
pub mod idempotency;
pub mod orchestrator;
pub mod recovery;
pub mod resume;
pub mod retry;
pub mod sanitize;
pub mod template;
pub mod tool;
