//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (autopilot-infra) implements. The core crate never depends on any
//! specific storage technology. [`memory`] holds in-process implementations
//! used by tests and by callers that do not need durability.

pub mod dead_letter;
pub mod memory;
pub mod workflow;

/// Sort order for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}
