//! Shared domain types for the Autopilot workflow engine.
//!
//! Workflows, their typed step payloads, failure classes, dead-letter records,
//! audit events and engine configuration. Used by every other crate in the
//! workspace.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod dead_letter;
pub mod error;
pub mod event;
pub mod failure;
pub mod payload;
pub mod workflow;
