//! Workflow engine logic and storage trait definitions for Autopilot.
//!
//! This crate defines the "ports" (store, tool and gate traits) that the
//! infrastructure layer implements, and the engine built on top of them:
//! failure classification, retry policy, idempotent step execution, resume,
//! per-org admission control, dead-lettering and orchestration. It depends
//! only on `autopilot-types` -- never on `autopilot-infra` or any database/IO
//! crate.

pub mod event;
pub mod repository;
pub mod service;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;
