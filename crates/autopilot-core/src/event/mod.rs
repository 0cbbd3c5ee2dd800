//! Audit event distribution.
//!
//! The [`bus::EventBus`] broadcasts [`autopilot_types::event::AuditEvent`]s to
//! live subscribers; [`audit`] builds the events so that stores and the
//! orchestrator emit identical shapes.

pub mod audit;
pub mod bus;
