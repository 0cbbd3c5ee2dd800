//! Audit events emitted by the engine.
//!
//! Every workflow or step state write produces a `workflow_state_transition`
//! event; every pre-flight gate evaluation produces a `security_gate_decision`
//! event. Events are append-only.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    WorkflowStateTransition,
    SecurityGateDecision,
    WorkflowRequeued,
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEventKind::WorkflowStateTransition => write!(f, "workflow_state_transition"),
            AuditEventKind::SecurityGateDecision => write!(f, "security_gate_decision"),
            AuditEventKind::WorkflowRequeued => write!(f, "workflow_requeued"),
        }
    }
}

/// A single audit sink entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub kind: AuditEventKind,
    pub org_id: String,
    pub workflow_id: Uuid,
    /// Step name, absent for workflow-level transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Workflow status, step status, or gate decision (`allow`/`rewrite`/`block`).
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Workflow- or step-level state transition.
    pub fn transition(
        org_id: &str,
        workflow_id: Uuid,
        step_id: Option<&str>,
        status: impl Into<String>,
    ) -> Self {
        Self::new(AuditEventKind::WorkflowStateTransition, org_id, workflow_id, step_id, status)
    }

    pub fn new(
        kind: AuditEventKind,
        org_id: &str,
        workflow_id: Uuid,
        step_id: Option<&str>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            org_id: org_id.to_string(),
            workflow_id,
            step_id: step_id.map(str::to_string),
            status: status.into(),
            error_code: None,
            started_at: None,
            finished_at: None,
            detail: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn with_timing(
        mut self,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.started_at = started_at;
        self.finished_at = finished_at;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
