//! Builders for the audit events every store write emits.
//!
//! Store implementations and the orchestrator both go through these
//! functions so persisted rows and bus events carry the same shape.

use autopilot_types::event::{AuditEvent, AuditEventKind};
use autopilot_types::workflow::{RequeueStrategy, StepResult, StepStatus, WorkflowStatus};
use uuid::Uuid;

/// `workflow_state_transition` for a step write.
pub fn step_transition(org_id: &str, workflow_id: Uuid, result: &StepResult) -> AuditEvent {
    let mut event = AuditEvent::transition(
        org_id,
        workflow_id,
        Some(&result.step_name),
        result.status.as_str(),
    )
    .with_timing(result.started_at, result.finished_at);

    if let Some(error) = &result.error {
        event = event.with_error_code(error.class.code());
        if result.status == StepStatus::Failed || result.status == StepStatus::Skipped {
            event = event.with_detail(error.message.clone());
        }
    }
    if !result.warnings.is_empty() {
        event = event.with_detail(result.warnings.join("; "));
    }
    event
}

/// `workflow_state_transition` for a workflow status change.
pub fn workflow_transition(org_id: &str, workflow_id: Uuid, status: WorkflowStatus) -> AuditEvent {
    AuditEvent::transition(org_id, workflow_id, None, status.as_str())
}

/// `workflow_requeued` for an operator requeue.
pub fn requeued(
    org_id: &str,
    workflow_id: Uuid,
    actor: &str,
    strategy: RequeueStrategy,
) -> AuditEvent {
    AuditEvent::new(
        AuditEventKind::WorkflowRequeued,
        org_id,
        workflow_id,
        None,
        strategy.to_string(),
    )
    .with_detail(format!("requeued by {actor}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_types::failure::FailureClass;
    use autopilot_types::workflow::StepError;

    #[test]
    fn test_failed_step_carries_error_code() {
        let mut result = StepResult::pending("detect_pii");
        result.status = StepStatus::Failed;
        result.error = Some(StepError {
            class: FailureClass::QuotaExceeded,
            message: "daily quota exhausted".to_string(),
        });

        let event = step_transition("org_a", Uuid::now_v7(), &result);
        assert_eq!(event.status, "failed");
        assert_eq!(event.step_id.as_deref(), Some("detect_pii"));
        assert_eq!(event.error_code.as_deref(), Some("QUOTA_EXCEEDED"));
        assert_eq!(event.detail.as_deref(), Some("daily quota exhausted"));
    }

    #[test]
    fn test_requeue_event_names_strategy() {
        let event = requeued("org_a", Uuid::now_v7(), "ops@acme", RequeueStrategy::Retry);
        assert_eq!(event.kind, AuditEventKind::WorkflowRequeued);
        assert_eq!(event.status, "retry");
        assert!(event.step_id.is_none());
    }
}
