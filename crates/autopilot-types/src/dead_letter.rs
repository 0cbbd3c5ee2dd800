//! Dead-letter records: the audit trail of workflows that could not progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::failure::FailureClass;
use crate::workflow::{RequeueStrategy, StepResult, WorkflowTemplate};

/// One failed attempt captured in a dead-letter record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorHistoryEntry {
    pub at: DateTime<Utc>,
    pub step_name: String,
    pub attempt: u32,
    pub failure_class: FailureClass,
    pub error: String,
}

/// Operator requeue request appended to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequeueEntry {
    pub actor: String,
    pub at: DateTime<Utc>,
    pub reason: String,
    pub strategy: RequeueStrategy,
}

/// Immutable snapshot of a workflow at the moment it was dead-lettered.
///
/// Only `requeue_history` grows after creation. Records are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// UUIDv7.
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub org_id: String,
    pub template: WorkflowTemplate,
    /// Step that could not progress.
    pub failed_step: String,
    pub final_failure_class: FailureClass,
    pub original_input_hash: String,
    /// Complete ordered step state, as stored at failure time.
    pub step_history: Vec<StepResult>,
    /// Every failed attempt, oldest first.
    pub error_history: Vec<ErrorHistoryEntry>,
    #[serde(default)]
    pub requeue_history: Vec<RequeueEntry>,
    pub created_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn requeue_count(&self) -> usize {
        self.requeue_history.len()
    }

    pub fn last_requeue(&self) -> Option<&RequeueEntry> {
        self.requeue_history.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::StepStatus;

    #[test]
    fn test_record_serde_defaults_requeue_history() {
        let record = DeadLetterRecord {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            org_id: "org_acme".to_string(),
            template: WorkflowTemplate::Memo,
            failed_step: "draft_memo".to_string(),
            final_failure_class: FailureClass::MalformedResponse,
            original_input_hash: "deadbeef".to_string(),
            step_history: vec![StepResult::pending("collect_kpis")],
            error_history: vec![],
            requeue_history: vec![],
            created_at: Utc::now(),
        };

        let mut value = serde_json::to_value(&record).unwrap();
        value.as_object_mut().unwrap().remove("requeue_history");
        let parsed: DeadLetterRecord = serde_json::from_value(value).unwrap();
        assert!(parsed.requeue_history.is_empty());
        assert_eq!(parsed.final_failure_class, FailureClass::MalformedResponse);
        assert_eq!(parsed.step_history[0].status, StepStatus::Pending);
        assert_eq!(parsed.requeue_count(), 0);
        assert!(parsed.last_requeue().is_none());
    }
}
