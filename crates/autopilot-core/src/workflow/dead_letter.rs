//! Dead-letter manager.
//!
//! Captures workflows that cannot progress as immutable records and guards
//! operator requeues. Re-admission itself is done by the orchestrator, which
//! calls [`DeadLetterManager::requeue`] to validate and audit the request
//! first.

use std::sync::Arc;

use autopilot_types::dead_letter::{DeadLetterRecord, ErrorHistoryEntry, RequeueEntry};
use autopilot_types::error::RepositoryError;
use autopilot_types::failure::FailureClass;
use autopilot_types::workflow::{AttemptRecord, RequeueStrategy, Workflow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::recovery::available_actions;
use super::sanitize::sanitize_error;
use crate::repository::dead_letter::DeadLetterStore;

#[derive(Debug, thiserror::Error)]
pub enum DeadLetterError {
    #[error("no dead-letter record for workflow {0}")]
    NotFound(Uuid),

    #[error("strategy '{strategy}' is not allowed: {reason}")]
    InvalidStrategy {
        strategy: RequeueStrategy,
        reason: String,
    },

    #[error("requeue requires a non-empty actor")]
    MissingActor,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct DeadLetterManager<D> {
    store: Arc<D>,
}

impl<D: DeadLetterStore> DeadLetterManager<D> {
    pub fn new(store: Arc<D>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &D {
        &self.store
    }

    /// Snapshot `workflow` as it is stored right now.
    ///
    /// `attempts` is the full attempt log; every failed attempt becomes an
    /// error history entry.
    pub async fn commit(
        &self,
        workflow: &Workflow,
        failed_step: &str,
        class: FailureClass,
        attempts: &[AttemptRecord],
    ) -> Result<DeadLetterRecord, DeadLetterError> {
        let error_history = attempts
            .iter()
            .filter_map(|a| {
                a.failure_class.map(|failure_class| ErrorHistoryEntry {
                    at: a.finished_at,
                    step_name: a.step_name.clone(),
                    attempt: a.attempt,
                    failure_class,
                    error: sanitize_error(a.error.as_deref().unwrap_or_default()),
                })
            })
            .collect();

        let record = DeadLetterRecord {
            id: Uuid::now_v7(),
            workflow_id: workflow.id,
            org_id: workflow.org_id.clone(),
            template: workflow.template,
            failed_step: failed_step.to_string(),
            final_failure_class: class,
            original_input_hash: workflow.input_hash.clone(),
            step_history: workflow.results.clone(),
            error_history,
            requeue_history: Vec::new(),
            created_at: Utc::now(),
        };
        self.store.insert(&record).await?;

        tracing::error!(
            workflow_id = %workflow.id,
            org_id = %workflow.org_id,
            step = %failed_step,
            class = %class,
            record_id = %record.id,
            "workflow dead-lettered"
        );
        Ok(record)
    }

    /// Validate and record an operator requeue against the latest record.
    ///
    /// `workflow` must be the stored workflow in `failed` status.
    pub async fn requeue(
        &self,
        workflow: &Workflow,
        actor: &str,
        strategy: RequeueStrategy,
        reason: &str,
    ) -> Result<DeadLetterRecord, DeadLetterError> {
        let actor = actor.trim();
        if actor.is_empty() {
            return Err(DeadLetterError::MissingActor);
        }

        let mut record = self
            .store
            .latest_for_workflow(&workflow.id)
            .await?
            .ok_or(DeadLetterError::NotFound(workflow.id))?;

        if !available_actions(workflow).contains(&strategy) {
            let reason = match strategy {
                RequeueStrategy::SkipAndContinue => format!(
                    "a later step depends on the output of '{}'",
                    record.failed_step
                ),
                _ => format!("workflow is {}", workflow.status),
            };
            return Err(DeadLetterError::InvalidStrategy { strategy, reason });
        }

        let entry = RequeueEntry {
            actor: actor.to_string(),
            at: Utc::now(),
            reason: reason.to_string(),
            strategy,
        };
        self.store.append_requeue(&record.id, &entry).await?;
        record.requeue_history.push(entry);

        tracing::info!(
            workflow_id = %workflow.id,
            record_id = %record.id,
            actor,
            strategy = %strategy,
            "dead-letter requeue recorded"
        );
        Ok(record)
    }

    pub async fn latest(&self, workflow_id: &Uuid) -> Result<Option<DeadLetterRecord>, DeadLetterError> {
        Ok(self.store.latest_for_workflow(workflow_id).await?)
    }

    /// Records of an org, newest first.
    pub async fn search(
        &self,
        org_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<DeadLetterRecord>, DeadLetterError> {
        Ok(self.store.search(org_id, from, to).await?)
    }
}
