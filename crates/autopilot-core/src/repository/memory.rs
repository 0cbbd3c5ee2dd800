//! In-process store implementations.
//!
//! Both stores keep their state behind a `std::sync::Mutex` that is never
//! held across an await point. They follow the same contracts as the SQLite
//! stores in autopilot-infra, including success-wins step writes and the
//! audit event appended by every state write.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use autopilot_types::dead_letter::{DeadLetterRecord, RequeueEntry};
use autopilot_types::error::RepositoryError;
use autopilot_types::event::AuditEvent;
use autopilot_types::workflow::{
    AttemptRecord, ExecutionFlags, StepResult, StepStatus, Workflow, WorkflowStatus,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::SortOrder;
use super::dead_letter::DeadLetterStore;
use super::workflow::{RunFilter, WorkflowStore};
use crate::event::audit;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, RepositoryError> {
    mutex
        .lock()
        .map_err(|_| RepositoryError::Query("store lock poisoned".to_string()))
}

// ---------------------------------------------------------------------------
// InMemoryWorkflowStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct WorkflowTables {
    workflows: HashMap<Uuid, Workflow>,
    attempts: Vec<AttemptRecord>,
    events: Vec<AuditEvent>,
}

/// Volatile [`WorkflowStore`].
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    tables: Mutex<WorkflowTables>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowStore for InMemoryWorkflowStore {
    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let mut tables = lock(&self.tables)?;
        if tables.workflows.contains_key(&workflow.id) {
            return Err(RepositoryError::Conflict(format!(
                "workflow {} already exists",
                workflow.id
            )));
        }
        tables
            .workflows
            .insert(workflow.id, workflow.clone());
        tables.events.push(audit::workflow_transition(
            &workflow.org_id,
            workflow.id,
            workflow.status,
        ));
        Ok(())
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        Ok(lock(&self.tables)?.workflows.get(id).cloned())
    }

    async fn update_status(
        &self,
        id: &Uuid,
        status: WorkflowStatus,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tables = lock(&self.tables)?;
        let workflow = tables
            .workflows
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;

        workflow.status = status;
        match status {
            WorkflowStatus::Running => {
                workflow.started_at.get_or_insert(at);
                workflow.finished_at = None;
            }
            WorkflowStatus::Queued => workflow.finished_at = None,
            _ => workflow.finished_at = Some(at),
        }
        let event = audit::workflow_transition(&workflow.org_id, *id, status);
        tables.events.push(event);
        Ok(())
    }

    async fn update_flags(&self, id: &Uuid, flags: ExecutionFlags) -> Result<(), RepositoryError> {
        let mut tables = lock(&self.tables)?;
        let workflow = tables
            .workflows
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        workflow.flags = flags;
        Ok(())
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Workflow>, RepositoryError> {
        let tables = lock(&self.tables)?;
        let mut runs: Vec<Workflow> = tables
            .workflows
            .values()
            .filter(|w| filter.org_id.as_deref().is_none_or(|org| w.org_id == org))
            .filter(|w| filter.status.is_none_or(|s| w.status == s))
            .cloned()
            .collect();

        // UUIDv7 ids break ties between equal timestamps in creation order.
        runs.sort_by_key(|w| (w.created_at, w.id));
        if filter.sort_order == SortOrder::Desc {
            runs.reverse();
        }
        if let Some(limit) = filter.limit {
            runs.truncate(limit.max(0) as usize);
        }
        Ok(runs)
    }

    async fn list_by_org_and_date_range(
        &self,
        org_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let tables = lock(&self.tables)?;
        let mut runs: Vec<Workflow> = tables
            .workflows
            .values()
            .filter(|w| w.org_id == org_id && w.created_at >= from && w.created_at <= to)
            .cloned()
            .collect();
        runs.sort_by_key(|w| (w.created_at, w.id));
        Ok(runs)
    }

    async fn list_by_status(
        &self,
        org_id: Option<&str>,
        status: WorkflowStatus,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let tables = lock(&self.tables)?;
        let mut runs: Vec<Workflow> = tables
            .workflows
            .values()
            .filter(|w| w.status == status && org_id.is_none_or(|org| w.org_id == org))
            .cloned()
            .collect();
        runs.sort_by_key(|w| (w.created_at, w.id));
        Ok(runs)
    }

    async fn upsert_step(
        &self,
        workflow_id: &Uuid,
        result: &StepResult,
    ) -> Result<StepResult, RepositoryError> {
        let mut tables = lock(&self.tables)?;
        let workflow = tables
            .workflows
            .get_mut(workflow_id)
            .ok_or(RepositoryError::NotFound)?;
        let org_id = workflow.org_id.clone();
        let slot = workflow
            .results
            .iter_mut()
            .find(|r| r.step_name == result.step_name)
            .ok_or(RepositoryError::NotFound)?;

        if slot.is_success() {
            return Ok(slot.clone());
        }
        *slot = result.clone();
        let stored = slot.clone();
        tables
            .events
            .push(audit::step_transition(&org_id, *workflow_id, &stored));
        Ok(stored)
    }

    async fn reset_step(&self, workflow_id: &Uuid, step_name: &str) -> Result<bool, RepositoryError> {
        let mut tables = lock(&self.tables)?;
        let workflow = tables
            .workflows
            .get_mut(workflow_id)
            .ok_or(RepositoryError::NotFound)?;
        let org_id = workflow.org_id.clone();
        let slot = workflow
            .results
            .iter_mut()
            .find(|r| r.step_name == step_name)
            .ok_or(RepositoryError::NotFound)?;

        if slot.status == StepStatus::Success {
            return Ok(false);
        }
        *slot = StepResult::pending(step_name);
        let event = audit::step_transition(&org_id, *workflow_id, slot);
        tables.events.push(event);
        Ok(true)
    }

    async fn record_attempt(&self, attempt: &AttemptRecord) -> Result<(), RepositoryError> {
        lock(&self.tables)?.attempts.push(attempt.clone());
        Ok(())
    }

    async fn list_attempts(&self, workflow_id: &Uuid) -> Result<Vec<AttemptRecord>, RepositoryError> {
        Ok(lock(&self.tables)?
            .attempts
            .iter()
            .filter(|a| a.workflow_id == *workflow_id)
            .cloned()
            .collect())
    }

    async fn append_audit_event(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        lock(&self.tables)?.events.push(event.clone());
        Ok(())
    }

    async fn list_audit_events(&self, workflow_id: &Uuid) -> Result<Vec<AuditEvent>, RepositoryError> {
        Ok(lock(&self.tables)?
            .events
            .iter()
            .filter(|e| e.workflow_id == *workflow_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// InMemoryDeadLetterStore
// ---------------------------------------------------------------------------

/// Volatile [`DeadLetterStore`]. Insertion order is kept for stable listing.
#[derive(Default)]
pub struct InMemoryDeadLetterStore {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn insert(&self, record: &DeadLetterRecord) -> Result<(), RepositoryError> {
        let mut records = lock(&self.records)?;
        if records.iter().any(|r| r.id == record.id) {
            return Err(RepositoryError::Conflict(format!(
                "dead-letter record {} already exists",
                record.id
            )));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<DeadLetterRecord>, RepositoryError> {
        Ok(lock(&self.records)?.iter().find(|r| r.id == *id).cloned())
    }

    async fn latest_for_workflow(
        &self,
        workflow_id: &Uuid,
    ) -> Result<Option<DeadLetterRecord>, RepositoryError> {
        Ok(lock(&self.records)?
            .iter()
            .filter(|r| r.workflow_id == *workflow_id)
            .max_by_key(|r| (r.created_at, r.id))
            .cloned())
    }

    async fn append_requeue(&self, id: &Uuid, entry: &RequeueEntry) -> Result<(), RepositoryError> {
        let mut records = lock(&self.records)?;
        let record = records
            .iter_mut()
            .find(|r| r.id == *id)
            .ok_or(RepositoryError::NotFound)?;
        record.requeue_history.push(entry.clone());
        Ok(())
    }

    async fn search(
        &self,
        org_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<DeadLetterRecord>, RepositoryError> {
        let mut found: Vec<DeadLetterRecord> = lock(&self.records)?
            .iter()
            .filter(|r| r.org_id == org_id)
            .filter(|r| from.is_none_or(|f| r.created_at >= f))
            .filter(|r| to.is_none_or(|t| r.created_at <= t))
            .cloned()
            .collect();
        found.sort_by_key(|r| std::cmp::Reverse((r.created_at, r.id)));
        Ok(found)
    }

    async fn count(&self, org_id: Option<&str>) -> Result<u64, RepositoryError> {
        Ok(lock(&self.records)?
            .iter()
            .filter(|r| org_id.is_none_or(|org| r.org_id == org))
            .count() as u64)
    }
}
