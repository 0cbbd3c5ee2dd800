//! Workflow store trait definition.
//!
//! The workflow store is the single source of truth for workflow records,
//! step results, attempt logs and the audit trail. Implementations must make
//! each write atomic and must append a `workflow_state_transition` audit event
//! for every workflow status or step result write.

use autopilot_types::error::RepositoryError;
use autopilot_types::event::AuditEvent;
use autopilot_types::workflow::{
    AttemptRecord, ExecutionFlags, StepResult, Workflow, WorkflowStatus,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::SortOrder;

/// Filter criteria for listing workflow runs.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub org_id: Option<String>,
    pub status: Option<WorkflowStatus>,
    /// Sort direction on `created_at` (newest first by default).
    pub sort_order: SortOrder,
    pub limit: Option<i64>,
}

/// Repository trait for workflow persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowStore: Send + Sync {
    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    /// Persist a new workflow with its step definitions and initial results.
    ///
    /// Returns `Conflict` if the id already exists.
    fn create_workflow(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a workflow with its full ordered step history.
    fn get_workflow(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// Set the workflow status.
    ///
    /// `running` stamps `started_at` when unset, finished statuses stamp
    /// `finished_at`, and `queued` clears `finished_at`.
    fn update_status(
        &self,
        id: &Uuid,
        status: WorkflowStatus,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn update_flags(
        &self,
        id: &Uuid,
        flags: ExecutionFlags,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn list_runs(
        &self,
        filter: &RunFilter,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Workflows of one org created within `[from, to]`, oldest first.
    fn list_by_org_and_date_range(
        &self,
        org_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Workflows in `status`, oldest first, optionally restricted to one org.
    fn list_by_status(
        &self,
        org_id: Option<&str>,
        status: WorkflowStatus,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Write a step result, keyed by `(workflow_id, step_name)`.
    ///
    /// A stored `success` is never overwritten: the call is a no-op that
    /// returns the stored result. Any other stored state is replaced. The
    /// returned value is what the store now holds.
    fn upsert_step(
        &self,
        workflow_id: &Uuid,
        result: &StepResult,
    ) -> impl std::future::Future<Output = Result<StepResult, RepositoryError>> + Send;

    /// Reset a non-successful step back to `pending`.
    ///
    /// Returns `false` when the step is already `success`.
    fn reset_step(
        &self,
        workflow_id: &Uuid,
        step_name: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Attempts and audit
    // -----------------------------------------------------------------------

    fn record_attempt(
        &self,
        attempt: &AttemptRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Attempts of one workflow in execution order.
    fn list_attempts(
        &self,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<AttemptRecord>, RepositoryError>> + Send;

    /// Append an event that is not produced by a state write (gate
    /// decisions, requeues).
    fn append_audit_event(
        &self,
        event: &AuditEvent,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn list_audit_events(
        &self,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<AuditEvent>, RepositoryError>> + Send;
}
