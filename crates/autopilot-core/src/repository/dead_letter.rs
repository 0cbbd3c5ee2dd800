//! Dead-letter store trait definition.

use autopilot_types::dead_letter::{DeadLetterRecord, RequeueEntry};
use autopilot_types::error::RepositoryError;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Append-only persistence for dead-letter records.
///
/// Records are never deleted; only `requeue_history` grows after insert.
pub trait DeadLetterStore: Send + Sync {
    fn insert(
        &self,
        record: &DeadLetterRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<DeadLetterRecord>, RepositoryError>> + Send;

    /// Most recent record for a workflow (one exists per terminal episode).
    fn latest_for_workflow(
        &self,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<DeadLetterRecord>, RepositoryError>> + Send;

    /// Append a requeue entry. Returns `NotFound` for an unknown record.
    fn append_requeue(
        &self,
        id: &Uuid,
        entry: &RequeueEntry,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Records of one org created within the optional range, newest first.
    fn search(
        &self,
        org_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> impl std::future::Future<Output = Result<Vec<DeadLetterRecord>, RepositoryError>> + Send;

    /// Total records, optionally for one org.
    fn count(
        &self,
        org_id: Option<&str>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
