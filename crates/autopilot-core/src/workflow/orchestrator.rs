//! Workflow orchestrator.
//!
//! `Orchestrator` owns the workflow state machine. It admits workflows,
//! drives their steps through the resume engine and the step executor,
//! dead-letters terminal failures, releases slots and hands promoted
//! workflows back to the caller. It is the only component that writes a
//! workflow's status, and every transition goes through
//! [`Orchestrator::transition`].
//!
//! Storage faults surface as `Err`. A run interrupted by one stays
//! `running` in the store until [`Orchestrator::reap_stale`] records it.

use std::collections::BTreeMap;
use std::sync::Arc;

use autopilot_types::config::EngineConfig;
use autopilot_types::error::RepositoryError;
use autopilot_types::failure::FailureClass;
use autopilot_types::event::AuditEvent;
use autopilot_types::workflow::{
    AdmissionOutcome, ExecutionFlags, FailurePolicy, RecoveryReport, RequeueStrategy, StepError, StepResult,
    StepStatus, Workflow, WorkflowStatus, WorkflowTemplate,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::admission::{AdmissionController, AdmissionSnapshot};
use super::dead_letter::{DeadLetterError, DeadLetterManager};
use super::executor::{StepExecutor, StepRun};
use super::gate::PreflightGate;
use super::idempotency::content_hash;
use super::recovery::{available_actions, build_report};
use super::resume::ResumeEngine;
use super::retry::RetryPolicy;
use super::template::{build_steps, validate_steps};
use super::tool::ToolInterface;
use crate::event::audit;
use crate::event::bus::EventBus;
use crate::repository::dead_letter::DeadLetterStore;
use crate::repository::workflow::{RunFilter, WorkflowStore};
use crate::service::hash::ContentHasher;

// ---------------------------------------------------------------------------
// Errors and reports
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("workflow not found: {0}")]
    NotFound(Uuid),

    #[error("invalid workflow: {0}")]
    InvalidDefinition(String),

    #[error("workflow {workflow_id} cannot move from {from} to {to}")]
    InvalidTransition {
        workflow_id: Uuid,
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("workflow {workflow_id} is {status}, not running")]
    NotAdmitted {
        workflow_id: Uuid,
        status: WorkflowStatus,
    },

    #[error("workflow {workflow_id} is {status} and cannot be requeued")]
    NotRequeueable {
        workflow_id: Uuid,
        status: WorkflowStatus,
    },

    #[error(transparent)]
    DeadLetter(#[from] DeadLetterError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result of submitting or requeueing a workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub workflow_id: Uuid,
    pub org_id: String,
    pub admission: AdmissionOutcome,
}

impl Submission {
    pub fn is_running(&self) -> bool {
        self.admission == AdmissionOutcome::Running
    }
}

/// Outcome of driving one workflow until it stops.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub workflow_id: Uuid,
    pub org_id: String,
    pub template: WorkflowTemplate,
    pub status: WorkflowStatus,
    pub completed_steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryReport>,
    /// Workflow promoted into the slot this run released.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promoted: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancelOutcome {
    pub workflow_id: Uuid,
    pub status: WorkflowStatus,
    /// Set when cancelling freed a slot that nobody in this process will
    /// release; the caller must drive the promoted workflow.
    pub promoted: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReapReport {
    /// Dead-lettered with `TIMEOUT`.
    pub dead_lettered: Vec<Uuid>,
    /// Found with every step done and closed with their completion status.
    pub completed: Vec<Uuid>,
    pub promoted: Vec<Uuid>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<S, D, T, G> {
    store: Arc<S>,
    executor: Arc<StepExecutor<S, T, G>>,
    admission: Arc<AdmissionController>,
    dead_letters: Arc<DeadLetterManager<D>>,
    hasher: Arc<dyn ContentHasher>,
    bus: EventBus,
    /// Cancellation tokens of workflows driven by this process.
    tokens: Arc<DashMap<Uuid, CancellationToken>>,
    stale_after: chrono::Duration,
}

impl<S, D, T, G> Clone for Orchestrator<S, D, T, G> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            executor: self.executor.clone(),
            admission: self.admission.clone(),
            dead_letters: self.dead_letters.clone(),
            hasher: self.hasher.clone(),
            bus: self.bus.clone(),
            tokens: self.tokens.clone(),
            stale_after: self.stale_after,
        }
    }
}

impl<S, D, T, G> Orchestrator<S, D, T, G>
where
    S: WorkflowStore,
    D: DeadLetterStore,
    T: ToolInterface,
    G: PreflightGate,
{
    pub fn new(
        store: Arc<S>,
        dead_letter_store: Arc<D>,
        tool: Arc<T>,
        gate: Arc<G>,
        hasher: Arc<dyn ContentHasher>,
        config: &EngineConfig,
        bus: EventBus,
    ) -> Self {
        let executor = StepExecutor::new(
            store.clone(),
            tool,
            gate,
            hasher.clone(),
            RetryPolicy::from_config(config),
            config.step_timeout(),
            bus.clone(),
        );
        Self {
            store,
            executor: Arc::new(executor),
            admission: Arc::new(AdmissionController::new(config.concurrency_limit)),
            dead_letters: Arc::new(DeadLetterManager::new(dead_letter_store)),
            hasher,
            bus,
            tokens: Arc::new(DashMap::new()),
            stale_after: chrono::Duration::minutes(config.stale_run_minutes),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn dead_letters(&self) -> &DeadLetterManager<D> {
        &self.dead_letters
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.bus.subscribe()
    }

    async fn load(&self, workflow_id: Uuid) -> Result<Workflow, OrchestratorError> {
        self.store
            .get_workflow(&workflow_id)
            .await?
            .ok_or(OrchestratorError::NotFound(workflow_id))
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    /// Move `workflow` to `next`, persist it and emit the transition.
    ///
    /// The move is checked against the persisted status, so a cancel written
    /// by another caller is never overwritten.
    async fn transition(
        &self,
        workflow: &mut Workflow,
        next: WorkflowStatus,
    ) -> Result<(), OrchestratorError> {
        let from = self.load(workflow.id).await?.status;
        workflow.status = from;
        if !from.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                workflow_id: workflow.id,
                from,
                to: next,
            });
        }

        let now = Utc::now();
        self.store.update_status(&workflow.id, next, now).await?;
        workflow.status = next;
        match next {
            WorkflowStatus::Running => {
                workflow.started_at.get_or_insert(now);
                workflow.finished_at = None;
            }
            WorkflowStatus::Queued => workflow.finished_at = None,
            _ => workflow.finished_at = Some(now),
        }

        self.bus
            .publish(audit::workflow_transition(&workflow.org_id, workflow.id, next));
        if from != next {
            tracing::info!(
                workflow_id = %workflow.id,
                org_id = %workflow.org_id,
                from = %from,
                to = %next,
                "workflow transition"
            );
        }
        Ok(())
    }

    /// [`Self::transition`] that treats a workflow already cancelled in the
    /// store as a clean stop and yields `false`.
    async fn advance(
        &self,
        workflow: &mut Workflow,
        next: WorkflowStatus,
    ) -> Result<bool, OrchestratorError> {
        match self.transition(workflow, next).await {
            Ok(()) => Ok(true),
            Err(OrchestratorError::InvalidTransition {
                from: WorkflowStatus::Cancelled,
                ..
            }) => {
                tracing::info!(
                    workflow_id = %workflow.id,
                    to = %next,
                    "workflow was cancelled before the transition"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Ask admission for a slot; a granted slot moves the workflow to `running`.
    async fn admit(&self, workflow: &mut Workflow) -> Result<AdmissionOutcome, OrchestratorError> {
        let outcome = self.admission.admit(&workflow.org_id, workflow.id).await;
        if outcome == AdmissionOutcome::Running && workflow.status != WorkflowStatus::Running {
            self.transition(workflow, WorkflowStatus::Running).await?;
        }
        Ok(outcome)
    }

    /// Release the slot held by `workflow` and start the next queued one.
    ///
    /// A promoted workflow that is already `running` in the store keeps the
    /// slot. One that already finished (cancelled by another process) gives
    /// its slot straight back.
    async fn release_slot(&self, workflow: &Workflow) -> Result<Option<Uuid>, OrchestratorError> {
        let mut releasing = workflow.id;
        loop {
            let promoted = match self.admission.release(&workflow.org_id, releasing).await {
                Ok(promoted) => promoted,
                Err(e) => {
                    tracing::warn!(workflow_id = %releasing, error = %e, "slot release skipped");
                    return Ok(None);
                }
            };
            let Some(next) = promoted else {
                return Ok(None);
            };

            let mut candidate = self.load(next).await?;
            match candidate.status {
                WorkflowStatus::Queued => {
                    if self.advance(&mut candidate, WorkflowStatus::Running).await? {
                        return Ok(Some(next));
                    }
                }
                // Started by another process, which also drives it.
                WorkflowStatus::Running => {
                    tracing::debug!(
                        workflow_id = %next,
                        "promoted workflow is already running"
                    );
                    return Ok(None);
                }
                _ => {}
            }
            tracing::debug!(
                workflow_id = %next,
                status = %candidate.status,
                "promoted workflow is no longer queued"
            );
            releasing = next;
        }
    }

    // -----------------------------------------------------------------------
    // Submission and execution
    // -----------------------------------------------------------------------

    /// Create a workflow for `template` and pass it through admission.
    pub async fn submit(
        &self,
        org_id: &str,
        template: WorkflowTemplate,
        flags: ExecutionFlags,
    ) -> Result<Submission, OrchestratorError> {
        let org_id = org_id.trim();
        if org_id.is_empty() {
            return Err(OrchestratorError::InvalidDefinition(
                "org_id must not be empty".to_string(),
            ));
        }

        let steps = build_steps(template, org_id);
        validate_steps(&steps).map_err(OrchestratorError::InvalidDefinition)?;
        let inputs: Vec<_> = steps.iter().map(|s| &s.input).collect();
        let input_hash =
            content_hash(self.hasher.as_ref(), &inputs).map_err(RepositoryError::from)?;

        let mut workflow = Workflow {
            id: Uuid::now_v7(),
            org_id: org_id.to_string(),
            template,
            status: WorkflowStatus::Queued,
            flags,
            input_hash,
            results: steps.iter().map(|s| StepResult::pending(&s.name)).collect(),
            steps,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        self.store.create_workflow(&workflow).await?;
        self.bus.publish(audit::workflow_transition(
            org_id,
            workflow.id,
            WorkflowStatus::Queued,
        ));

        let admission = self.admit(&mut workflow).await?;
        tracing::info!(
            workflow_id = %workflow.id,
            org_id,
            template = %template,
            admission = ?admission,
            "workflow submitted"
        );
        Ok(Submission {
            workflow_id: workflow.id,
            org_id: org_id.to_string(),
            admission,
        })
    }

    /// Drive an admitted workflow until it finishes, fails or is cancelled.
    ///
    /// Already finished workflows are reported without doing anything.
    pub async fn execute(&self, workflow_id: Uuid) -> Result<RunReport, OrchestratorError> {
        let mut workflow = self.load(workflow_id).await?;
        if workflow.status.is_finished() {
            return Ok(self.report(&workflow, None, None));
        }
        if workflow.status != WorkflowStatus::Running {
            return Err(OrchestratorError::NotAdmitted {
                workflow_id,
                status: workflow.status,
            });
        }

        let token = self.tokens.entry(workflow_id).or_default().clone();
        let driven = self.drive(&mut workflow, &token).await;
        self.tokens.remove(&workflow_id);
        let dead_letter_id = match driven {
            Ok(dead_letter_id) => dead_letter_id,
            Err(e) => {
                self.release_after_error(workflow_id).await;
                return Err(e);
            }
        };

        let promoted = self.release_slot(&workflow).await?;
        Ok(self.report(&workflow, dead_letter_id, promoted))
    }

    /// Give back the slot of a workflow whose drive ended in an error.
    ///
    /// Only a workflow that reached a final status releases. One still
    /// `running` keeps its slot until `reap_stale` reclaims it.
    async fn release_after_error(&self, workflow_id: Uuid) {
        let workflow = match self.store.get_workflow(&workflow_id).await {
            Ok(Some(workflow)) if workflow.status.is_finished() => workflow,
            Ok(_) => return,
            Err(e) => {
                tracing::warn!(workflow_id = %workflow_id, error = %e, "slot kept after drive error");
                return;
            }
        };
        match self.release_slot(&workflow).await {
            Ok(Some(promoted)) => tracing::info!(
                workflow_id = %workflow_id,
                promoted = %promoted,
                "promoted workflow waits for recovery to drive it"
            ),
            Ok(None) => {}
            Err(e) => tracing::warn!(
                workflow_id = %workflow_id,
                error = %e,
                "slot release failed after drive error"
            ),
        }
    }

    /// Step loop. Returns the dead-letter record id when one was committed.
    async fn drive(
        &self,
        workflow: &mut Workflow,
        token: &CancellationToken,
    ) -> Result<Option<Uuid>, OrchestratorError> {
        loop {
            // The store is the source of truth, including cancels written
            // by other processes.
            *workflow = self.load(workflow.id).await?;
            if workflow.status == WorkflowStatus::Cancelled {
                return Ok(None);
            }
            if token.is_cancelled() {
                self.advance(workflow, WorkflowStatus::Cancelled).await?;
                return Ok(None);
            }

            let Some(step) = ResumeEngine::next_step(workflow).cloned() else {
                let status =
                    ResumeEngine::completion_status(workflow).unwrap_or(WorkflowStatus::Success);
                self.advance(workflow, status).await?;
                return Ok(None);
            };
            let context = ResumeEngine::dependency_context(workflow, &step);

            let result = match self
                .executor
                .execute(workflow, &step, &context, token)
                .await?
            {
                StepRun::Cancelled => continue,
                StepRun::Reused(_) => continue,
                StepRun::Finished(result) => result,
            };

            if result.is_success() {
                if !self.advance(workflow, WorkflowStatus::Running).await? {
                    return Ok(None);
                }
                continue;
            }

            let class = result
                .error
                .as_ref()
                .map(|e| e.class)
                .unwrap_or(FailureClass::TransientError);
            let skippable = (step.on_failure == FailurePolicy::SkipAndContinue
                || workflow.flags.skip_on_error)
                && !workflow.has_dependents(&step.name);

            if skippable {
                let skipped = StepResult {
                    status: StepStatus::Skipped,
                    ..result
                };
                let stored = self.store.upsert_step(&workflow.id, &skipped).await?;
                self.bus
                    .publish(audit::step_transition(&workflow.org_id, workflow.id, &stored));
                tracing::warn!(
                    workflow_id = %workflow.id,
                    step = %step.name,
                    class = %class,
                    "step skipped after terminal failure"
                );
                continue;
            }

            let attempts = self.store.list_attempts(&workflow.id).await?;
            *workflow = self.load(workflow.id).await?;
            if workflow.status == WorkflowStatus::Cancelled {
                return Ok(None);
            }
            let record = self
                .dead_letters
                .commit(workflow, &step.name, class, &attempts)
                .await?;
            if !self.advance(workflow, WorkflowStatus::Failed).await? {
                // The record stays so the failure is not lost.
                tracing::warn!(
                    workflow_id = %workflow.id,
                    dead_letter_id = %record.id,
                    "workflow cancelled while dead-lettering"
                );
            }
            return Ok(Some(record.id));
        }
    }

    /// Drive `workflow_ids` concurrently, starting promoted workflows as
    /// slots free up. Returns one entry per workflow driven.
    pub async fn run_to_completion(
        &self,
        workflow_ids: impl IntoIterator<Item = Uuid>,
    ) -> Vec<Result<RunReport, OrchestratorError>>
    where
        S: 'static,
        D: 'static,
        T: 'static,
        G: 'static,
    {
        let mut set = JoinSet::new();
        for workflow_id in workflow_ids {
            let this = self.clone();
            set.spawn(async move { this.execute(workflow_id).await });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => {
                    if let Ok(report) = &outcome {
                        if let Some(next) = report.promoted {
                            let this = self.clone();
                            set.spawn(async move { this.execute(next).await });
                        }
                    }
                    results.push(outcome);
                }
                Err(e) => tracing::error!(error = %e, "workflow task panicked"),
            }
        }
        results
    }

    // -----------------------------------------------------------------------
    // Operator actions
    // -----------------------------------------------------------------------

    /// Cancel a queued or running workflow. Finished workflows are left as is.
    pub async fn cancel(&self, workflow_id: Uuid) -> Result<CancelOutcome, OrchestratorError> {
        let mut workflow = self.load(workflow_id).await?;
        let mut promoted = None;

        match workflow.status {
            WorkflowStatus::Queued => {
                self.admission
                    .cancel_queued(&workflow.org_id, workflow_id)
                    .await;
                self.transition(&mut workflow, WorkflowStatus::Cancelled).await?;
            }
            WorkflowStatus::Running => {
                self.transition(&mut workflow, WorkflowStatus::Cancelled).await?;
                let local = self.tokens.get(&workflow_id).map(|t| t.clone());
                match local {
                    // The driving task releases the slot when it stops.
                    Some(token) => token.cancel(),
                    None if self.admission.is_running(&workflow.org_id, workflow_id).await => {
                        promoted = self.release_slot(&workflow).await?;
                    }
                    // Slot held by another process; it releases on its own.
                    None => {}
                }
            }
            _ => {}
        }

        Ok(CancelOutcome {
            workflow_id,
            status: workflow.status,
            promoted,
        })
    }

    /// Cancel every queued, then every running workflow of an org.
    pub async fn cancel_all(&self, org_id: &str) -> Result<Vec<CancelOutcome>, OrchestratorError> {
        let mut outcomes = Vec::new();
        for status in [WorkflowStatus::Queued, WorkflowStatus::Running] {
            for workflow in self.store.list_by_status(Some(org_id), status).await? {
                outcomes.push(self.cancel(workflow.id).await?);
            }
        }
        Ok(outcomes)
    }

    /// Re-admit a `failed` or `partial_failure` workflow with `strategy`.
    ///
    /// Failed workflows go through the dead-letter manager, which validates
    /// the strategy and appends to the record's requeue history. Partially
    /// failed workflows have their skipped steps reset to `pending`.
    pub async fn requeue(
        &self,
        workflow_id: Uuid,
        actor: &str,
        strategy: RequeueStrategy,
        reason: &str,
    ) -> Result<Submission, OrchestratorError> {
        let mut workflow = self.load(workflow_id).await?;
        let mut flags = workflow.flags;

        match workflow.status {
            WorkflowStatus::Failed => {
                let record = self
                    .dead_letters
                    .requeue(&workflow, actor, strategy, reason)
                    .await?;
                if strategy == RequeueStrategy::SkipAndContinue {
                    if let Some(failed) = workflow.result(&record.failed_step).cloned() {
                        let skipped = StepResult {
                            status: StepStatus::Skipped,
                            finished_at: Some(Utc::now()),
                            error: failed.error.clone().or(Some(StepError {
                                class: record.final_failure_class,
                                message: "skipped by operator".to_string(),
                            })),
                            ..failed
                        };
                        self.store.upsert_step(&workflow.id, &skipped).await?;
                    }
                }
            }
            WorkflowStatus::PartialFailure => {
                if actor.trim().is_empty() {
                    return Err(DeadLetterError::MissingActor.into());
                }
                if !available_actions(&workflow).contains(&strategy) {
                    return Err(DeadLetterError::InvalidStrategy {
                        strategy,
                        reason: "skipped steps are already skipped".to_string(),
                    }
                    .into());
                }
                for result in workflow.results.iter().filter(|r| r.status == StepStatus::Skipped) {
                    self.store.reset_step(&workflow.id, &result.step_name).await?;
                }
            }
            status => {
                return Err(OrchestratorError::NotRequeueable {
                    workflow_id,
                    status,
                });
            }
        }

        if strategy == RequeueStrategy::RetryWithSampling {
            flags.sampling = true;
        }
        if flags != workflow.flags {
            self.store.update_flags(&workflow.id, flags).await?;
            workflow.flags = flags;
        }

        let event = audit::requeued(&workflow.org_id, workflow.id, actor.trim(), strategy)
            .with_detail(format!("requeued by {}: {reason}", actor.trim()));
        self.store.append_audit_event(&event).await?;
        self.bus.publish(event);

        self.transition(&mut workflow, WorkflowStatus::Queued).await?;
        let admission = self.admit(&mut workflow).await?;
        tracing::info!(
            workflow_id = %workflow.id,
            strategy = %strategy,
            admission = ?admission,
            "workflow requeued"
        );
        Ok(Submission {
            workflow_id,
            org_id: workflow.org_id.clone(),
            admission,
        })
    }

    /// Record every `running` workflow idle for longer than the stale
    /// threshold that this process is not driving.
    ///
    /// Runs whose steps all finished are closed with their completion
    /// status; the rest are dead-lettered with `TIMEOUT`.
    pub async fn reap_stale(&self, now: DateTime<Utc>) -> Result<ReapReport, OrchestratorError> {
        let cutoff = now - self.stale_after;
        let mut report = ReapReport::default();

        for mut workflow in self.store.list_by_status(None, WorkflowStatus::Running).await? {
            if self.tokens.contains_key(&workflow.id) || last_activity(&workflow) >= cutoff {
                continue;
            }
            tracing::warn!(
                workflow_id = %workflow.id,
                org_id = %workflow.org_id,
                last_activity = %last_activity(&workflow),
                "reaping stale workflow"
            );

            if let Some(status) = ResumeEngine::completion_status(&workflow) {
                if self.advance(&mut workflow, status).await? {
                    report.completed.push(workflow.id);
                }
            } else {
                let step_name = ResumeEngine::next_step(&workflow)
                    .map(|s| s.name.clone())
                    .unwrap_or_default();
                if let Some(current) = workflow.result(&step_name).cloned() {
                    let timed_out = StepResult {
                        status: StepStatus::Failed,
                        finished_at: Some(now),
                        error: Some(StepError {
                            class: FailureClass::Timeout,
                            message: format!(
                                "run idle for more than {} minutes",
                                self.stale_after.num_minutes()
                            ),
                        }),
                        ..current
                    };
                    self.store.upsert_step(&workflow.id, &timed_out).await?;
                }

                workflow = self.load(workflow.id).await?;
                let attempts = self.store.list_attempts(&workflow.id).await?;
                self.dead_letters
                    .commit(&workflow, &step_name, FailureClass::Timeout, &attempts)
                    .await?;
                self.advance(&mut workflow, WorkflowStatus::Failed).await?;
                report.dead_lettered.push(workflow.id);
            }

            if let Some(next) = self.release_slot(&workflow).await? {
                report.promoted.push(next);
            }
        }
        Ok(report)
    }

    /// Rebuild admission state from persisted `running` and `queued`
    /// workflows (oldest first) after a restart.
    pub async fn restore_admission(&self) -> Result<usize, OrchestratorError> {
        let mut by_org: BTreeMap<String, (Vec<Uuid>, Vec<Uuid>)> = BTreeMap::new();
        for workflow in self.store.list_by_status(None, WorkflowStatus::Running).await? {
            by_org.entry(workflow.org_id).or_default().0.push(workflow.id);
        }
        for workflow in self.store.list_by_status(None, WorkflowStatus::Queued).await? {
            by_org.entry(workflow.org_id).or_default().1.push(workflow.id);
        }

        let mut restored = 0;
        for (org_id, (running, queued)) in &by_org {
            self.admission.restore(org_id, running, queued).await;
            restored += running.len() + queued.len();
        }
        if restored > 0 {
            tracing::info!(restored, orgs = by_org.len(), "admission state restored");
        }
        Ok(restored)
    }

    /// IDs of persisted `running` workflows not driven by this process.
    pub async fn orphaned_runs(&self) -> Result<Vec<Uuid>, OrchestratorError> {
        Ok(self
            .store
            .list_by_status(None, WorkflowStatus::Running)
            .await?
            .into_iter()
            .map(|w| w.id)
            .filter(|id| !self.tokens.contains_key(id))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_workflow(&self, workflow_id: Uuid) -> Result<Workflow, OrchestratorError> {
        self.load(workflow_id).await
    }

    pub async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Workflow>, OrchestratorError> {
        Ok(self.store.list_runs(filter).await?)
    }

    pub async fn queue_snapshot(&self, org_id: &str) -> AdmissionSnapshot {
        self.admission.snapshot(org_id).await
    }

    pub async fn recovery_report(&self, workflow_id: Uuid) -> Result<RecoveryReport, OrchestratorError> {
        let workflow = self.load(workflow_id).await?;
        Ok(build_report(&workflow))
    }

    fn report(
        &self,
        workflow: &Workflow,
        dead_letter_id: Option<Uuid>,
        promoted: Option<Uuid>,
    ) -> RunReport {
        let recovery = matches!(
            workflow.status,
            WorkflowStatus::Failed | WorkflowStatus::PartialFailure
        )
        .then(|| build_report(workflow));
        RunReport {
            workflow_id: workflow.id,
            org_id: workflow.org_id.clone(),
            template: workflow.template,
            status: workflow.status,
            completed_steps: ResumeEngine::completed_steps(workflow),
            dead_letter_id,
            recovery,
            promoted,
        }
    }
}

/// Latest timestamp recorded on the workflow or any of its steps.
fn last_activity(workflow: &Workflow) -> DateTime<Utc> {
    workflow
        .results
        .iter()
        .flat_map(|r| [r.started_at, r.finished_at])
        .flatten()
        .chain(workflow.started_at)
        .fold(workflow.created_at, std::cmp::max)
}
