//! Step executor: runs one step through the gate and the tool with retries.
//!
//! Every attempt is persisted as an `AttemptRecord`, and the final
//! `StepResult` is written through the store's success-wins upsert before the
//! executor returns. Expected failures come back as a failed `StepResult`;
//! `Err` is reserved for storage faults.

use std::sync::Arc;
use std::time::Duration;

use autopilot_types::error::RepositoryError;
use autopilot_types::event::{AuditEvent, AuditEventKind};
use autopilot_types::failure::FailureClass;
use autopilot_types::payload::StepOutput;
use autopilot_types::workflow::{
    AttemptOutcome, AttemptRecord, StepDefinition, StepError, StepResult, StepStatus, Workflow,
    WorkflowStatus,
};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::classifier::{AttemptResult, FailureClassifier, RawOutcome};
use super::context::StepContext;
use super::gate::{GateDecision, PreflightGate};
use super::idempotency::{content_hash, idempotency_key};
use super::retry::RetryPolicy;
use super::sanitize::sanitize_error;
use super::tool::{ToolInterface, ToolRequest};
use crate::event::audit;
use crate::event::bus::EventBus;
use crate::repository::workflow::WorkflowStore;
use crate::service::hash::ContentHasher;

// ---------------------------------------------------------------------------
// StepRun
// ---------------------------------------------------------------------------

/// How a call to [`StepExecutor::execute`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StepRun {
    /// The step ran (or was refused) and this result is now stored.
    Finished(StepResult),
    /// A stored success was reused; the tool was not invoked.
    Reused(StepResult),
    /// Cancellation was observed; the step is back to `pending`.
    Cancelled,
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

pub struct StepExecutor<S, T, G> {
    store: Arc<S>,
    tool: Arc<T>,
    gate: Arc<G>,
    hasher: Arc<dyn ContentHasher>,
    policy: RetryPolicy,
    step_timeout: Duration,
    bus: EventBus,
}

/// Values shared by every attempt of one step.
struct Invocation<'a> {
    workflow: &'a Workflow,
    step: &'a StepDefinition,
    key: &'a str,
    started_at: DateTime<Utc>,
}

impl<S, T, G> StepExecutor<S, T, G>
where
    S: WorkflowStore,
    T: ToolInterface,
    G: PreflightGate,
{
    pub fn new(
        store: Arc<S>,
        tool: Arc<T>,
        gate: Arc<G>,
        hasher: Arc<dyn ContentHasher>,
        policy: RetryPolicy,
        step_timeout: Duration,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            tool,
            gate,
            hasher,
            policy,
            step_timeout,
            bus,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `step` of `workflow` with the outputs of earlier steps.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        step: &StepDefinition,
        context: &StepContext,
        cancel: &CancellationToken,
    ) -> Result<StepRun, RepositoryError> {
        let key = idempotency_key(
            self.hasher.as_ref(),
            &workflow.org_id,
            workflow.id,
            &step.name,
            &step.input,
        )?;

        if let Some(stored) = workflow.result(&step.name).filter(|r| r.is_success()) {
            tracing::debug!(
                workflow_id = %workflow.id,
                step = %step.name,
                "reusing stored success"
            );
            return Ok(StepRun::Reused(stored.clone()));
        }

        if cancel.is_cancelled() {
            return Ok(StepRun::Cancelled);
        }

        let started_at = Utc::now();
        let running = StepResult {
            status: StepStatus::Running,
            started_at: Some(started_at),
            idempotency_key: Some(key.clone()),
            ..StepResult::pending(&step.name)
        };
        self.write(workflow, &running).await?;

        let invocation = Invocation {
            workflow,
            step,
            key: &key,
            started_at,
        };

        // Pre-flight gate runs before any tool invocation.
        let decision = self.gate.evaluate(&workflow.org_id, step).await;
        self.record_gate_decision(workflow, step, &decision).await?;
        let effective = match decision {
            GateDecision::Allow => step.clone(),
            GateDecision::Rewrite(rewritten) => StepDefinition {
                name: step.name.clone(),
                ..rewritten
            },
            GateDecision::Block { kind, reason } => {
                let result = self
                    .refuse(&invocation, kind.failure_class(), &reason)
                    .await?;
                return Ok(StepRun::Finished(result));
            }
        };

        if let Err(reason) = effective.input.validate() {
            let result = self
                .refuse(&invocation, FailureClass::ValidationFailed, &reason)
                .await?;
            return Ok(StepRun::Finished(result));
        }

        self.run_attempts(&invocation, &effective, context, cancel)
            .await
    }

    async fn run_attempts(
        &self,
        inv: &Invocation<'_>,
        effective: &StepDefinition,
        context: &StepContext,
        cancel: &CancellationToken,
    ) -> Result<StepRun, RepositoryError> {
        let workflow = inv.workflow;
        let limit = effective
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.step_timeout);
        let mut use_sampling = workflow.flags.sampling || effective.input.is_sampled();
        let mut retries: u32 = 0;
        let mut backoff = Duration::ZERO;

        loop {
            if cancel.is_cancelled() {
                return self.abandon(workflow, &inv.step.name).await;
            }

            let attempt = retries + 1;
            let input = if use_sampling {
                effective.input.sampled()
            } else {
                effective.input.clone()
            };
            let request = ToolRequest {
                org_id: workflow.org_id.clone(),
                workflow_id: workflow.id,
                step_name: inv.step.name.clone(),
                input,
                sampled: use_sampling,
                side_effecting: effective.side_effecting,
                idempotency_key: inv.key.to_string(),
                attempt,
                context: context.clone(),
            };

            tracing::debug!(
                workflow_id = %workflow.id,
                step = %inv.step.name,
                attempt,
                sampled = use_sampling,
                "invoking tool"
            );
            let attempt_started = Utc::now();
            let raw = match tokio::time::timeout(limit, self.tool.invoke(request)).await {
                Ok(outcome) => RawOutcome::Completed(outcome),
                Err(_) => RawOutcome::TimedOut(limit),
            };
            let result = FailureClassifier::classify(&effective.input, raw);
            let attempt_finished = Utc::now();

            let will_retry = matches!(result, AttemptResult::Retryable { .. })
                && self.policy.should_retry(retries);
            let outcome = match result.outcome() {
                AttemptOutcome::Retryable if !will_retry => AttemptOutcome::Terminal,
                other => other,
            };

            let mut record = AttemptRecord {
                workflow_id: workflow.id,
                step_name: inv.step.name.clone(),
                attempt,
                outcome,
                failure_class: result.class(),
                error: result.message().map(str::to_string),
                sampled: use_sampling,
                backoff_ms: backoff.as_millis() as u64,
                started_at: attempt_started,
                finished_at: attempt_finished,
            };

            // A late answer after cancellation is ignored, including a cancel
            // another process wrote to the store.
            if cancel.is_cancelled() || self.cancelled_in_store(workflow).await? {
                record.outcome = AttemptOutcome::Cancelled;
                self.store.record_attempt(&record).await?;
                return self.abandon(workflow, &inv.step.name).await;
            }
            self.store.record_attempt(&record).await?;

            match result {
                AttemptResult::Success { output, warnings } => {
                    for warning in &warnings {
                        tracing::warn!(
                            workflow_id = %workflow.id,
                            step = %inv.step.name,
                            warning = %warning,
                            "step returned partial results"
                        );
                    }
                    let stored = self.succeed(inv, output, warnings, retries).await?;
                    return Ok(StepRun::Finished(stored));
                }
                AttemptResult::Retryable { class, message } if will_retry => {
                    retries += 1;
                    backoff = self.policy.delay_for(retries);
                    if class == FailureClass::Timeout {
                        use_sampling = true;
                    }
                    tracing::warn!(
                        workflow_id = %workflow.id,
                        step = %inv.step.name,
                        attempt,
                        class = %class,
                        error = %message,
                        backoff_ms = backoff.as_millis() as u64,
                        sampled = use_sampling,
                        "retryable step failure"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
                AttemptResult::Retryable { class, message }
                | AttemptResult::Terminal { class, message } => {
                    let stored = self.fail(inv, class, message, retries).await?;
                    return Ok(StepRun::Finished(stored));
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Result writes
    // -----------------------------------------------------------------------

    async fn succeed(
        &self,
        inv: &Invocation<'_>,
        output: StepOutput,
        warnings: Vec<String>,
        retries: u32,
    ) -> Result<StepResult, RepositoryError> {
        let output_hash = content_hash(self.hasher.as_ref(), &output)?;
        let result = StepResult {
            step_name: inv.step.name.clone(),
            status: StepStatus::Success,
            output: Some(output),
            output_hash: Some(output_hash),
            started_at: Some(inv.started_at),
            finished_at: Some(Utc::now()),
            retry_count: retries,
            error: None,
            idempotency_key: Some(inv.key.to_string()),
            warnings,
        };
        let stored = self.write(inv.workflow, &result).await?;
        tracing::info!(
            workflow_id = %inv.workflow.id,
            step = %inv.step.name,
            retry_count = retries,
            "step succeeded"
        );
        Ok(stored)
    }

    async fn fail(
        &self,
        inv: &Invocation<'_>,
        class: FailureClass,
        message: String,
        retries: u32,
    ) -> Result<StepResult, RepositoryError> {
        let result = StepResult {
            step_name: inv.step.name.clone(),
            status: StepStatus::Failed,
            output: None,
            output_hash: None,
            started_at: Some(inv.started_at),
            finished_at: Some(Utc::now()),
            retry_count: retries,
            error: Some(StepError { class, message }),
            idempotency_key: Some(inv.key.to_string()),
            warnings: Vec::new(),
        };
        let stored = self.write(inv.workflow, &result).await?;
        tracing::info!(
            workflow_id = %inv.workflow.id,
            step = %inv.step.name,
            class = %class,
            retry_count = retries,
            "step failed"
        );
        Ok(stored)
    }

    /// Fail the step without invoking the tool (gate block or invalid input).
    async fn refuse(
        &self,
        inv: &Invocation<'_>,
        class: FailureClass,
        reason: &str,
    ) -> Result<StepResult, RepositoryError> {
        let message = sanitize_error(reason);
        let now = Utc::now();
        self.store
            .record_attempt(&AttemptRecord {
                workflow_id: inv.workflow.id,
                step_name: inv.step.name.clone(),
                attempt: 1,
                outcome: AttemptOutcome::Blocked,
                failure_class: Some(class),
                error: Some(message.clone()),
                sampled: false,
                backoff_ms: 0,
                started_at: now,
                finished_at: now,
            })
            .await?;
        self.fail(inv, class, message, 0).await
    }

    async fn cancelled_in_store(&self, workflow: &Workflow) -> Result<bool, RepositoryError> {
        Ok(self
            .store
            .get_workflow(&workflow.id)
            .await?
            .is_some_and(|stored| stored.status == WorkflowStatus::Cancelled))
    }

    async fn abandon(&self, workflow: &Workflow, step_name: &str) -> Result<StepRun, RepositoryError> {
        self.store.reset_step(&workflow.id, step_name).await?;
        self.bus.publish(audit::step_transition(
            &workflow.org_id,
            workflow.id,
            &StepResult::pending(step_name),
        ));
        tracing::info!(workflow_id = %workflow.id, step = %step_name, "step abandoned on cancel");
        Ok(StepRun::Cancelled)
    }

    async fn write(&self, workflow: &Workflow, result: &StepResult) -> Result<StepResult, RepositoryError> {
        let stored = self.store.upsert_step(&workflow.id, result).await?;
        self.bus
            .publish(audit::step_transition(&workflow.org_id, workflow.id, &stored));
        Ok(stored)
    }

    async fn record_gate_decision(
        &self,
        workflow: &Workflow,
        step: &StepDefinition,
        decision: &GateDecision,
    ) -> Result<(), RepositoryError> {
        let mut event = AuditEvent::new(
            AuditEventKind::SecurityGateDecision,
            &workflow.org_id,
            workflow.id,
            Some(&step.name),
            decision.label(),
        );
        match decision {
            GateDecision::Block { kind, reason } => {
                event = event
                    .with_error_code(kind.failure_class().code())
                    .with_detail(sanitize_error(reason));
            }
            GateDecision::Rewrite(rewritten) if rewritten.input.is_sampled() => {
                event = event.with_detail("rewritten to sampled request shape");
            }
            _ => {}
        }

        tracing::debug!(
            workflow_id = %workflow.id,
            step = %step.name,
            decision = %decision,
            "gate decision"
        );
        self.store.append_audit_event(&event).await?;
        self.bus.publish(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryWorkflowStore;
    use crate::testing::{Scripted, ScriptedGate, ScriptedTool, TestHasher, sample_workflow};
    use crate::workflow::gate::{AllowAllGate, BlockKind};
    use autopilot_types::payload::{SampleScope, StepInput};

    type TestExecutor<G> = StepExecutor<InMemoryWorkflowStore, ScriptedTool, G>;

    async fn setup<G: PreflightGate>(
        tool: ScriptedTool,
        gate: G,
    ) -> (TestExecutor<G>, Arc<InMemoryWorkflowStore>, Arc<ScriptedTool>, Workflow) {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let tool = Arc::new(tool);
        let workflow = sample_workflow("org_acme");
        store.create_workflow(&workflow).await.unwrap();
        let executor = StepExecutor::new(
            store.clone(),
            tool.clone(),
            Arc::new(gate),
            Arc::new(TestHasher),
            RetryPolicy::default(),
            Duration::from_secs(120),
            EventBus::new(64),
        );
        (executor, store, tool, workflow)
    }

    fn finished(run: StepRun) -> StepResult {
        match run {
            StepRun::Finished(result) => result,
            other => panic!("expected finished step, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_exhausts_budget_with_backoff() {
        let tool = ScriptedTool::new().fail("load_catalog", FailureClass::TransientError, 10);
        let (executor, store, tool, wf) = setup(tool, AllowAllGate).await;

        let result = finished(
            executor
                .execute(&wf, &wf.steps[0], &StepContext::new(), &CancellationToken::new())
                .await
                .unwrap(),
        );

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.retry_count, 3);
        assert_eq!(result.error.as_ref().unwrap().class, FailureClass::TransientError);

        let calls = tool.calls_for("load_catalog");
        assert_eq!(calls.len(), 4);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1].at - w[0].at).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(4),
                Duration::from_secs(16)
            ]
        );

        let attempts = store.list_attempts(&wf.id).await.unwrap();
        assert_eq!(attempts.len(), 4);
        assert_eq!(
            attempts.iter().map(|a| a.backoff_ms).collect::<Vec<_>>(),
            vec![0, 1000, 4000, 16000]
        );
        assert_eq!(attempts[2].outcome, AttemptOutcome::Retryable);
        assert_eq!(attempts[3].outcome, AttemptOutcome::Terminal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_class_is_attempted_once() {
        let tool = ScriptedTool::new().fail("load_catalog", FailureClass::PermissionDenied, 1);
        let (executor, store, tool, wf) = setup(tool, AllowAllGate).await;

        let result = finished(
            executor
                .execute(&wf, &wf.steps[0], &StepContext::new(), &CancellationToken::new())
                .await
                .unwrap(),
        );

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.retry_count, 0);
        assert_eq!(tool.calls_for("load_catalog").len(), 1);
        let stored = store.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(stored.step_status("load_catalog"), StepStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_retries_switch_to_sampling() {
        let tool = ScriptedTool::new().fail("load_catalog", FailureClass::Timeout, 2);
        let (executor, _store, tool, wf) = setup(tool, AllowAllGate).await;

        let result = finished(
            executor
                .execute(&wf, &wf.steps[0], &StepContext::new(), &CancellationToken::new())
                .await
                .unwrap(),
        );

        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.retry_count, 2);
        let sampled: Vec<bool> = tool.calls_for("load_catalog").iter().map(|c| c.sampled).collect();
        assert_eq!(sampled, vec![false, true, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_step_timeout_is_classified_as_timeout() {
        let tool = ScriptedTool::new().push(
            "load_catalog",
            Scripted::Sleep(Duration::from_secs(300)),
        );
        let (executor, store, _tool, wf) = setup(tool, AllowAllGate).await;

        let result = finished(
            executor
                .execute(&wf, &wf.steps[0], &StepContext::new(), &CancellationToken::new())
                .await
                .unwrap(),
        );

        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.retry_count, 1);
        let attempts = store.list_attempts(&wf.id).await.unwrap();
        assert_eq!(attempts[0].failure_class, Some(FailureClass::Timeout));
        assert_eq!(
            attempts[0].error.as_deref(),
            Some("step timed out after 120s")
        );
    }

    #[tokio::test]
    async fn test_partial_results_succeed_with_warning() {
        let tool = ScriptedTool::new().push("load_catalog", Scripted::Partial);
        let (executor, _store, _tool, wf) = setup(tool, AllowAllGate).await;

        let result = finished(
            executor
                .execute(&wf, &wf.steps[0], &StepContext::new(), &CancellationToken::new())
                .await
                .unwrap(),
        );
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].starts_with("PARTIAL_RESULTS"));
        assert!(result.output_hash.is_some());
    }

    #[tokio::test]
    async fn test_gate_block_never_invokes_tool() {
        let gate = ScriptedGate::block("store_artifact", BlockKind::Permission);
        let (executor, store, tool, wf) = setup(ScriptedTool::new(), gate).await;

        let result = finished(
            executor
                .execute(&wf, &wf.steps[2], &StepContext::new(), &CancellationToken::new())
                .await
                .unwrap(),
        );

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.unwrap().class, FailureClass::PermissionDenied);
        assert!(tool.calls_for("store_artifact").is_empty());

        let events = store.list_audit_events(&wf.id).await.unwrap();
        let gate_event = events
            .iter()
            .find(|e| e.kind == AuditEventKind::SecurityGateDecision)
            .unwrap();
        assert_eq!(gate_event.status, "block");
        assert_eq!(gate_event.error_code.as_deref(), Some("PERMISSION_DENIED"));

        let attempts = store.list_attempts(&wf.id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, AttemptOutcome::Blocked);
    }

    #[tokio::test]
    async fn test_gate_rewrite_changes_request_but_not_key() {
        let mut wf = sample_workflow("org_acme");
        wf.steps[0].input = StepInput::CollectKpis {
            window_days: 28,
            sample: SampleScope::Full,
        };
        wf.steps[0].name = "collect_kpis".to_string();
        wf.results[0] = StepResult::pending("collect_kpis");

        let store = Arc::new(InMemoryWorkflowStore::new());
        store.create_workflow(&wf).await.unwrap();
        let tool = Arc::new(ScriptedTool::new());
        let executor = StepExecutor::new(
            store.clone(),
            tool.clone(),
            Arc::new(ScriptedGate::sample("collect_kpis")),
            Arc::new(TestHasher),
            RetryPolicy::default(),
            Duration::from_secs(120),
            EventBus::new(64),
        );

        let result = finished(
            executor
                .execute(&wf, &wf.steps[0], &StepContext::new(), &CancellationToken::new())
                .await
                .unwrap(),
        );
        assert_eq!(result.status, StepStatus::Success);

        let call = &tool.calls_for("collect_kpis")[0];
        assert!(call.sampled);
        assert!(call.input.is_sampled());
        let expected_key =
            idempotency_key(&TestHasher, &wf.org_id, wf.id, "collect_kpis", &wf.steps[0].input)
                .unwrap();
        assert_eq!(call.idempotency_key, expected_key);
    }

    #[tokio::test]
    async fn test_invalid_input_is_validation_failed() {
        let mut wf = sample_workflow("org_acme");
        wf.steps[0].input = StepInput::RecommendStarters { max_tables: 0 };
        let store = Arc::new(InMemoryWorkflowStore::new());
        store.create_workflow(&wf).await.unwrap();
        let tool = Arc::new(ScriptedTool::new());
        let executor = StepExecutor::new(
            store.clone(),
            tool.clone(),
            Arc::new(AllowAllGate),
            Arc::new(TestHasher),
            RetryPolicy::default(),
            Duration::from_secs(120),
            EventBus::new(64),
        );

        let result = finished(
            executor
                .execute(&wf, &wf.steps[0], &StepContext::new(), &CancellationToken::new())
                .await
                .unwrap(),
        );
        assert_eq!(result.error.unwrap().class, FailureClass::ValidationFailed);
        assert!(tool.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stored_success_is_reused() {
        let (executor, store, tool, wf) = setup(ScriptedTool::new(), AllowAllGate).await;
        let token = CancellationToken::new();
        let first = finished(
            executor
                .execute(&wf, &wf.steps[0], &StepContext::new(), &token)
                .await
                .unwrap(),
        );

        let reloaded = store.get_workflow(&wf.id).await.unwrap().unwrap();
        let second = executor
            .execute(&reloaded, &reloaded.steps[0], &StepContext::new(), &token)
            .await
            .unwrap();

        assert_eq!(second, StepRun::Reused(first));
        assert_eq!(tool.calls_for("load_catalog").len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_does_nothing() {
        let (executor, store, tool, wf) = setup(ScriptedTool::new(), AllowAllGate).await;
        let token = CancellationToken::new();
        token.cancel();

        let run = executor
            .execute(&wf, &wf.steps[0], &StepContext::new(), &token)
            .await
            .unwrap();
        assert_eq!(run, StepRun::Cancelled);
        assert!(tool.calls().is_empty());
        assert!(store.list_attempts(&wf.id).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_retries() {
        let tool = ScriptedTool::new().fail("load_catalog", FailureClass::TransientError, 10);
        let (executor, store, tool, wf) = setup(tool, AllowAllGate).await;
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(2500)).await;
                token.cancel();
            })
        };

        let run = executor
            .execute(&wf, &wf.steps[0], &StepContext::new(), &token)
            .await
            .unwrap();
        canceller.await.unwrap();

        assert_eq!(run, StepRun::Cancelled);
        // Attempts at t=0s and t=1s; cancelled during the 4s backoff.
        assert_eq!(tool.calls_for("load_catalog").len(), 2);
        let stored = store.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(stored.step_status("load_catalog"), StepStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_after_cancel_in_store_is_ignored() {
        let tool =
            ScriptedTool::new().push("load_catalog", Scripted::Sleep(Duration::from_secs(10)));
        let (executor, store, tool, wf) = setup(tool, AllowAllGate).await;

        let context = StepContext::new();
        let token = CancellationToken::new();
        let (run, ()) = tokio::join!(
            executor.execute(&wf, &wf.steps[0], &context, &token),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                store
                    .update_status(&wf.id, WorkflowStatus::Cancelled, Utc::now())
                    .await
                    .unwrap();
            }
        );

        assert_eq!(run.unwrap(), StepRun::Cancelled);
        assert_eq!(tool.calls_for("load_catalog").len(), 1);
        let stored = store.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(stored.step_status("load_catalog"), StepStatus::Pending);
        let attempts = store.list_attempts(&wf.id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, AttemptOutcome::Cancelled);
    }
}
