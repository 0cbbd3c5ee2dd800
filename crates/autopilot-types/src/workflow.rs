//! Workflow domain types.
//!
//! A [`Workflow`] is one execution of a template for one org: its ordered
//! step definitions plus the stored [`StepResult`] of every step. Step-level
//! attempt logs ([`AttemptRecord`]) and the recovery metadata exposed for
//! failed runs ([`RecoveryReport`]) also live here.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::failure::FailureClass;
use crate::payload::{StepInput, StepOutput};

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// The fixed set of workflow templates the engine can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowTemplate {
    Profile,
    Dashboard,
    Memo,
}

impl fmt::Display for WorkflowTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowTemplate::Profile => write!(f, "profile"),
            WorkflowTemplate::Dashboard => write!(f, "dashboard"),
            WorkflowTemplate::Memo => write!(f, "memo"),
        }
    }
}

impl FromStr for WorkflowTemplate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "profile" => Ok(WorkflowTemplate::Profile),
            "dashboard" => Ok(WorkflowTemplate::Dashboard),
            "memo" => Ok(WorkflowTemplate::Memo),
            other => Err(format!("invalid workflow template: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Overall status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Queued,
    Running,
    PartialFailure,
    Success,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Terminal for the run. `PartialFailure` ends the run but stays requeueable.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Success
                | WorkflowStatus::Failed
                | WorkflowStatus::Cancelled
                | WorkflowStatus::PartialFailure
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        match (self, next) {
            (Queued, Running) | (Queued, Cancelled) => true,
            (Running, Running)
            | (Running, Success)
            | (Running, PartialFailure)
            | (Running, Failed)
            | (Running, Cancelled) => true,
            // Requeue re-enters through admission.
            (Failed, Queued) | (Failed, Running) => true,
            (PartialFailure, Queued) | (PartialFailure, Running) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Queued => "queued",
            WorkflowStatus::Running => "running",
            WorkflowStatus::PartialFailure => "partial_failure",
            WorkflowStatus::Success => "success",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "queued" => Ok(WorkflowStatus::Queued),
            "running" => Ok(WorkflowStatus::Running),
            "partial_failure" => Ok(WorkflowStatus::PartialFailure),
            "success" => Ok(WorkflowStatus::Success),
            "failed" => Ok(WorkflowStatus::Failed),
            "cancelled" => Ok(WorkflowStatus::Cancelled),
            other => Err(format!("invalid workflow status: '{other}'")),
        }
    }
}

/// Status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Step definition
// ---------------------------------------------------------------------------

/// What the orchestrator does when a step fails terminally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the workflow and commit it to the dead-letter queue.
    #[default]
    DeadLetter,
    /// Mark the step skipped and continue, if no later step depends on it.
    SkipAndContinue,
}

/// One step of a workflow, in declared order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique within a workflow (e.g. "profile_tables").
    pub name: String,
    /// Names of earlier steps whose outputs this step consumes.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Whether the step writes to an external system.
    #[serde(default)]
    pub side_effecting: bool,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    /// Per-step timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    pub input: StepInput,
}

/// Flags applied to every step of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionFlags {
    /// Always use the sampling-reduced request shape.
    #[serde(default)]
    pub sampling: bool,
    /// Skip any legally skippable step that fails terminally.
    #[serde(default)]
    pub skip_on_error: bool,
}

// ---------------------------------------------------------------------------
// Step result
// ---------------------------------------------------------------------------

/// Sanitized failure attached to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub class: FailureClass,
    pub message: String,
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

/// Stored state of one step.
///
/// Once `status` is `Success`, `output` and `output_hash` never change for
/// the lifetime of the workflow record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StepOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Retries consumed (attempts - 1).
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Non-blocking issues such as `PARTIAL_RESULTS`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl StepResult {
    /// A step that has not run yet.
    pub fn pending(step_name: &str) -> Self {
        Self {
            step_name: step_name.to_string(),
            status: StepStatus::Pending,
            output: None,
            output_hash: None,
            started_at: None,
            finished_at: None,
            retry_count: 0,
            error: None,
            idempotency_key: None,
            warnings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// How one attempt of a step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Retryable,
    Terminal,
    Blocked,
    Cancelled,
}

/// Log entry for a single attempt of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub workflow_id: Uuid,
    pub step_name: String,
    /// 1-based.
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_class: Option<FailureClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the sampling-reduced request shape was used.
    pub sampled: bool,
    /// Backoff waited before this attempt.
    pub backoff_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A workflow record with its ordered step definitions and step results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7.
    pub id: Uuid,
    pub org_id: String,
    pub template: WorkflowTemplate,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub flags: ExecutionFlags,
    /// Content hash of the ordered step inputs at creation.
    pub input_hash: String,
    pub steps: Vec<StepDefinition>,
    /// One entry per step definition, in the same order.
    pub results: Vec<StepResult>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn step(&self, step_name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == step_name)
    }

    pub fn result(&self, step_name: &str) -> Option<&StepResult> {
        self.results.iter().find(|r| r.step_name == step_name)
    }

    /// Step status, `Pending` for steps without a stored result.
    pub fn step_status(&self, step_name: &str) -> StepStatus {
        self.result(step_name)
            .map(|r| r.status)
            .unwrap_or(StepStatus::Pending)
    }

    /// Whether any step after `step_name` declares a dependency on it.
    pub fn has_dependents(&self, step_name: &str) -> bool {
        let Some(pos) = self.steps.iter().position(|s| s.name == step_name) else {
            return false;
        };
        self.steps[pos + 1..]
            .iter()
            .any(|s| s.depends_on.iter().any(|d| d == step_name))
    }
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Result of asking the admission controller to run a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AdmissionOutcome {
    Running,
    /// 1-based position in the org's FIFO wait queue.
    Queued { position: usize },
}

// ---------------------------------------------------------------------------
// Recovery metadata
// ---------------------------------------------------------------------------

/// Operator action that can recover a failed or partially failed workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequeueStrategy {
    Retry,
    RetryWithSampling,
    SkipAndContinue,
}

impl RequeueStrategy {
    pub fn description(self) -> &'static str {
        match self {
            RequeueStrategy::Retry => "Retry",
            RequeueStrategy::RetryWithSampling => "Retry with sampling",
            RequeueStrategy::SkipAndContinue => "Skip this step and continue",
        }
    }
}

impl fmt::Display for RequeueStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequeueStrategy::Retry => write!(f, "retry"),
            RequeueStrategy::RetryWithSampling => write!(f, "retry_with_sampling"),
            RequeueStrategy::SkipAndContinue => write!(f, "skip_and_continue"),
        }
    }
}

impl FromStr for RequeueStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "retry" => Ok(RequeueStrategy::Retry),
            "retry_with_sampling" => Ok(RequeueStrategy::RetryWithSampling),
            "skip_and_continue" => Ok(RequeueStrategy::SkipAndContinue),
            other => Err(format!("invalid requeue strategy: '{other}'")),
        }
    }
}

/// Summary of one completed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub step: String,
    pub status: StepStatus,
    pub output_summary: String,
}

/// The step that stopped (or was skipped in) a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedStepSummary {
    pub step: String,
    pub error: String,
    pub failure_class: FailureClass,
    pub retry_count: u32,
}

/// Recovery metadata exposed for `partial_failure` and `failed` workflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub workflow_id: Uuid,
    pub workflow_status: WorkflowStatus,
    pub completed_steps: Vec<StepSummary>,
    pub failed_step: Option<FailedStepSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub available_actions: Vec<RequeueStrategy>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{ArtifactKind, SampleScope};

    fn step(name: &str, deps: &[&str], input: StepInput) -> StepDefinition {
        StepDefinition {
            name: name.to_string(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            side_effecting: false,
            on_failure: FailurePolicy::DeadLetter,
            timeout_secs: None,
            input,
        }
    }

    fn sample_workflow() -> Workflow {
        let steps = vec![
            step("load_catalog", &[], StepInput::LoadCatalog {}),
            step(
                "select_template",
                &["load_catalog"],
                StepInput::SelectTemplate {
                    include_revenue: true,
                },
            ),
            step(
                "store_artifact",
                &["select_template"],
                StepInput::StoreArtifact {
                    artifact: ArtifactKind::Dashboard,
                },
            ),
        ];
        let results = steps.iter().map(|s| StepResult::pending(&s.name)).collect();
        Workflow {
            id: Uuid::now_v7(),
            org_id: "org_acme".to_string(),
            template: WorkflowTemplate::Dashboard,
            status: WorkflowStatus::Queued,
            flags: ExecutionFlags::default(),
            input_hash: "abc".to_string(),
            steps,
            results,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_status_machine_transitions() {
        use WorkflowStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Running));
        assert!(Running.can_transition_to(PartialFailure));
        assert!(!Success.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Running));
        assert!(!Queued.can_transition_to(Success));
        assert!(Failed.can_transition_to(Queued));
    }

    #[test]
    fn test_status_roundtrip_strings() {
        for status in [
            WorkflowStatus::Queued,
            WorkflowStatus::Running,
            WorkflowStatus::PartialFailure,
            WorkflowStatus::Success,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
        ] {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json.as_str().unwrap(), status.as_str());
            assert_eq!(status.as_str().parse::<WorkflowStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_has_dependents() {
        let wf = sample_workflow();
        assert!(wf.has_dependents("load_catalog"));
        assert!(wf.has_dependents("select_template"));
        assert!(!wf.has_dependents("store_artifact"));
        assert!(!wf.has_dependents("missing"));
    }

    #[test]
    fn test_step_status_defaults_to_pending() {
        let mut wf = sample_workflow();
        wf.results.clear();
        assert_eq!(wf.step_status("load_catalog"), StepStatus::Pending);
    }

    #[test]
    fn test_requeue_strategy_parse() {
        assert_eq!(
            "retry-with-sampling".parse::<RequeueStrategy>().unwrap(),
            RequeueStrategy::RetryWithSampling
        );
        assert_eq!(
            RequeueStrategy::SkipAndContinue.to_string(),
            "skip_and_continue"
        );
        assert!("rewind".parse::<RequeueStrategy>().is_err());
    }

    #[test]
    fn test_step_definition_defaults() {
        let json = serde_json::json!({
            "name": "profile_tables",
            "input": {"kind": "profile_tables", "sample": {"mode": "full"}}
        });
        let def: StepDefinition = serde_json::from_value(json).unwrap();
        assert!(def.depends_on.is_empty());
        assert!(!def.side_effecting);
        assert_eq!(def.on_failure, FailurePolicy::DeadLetter);
        assert_eq!(
            def.input,
            StepInput::ProfileTables {
                sample: SampleScope::Full
            }
        );
    }

    #[test]
    fn test_admission_outcome_serde() {
        let json = serde_json::to_value(AdmissionOutcome::Queued { position: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({"state": "queued", "position": 2}));
    }
}
