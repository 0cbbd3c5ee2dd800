//! Test doubles shared by the engine's unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use autopilot_types::dead_letter::DeadLetterRecord;
use autopilot_types::failure::FailureClass;
use autopilot_types::payload::{StepInput, StepOutput};
use autopilot_types::workflow::{
    ExecutionFlags, StepDefinition, StepResult, StepStatus, Workflow, WorkflowStatus,
    WorkflowTemplate,
};
use chrono::Utc;
use uuid::Uuid;

use crate::service::hash::ContentHasher;
use crate::workflow::gate::{BlockKind, GateDecision, PreflightGate};
use crate::workflow::template::build_steps;
use crate::workflow::tool::{ToolFailure, ToolInterface, ToolRequest};

// ---------------------------------------------------------------------------
// Hasher
// ---------------------------------------------------------------------------

pub(crate) struct TestHasher;

impl ContentHasher for TestHasher {
    fn compute_hash(&self, content: &str) -> String {
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub(crate) fn workflow_for(template: WorkflowTemplate, org_id: &str) -> Workflow {
    let steps = build_steps(template, org_id);
    let results = steps.iter().map(|s| StepResult::pending(&s.name)).collect();
    Workflow {
        id: Uuid::now_v7(),
        org_id: org_id.to_string(),
        template,
        status: WorkflowStatus::Queued,
        flags: ExecutionFlags::default(),
        input_hash: "test-input-hash".to_string(),
        steps,
        results,
        created_at: Utc::now(),
        started_at: None,
        finished_at: None,
    }
}

/// Dashboard workflow: load_catalog -> select_template -> store_artifact.
pub(crate) fn sample_workflow(org_id: &str) -> Workflow {
    workflow_for(WorkflowTemplate::Dashboard, org_id)
}

pub(crate) fn success_result(step_name: &str, key: &str) -> StepResult {
    StepResult {
        status: StepStatus::Success,
        output: Some(StepOutput::LoadCatalog {
            tables: vec!["analytics.orders".to_string()],
        }),
        output_hash: Some(format!("hash-{key}")),
        started_at: Some(Utc::now()),
        finished_at: Some(Utc::now()),
        idempotency_key: Some(key.to_string()),
        ..StepResult::pending(step_name)
    }
}

pub(crate) fn dead_letter_record(org_id: &str) -> DeadLetterRecord {
    let wf = sample_workflow(org_id);
    DeadLetterRecord {
        id: Uuid::now_v7(),
        workflow_id: wf.id,
        org_id: org_id.to_string(),
        template: wf.template,
        failed_step: "select_template".to_string(),
        final_failure_class: FailureClass::MalformedResponse,
        original_input_hash: wf.input_hash.clone(),
        step_history: wf.results.clone(),
        error_history: vec![],
        requeue_history: vec![],
        created_at: Utc::now(),
    }
}

/// Well-formed output for any step input.
pub(crate) fn default_output(input: &StepInput) -> StepOutput {
    let sampled = input.is_sampled();
    match input {
        StepInput::IntrospectSchemas { .. } => StepOutput::IntrospectSchemas {
            datasets: 2,
            tables: 6,
            cache_hit: false,
        },
        StepInput::ProfileTables { .. } => StepOutput::ProfileTables {
            profiled_tables: 6,
            sampled,
        },
        StepInput::ProfileColumns { .. } => StepOutput::ProfileColumns {
            profiled_columns: 42,
            sampled,
        },
        StepInput::DetectPii { .. } => StepOutput::DetectPii {
            high_confidence: vec!["users.email".to_string()],
            low_confidence: vec![],
        },
        StepInput::RecommendStarters { .. } => StepOutput::RecommendStarters {
            tables: vec!["analytics.orders".to_string()],
        },
        StepInput::StoreCatalog { connection_id } => StepOutput::StoreCatalog {
            stored: true,
            connection_id: connection_id.clone(),
        },
        StepInput::LoadCatalog {} => StepOutput::LoadCatalog {
            tables: vec!["analytics.orders".to_string()],
        },
        StepInput::SelectTemplate { .. } => StepOutput::SelectTemplate {
            templates: vec!["revenue_overview".to_string()],
        },
        StepInput::StoreArtifact { artifact } => StepOutput::StoreArtifact {
            artifact_id: "art_1".to_string(),
            artifact: *artifact,
        },
        StepInput::CollectKpis { .. } => StepOutput::CollectKpis {
            metrics: BTreeMap::from([("revenue".to_string(), 1200.0)]),
            sampled,
        },
        StepInput::DraftMemo { .. } => StepOutput::DraftMemo {
            headline: "Revenue up".to_string(),
            word_count: 120,
        },
    }
}

// ---------------------------------------------------------------------------
// ScriptedTool
// ---------------------------------------------------------------------------

/// One scripted response, consumed in order per step.
#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Fail(FailureClass),
    Partial,
    Sleep(Duration),
    Output(StepOutput),
}

#[derive(Debug, Clone)]
pub(crate) struct ToolCall {
    pub workflow_id: Uuid,
    pub step: String,
    pub idempotency_key: String,
    pub sampled: bool,
    pub input: StepInput,
    pub context_steps: Vec<String>,
    pub at: tokio::time::Instant,
}

/// Tool double: pops scripted responses per step, succeeds once exhausted.
#[derive(Default)]
pub(crate) struct ScriptedTool {
    script: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<ToolCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(self, step: &str, class: FailureClass, times: usize) -> Self {
        for _ in 0..times {
            self.inject(step, Scripted::Fail(class));
        }
        self
    }

    pub fn push(self, step: &str, response: Scripted) -> Self {
        self.inject(step, response);
        self
    }

    pub fn inject(&self, step: &str, response: Scripted) {
        self.script
            .lock()
            .unwrap()
            .entry(step.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, step: &str) -> Vec<ToolCall> {
        self.calls().into_iter().filter(|c| c.step == step).collect()
    }

    /// Highest number of invocations observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls_for_workflow(&self, workflow_id: Uuid) -> Vec<ToolCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.workflow_id == workflow_id)
            .collect()
    }
}

impl ToolInterface for ScriptedTool {
    async fn invoke(&self, request: ToolRequest) -> Result<StepOutput, ToolFailure> {
        self.calls.lock().unwrap().push(ToolCall {
            workflow_id: request.workflow_id,
            step: request.step_name.clone(),
            idempotency_key: request.idempotency_key.clone(),
            sampled: request.sampled,
            input: request.input.clone(),
            context_steps: request.context.step_names().map(str::to_string).collect(),
            at: tokio::time::Instant::now(),
        });

        let next = {
            let mut script = self.script.lock().unwrap();
            script
                .get_mut(&request.step_name)
                .and_then(|queue| queue.pop_front())
        };

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let response = self.respond(next, &request).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

impl ScriptedTool {
    async fn respond(
        &self,
        next: Option<Scripted>,
        request: &ToolRequest,
    ) -> Result<StepOutput, ToolFailure> {
        match next {
            None => Ok(default_output(&request.input)),
            Some(Scripted::Fail(class)) => Err(ToolFailure::new(class, format!("simulated {class}"))),
            Some(Scripted::Partial) => Err(ToolFailure::partial(
                default_output(&request.input),
                "some tables were unreadable",
            )),
            Some(Scripted::Sleep(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(default_output(&request.input))
            }
            Some(Scripted::Output(output)) => Ok(output),
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedGate
// ---------------------------------------------------------------------------

/// Gate double that blocks or samples named steps and allows the rest.
#[derive(Default)]
pub(crate) struct ScriptedGate {
    blocked: HashMap<String, BlockKind>,
    sampled: Vec<String>,
}

impl ScriptedGate {
    pub fn block(step: &str, kind: BlockKind) -> Self {
        Self {
            blocked: HashMap::from([(step.to_string(), kind)]),
            sampled: vec![],
        }
    }

    pub fn sample(step: &str) -> Self {
        Self {
            blocked: HashMap::new(),
            sampled: vec![step.to_string()],
        }
    }
}

impl PreflightGate for ScriptedGate {
    async fn evaluate(&self, _org_id: &str, step: &StepDefinition) -> GateDecision {
        if let Some(kind) = self.blocked.get(&step.name) {
            return GateDecision::Block {
                kind: *kind,
                reason: format!("{} blocked by test gate", step.name),
            };
        }
        if self.sampled.contains(&step.name) {
            return GateDecision::Rewrite(StepDefinition {
                input: step.input.sampled(),
                ..step.clone()
            });
        }
        GateDecision::Allow
    }
}
