//! Tool interface consumed by the step executor.
//!
//! The concrete adapters (warehouse, BI, LLM) live outside the engine; the
//! executor only sees typed requests and typed outputs.

use autopilot_types::failure::FailureClass;
use autopilot_types::payload::{StepInput, StepOutput};
use uuid::Uuid;

use super::classifier::FailureClassifier;
use super::context::StepContext;

/// One invocation of a step against the external tool.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub org_id: String,
    pub workflow_id: Uuid,
    pub step_name: String,
    /// Effective input; the sampling-reduced shape when `sampled` is set.
    pub input: StepInput,
    pub sampled: bool,
    pub side_effecting: bool,
    /// Stable across retries and resumes; adapters dedupe side effects on it.
    pub idempotency_key: String,
    /// 1-based.
    pub attempt: u32,
    pub context: StepContext,
}

/// Error half of a tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolFailure {
    pub class: FailureClass,
    pub detail: String,
    /// Output salvaged from a `PARTIAL_RESULTS` failure.
    pub partial_output: Option<StepOutput>,
}

impl ToolFailure {
    pub fn new(class: FailureClass, detail: impl Into<String>) -> Self {
        Self {
            class,
            detail: detail.into(),
            partial_output: None,
        }
    }

    /// `PARTIAL_RESULTS` carrying the output that did come back.
    pub fn partial(output: StepOutput, detail: impl Into<String>) -> Self {
        Self {
            class: FailureClass::PartialResults,
            detail: detail.into(),
            partial_output: Some(output),
        }
    }

    /// Build a failure from untyped error text (e.g. an HTTP client error).
    pub fn from_message(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::new(FailureClassifier::classify_message(&detail), detail)
    }
}

impl std::fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.class, self.detail)
    }
}

/// External tool invoked once per step attempt.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ToolInterface: Send + Sync {
    fn invoke(
        &self,
        request: ToolRequest,
    ) -> impl std::future::Future<Output = Result<StepOutput, ToolFailure>> + Send;
}
