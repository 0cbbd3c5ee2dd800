//! Pre-flight gate consulted before every tool invocation.
//!
//! The gate stands in for the SQL safety and cost pipeline. It may allow a
//! step, rewrite its definition (for instance to the sampled shape), or block
//! it outright.

use std::fmt;

use autopilot_types::failure::FailureClass;
use autopilot_types::workflow::StepDefinition;

/// Why a gate refused a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// The request itself is unacceptable (bad shape, over budget).
    Validation,
    /// The org or step is not allowed to run.
    Permission,
}

impl BlockKind {
    pub fn failure_class(self) -> FailureClass {
        match self {
            BlockKind::Validation => FailureClass::ValidationFailed,
            BlockKind::Permission => FailureClass::PermissionDenied,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Allow,
    Rewrite(StepDefinition),
    Block { kind: BlockKind, reason: String },
}

impl GateDecision {
    /// Audit status string: `allow`, `rewrite` or `block`.
    pub fn label(&self) -> &'static str {
        match self {
            GateDecision::Allow => "allow",
            GateDecision::Rewrite(_) => "rewrite",
            GateDecision::Block { .. } => "block",
        }
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateDecision::Block { reason, .. } => write!(f, "block ({reason})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Pre-flight gate trait.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait PreflightGate: Send + Sync {
    fn evaluate(
        &self,
        org_id: &str,
        step: &StepDefinition,
    ) -> impl std::future::Future<Output = GateDecision> + Send;
}

/// Gate that allows every step.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllGate;

impl PreflightGate for AllowAllGate {
    async fn evaluate(&self, _org_id: &str, _step: &StepDefinition) -> GateDecision {
        GateDecision::Allow
    }
}
