//! Config-driven pre-flight gate.
//!
//! Rules are checked in order: blocked step names, then side-effect denial
//! for listed orgs, then the sampling rewrite. The first matching rule wins.

use std::collections::HashSet;

use autopilot_core::workflow::gate::{BlockKind, GateDecision, PreflightGate};
use autopilot_types::config::GateConfig;
use autopilot_types::workflow::StepDefinition;

#[derive(Debug, Clone, Default)]
pub struct StaticPolicyGate {
    blocked_steps: HashSet<String>,
    sampled_steps: HashSet<String>,
    denied_orgs: HashSet<String>,
}

impl StaticPolicyGate {
    pub fn new(config: &GateConfig) -> Self {
        let set = |values: &[String]| {
            values
                .iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect::<HashSet<_>>()
        };
        Self {
            blocked_steps: set(config.blocked_steps.as_slice()),
            sampled_steps: set(config.sampled_steps.as_slice()),
            denied_orgs: set(config.denied_orgs.as_slice()),
        }
    }

    /// Synchronous rule evaluation shared by the async trait impl.
    pub fn decide(&self, org_id: &str, step: &StepDefinition) -> GateDecision {
        if self.blocked_steps.contains(&step.name) {
            return GateDecision::Block {
                kind: BlockKind::Permission,
                reason: format!("step '{}' is disabled by policy", step.name),
            };
        }

        if step.side_effecting && self.denied_orgs.contains(org_id) {
            return GateDecision::Block {
                kind: BlockKind::Permission,
                reason: format!("org '{org_id}' may not run side-effecting steps"),
            };
        }

        if self.sampled_steps.contains(&step.name) && !step.input.is_sampled() {
            let rewritten = step.input.sampled();
            if rewritten != step.input {
                return GateDecision::Rewrite(StepDefinition {
                    input: rewritten,
                    ..step.clone()
                });
            }
        }

        GateDecision::Allow
    }
}

impl PreflightGate for StaticPolicyGate {
    async fn evaluate(&self, org_id: &str, step: &StepDefinition) -> GateDecision {
        let decision = self.decide(org_id, step);
        if !matches!(decision, GateDecision::Allow) {
            tracing::debug!(org_id, step = %step.name, decision = %decision, "gate decision");
        }
        decision
    }
}
