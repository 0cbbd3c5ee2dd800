//! Resume engine: decides where a (re)started workflow continues.
//!
//! Stored state is the only input. Steps whose stored status is `success`
//! or `skipped` are never picked again, which is what makes resuming after a
//! crash at step k safe for steps 1..k-1.

use autopilot_types::workflow::{StepDefinition, StepStatus, Workflow, WorkflowStatus};

use super::context::StepContext;

/// Stateless resume logic.
pub struct ResumeEngine;

impl ResumeEngine {
    /// First step in declared order that still needs to run.
    ///
    /// `pending` and `failed` steps qualify, as does a `running` step left
    /// behind by a crashed process.
    pub fn next_step(workflow: &Workflow) -> Option<&StepDefinition> {
        workflow.steps.iter().find(|step| {
            matches!(
                workflow.step_status(&step.name),
                StepStatus::Pending | StepStatus::Failed | StepStatus::Running
            )
        })
    }

    /// Outputs of every successful step declared before `step`.
    pub fn dependency_context(workflow: &Workflow, step: &StepDefinition) -> StepContext {
        let mut context = StepContext::new();
        for earlier in workflow.steps.iter().take_while(|s| s.name != step.name) {
            if let Some(result) = workflow.result(&earlier.name).filter(|r| r.is_success()) {
                if let Some(output) = &result.output {
                    context.insert(&earlier.name, output.clone());
                }
            }
        }
        context
    }

    /// Names of steps already completed successfully, in declared order.
    pub fn completed_steps(workflow: &Workflow) -> Vec<String> {
        workflow
            .steps
            .iter()
            .filter(|s| workflow.step_status(&s.name) == StepStatus::Success)
            .map(|s| s.name.clone())
            .collect()
    }

    /// Terminal status once no step is left to run: `success` when every
    /// step succeeded, `partial_failure` when some were skipped.
    pub fn completion_status(workflow: &Workflow) -> Option<WorkflowStatus> {
        if Self::next_step(workflow).is_some() {
            return None;
        }
        let any_skipped = workflow
            .steps
            .iter()
            .any(|s| workflow.step_status(&s.name) == StepStatus::Skipped);
        Some(if any_skipped {
            WorkflowStatus::PartialFailure
        } else {
            WorkflowStatus::Success
        })
    }
}
