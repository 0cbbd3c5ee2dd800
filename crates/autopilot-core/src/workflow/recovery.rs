//! Recovery metadata for failed and partially failed workflows.

use autopilot_types::workflow::{
    FailedStepSummary, RecoveryReport, RequeueStrategy, StepStatus, StepSummary, Workflow,
    WorkflowStatus,
};

use super::sanitize::sanitize_error;

/// Step that stopped the workflow (`failed`) or was skipped with an error.
pub fn failed_step(workflow: &Workflow) -> Option<&str> {
    let by_status = |status: StepStatus| {
        workflow
            .results
            .iter()
            .find(|r| r.status == status && r.error.is_some())
            .map(|r| r.step_name.as_str())
    };
    by_status(StepStatus::Failed).or_else(|| by_status(StepStatus::Skipped))
}

/// Recovery actions that are legal for the workflow as stored.
///
/// `skip_and_continue` is offered only for a failed step that no later
/// step depends on.
pub fn available_actions(workflow: &Workflow) -> Vec<RequeueStrategy> {
    match workflow.status {
        WorkflowStatus::Failed => {
            let mut actions = vec![RequeueStrategy::Retry, RequeueStrategy::RetryWithSampling];
            let skippable = workflow
                .results
                .iter()
                .find(|r| r.status == StepStatus::Failed)
                .is_some_and(|r| !workflow.has_dependents(&r.step_name));
            if skippable {
                actions.push(RequeueStrategy::SkipAndContinue);
            }
            actions
        }
        WorkflowStatus::PartialFailure => {
            vec![RequeueStrategy::Retry, RequeueStrategy::RetryWithSampling]
        }
        _ => Vec::new(),
    }
}

pub fn build_report(workflow: &Workflow) -> RecoveryReport {
    let completed_steps = workflow
        .results
        .iter()
        .filter(|r| r.is_success())
        .map(|r| StepSummary {
            step: r.step_name.clone(),
            status: r.status,
            output_summary: r.output.as_ref().map(|o| o.summary()).unwrap_or_default(),
        })
        .collect();

    let failed = failed_step(workflow).and_then(|name| workflow.result(name));
    let failed_step = failed.and_then(|r| {
        r.error.as_ref().map(|error| FailedStepSummary {
            step: r.step_name.clone(),
            error: sanitize_error(&error.message),
            failure_class: error.class,
            retry_count: r.retry_count,
        })
    });

    let warnings = workflow
        .results
        .iter()
        .flat_map(|r| r.warnings.iter().map(move |w| format!("{}: {w}", r.step_name)))
        .collect();

    RecoveryReport {
        workflow_id: workflow.id,
        workflow_status: workflow.status,
        completed_steps,
        failed_step,
        warnings,
        available_actions: available_actions(workflow),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_workflow, success_result};
    use autopilot_types::failure::FailureClass;
    use autopilot_types::workflow::{StepError, StepResult};

    fn failed(step: &str, class: FailureClass) -> StepResult {
        StepResult {
            status: StepStatus::Failed,
            retry_count: 3,
            error: Some(StepError {
                class,
                message: "upstream said password=hunter2".to_string(),
            }),
            ..StepResult::pending(step)
        }
    }

    #[test]
    fn test_failed_step_with_dependents_cannot_be_skipped() {
        let mut wf = sample_workflow("org_a");
        wf.status = WorkflowStatus::Failed;
        wf.results[0] = success_result("load_catalog", "k");
        wf.results[1] = failed("select_template", FailureClass::MalformedResponse);

        let report = build_report(&wf);
        assert_eq!(
            report.available_actions,
            vec![RequeueStrategy::Retry, RequeueStrategy::RetryWithSampling]
        );
        let failed = report.failed_step.unwrap();
        assert_eq!(failed.step, "select_template");
        assert_eq!(failed.retry_count, 3);
        assert_eq!(failed.error, "upstream said password=[REDACTED]");
        assert_eq!(report.completed_steps.len(), 1);
        assert!(report.completed_steps[0].output_summary.contains("load_catalog"));
    }

    #[test]
    fn test_last_step_can_be_skipped() {
        let mut wf = sample_workflow("org_a");
        wf.status = WorkflowStatus::Failed;
        wf.results[2] = failed("store_artifact", FailureClass::QuotaExceeded);
        assert!(available_actions(&wf).contains(&RequeueStrategy::SkipAndContinue));
    }

    #[test]
    fn test_partial_failure_reports_skipped_step_and_warnings() {
        let mut wf = sample_workflow("org_a");
        wf.status = WorkflowStatus::PartialFailure;
        wf.results[0] = StepResult {
            warnings: vec!["PARTIAL_RESULTS: 1 table unreadable".to_string()],
            ..success_result("load_catalog", "k")
        };
        wf.results[2] = StepResult {
            status: StepStatus::Skipped,
            ..failed("store_artifact", FailureClass::PermissionDenied)
        };

        let report = build_report(&wf);
        assert_eq!(report.failed_step.unwrap().step, "store_artifact");
        assert_eq!(
            report.warnings,
            vec!["load_catalog: PARTIAL_RESULTS: 1 table unreadable"]
        );
        assert!(!report.available_actions.contains(&RequeueStrategy::SkipAndContinue));
    }

    #[test]
    fn test_successful_workflow_offers_nothing() {
        let wf = sample_workflow("org_a");
        assert!(available_actions(&wf).is_empty());
        assert!(build_report(&wf).failed_step.is_none());
    }
}
