//! `apctl run`: submit workflows through admission and drive them.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use uuid::Uuid;

use autopilot_core::workflow::orchestrator::{RunReport, Submission};
use autopilot_infra::tool::simulated::FailureInjection;
use autopilot_types::workflow::{AdmissionOutcome, ExecutionFlags, WorkflowStatus, WorkflowTemplate};

use super::print_run_report;
use crate::state::AppState;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Tenant that owns the workflows.
    #[arg(long)]
    pub org: String,

    /// Workflow template (profile, dashboard, memo).
    #[arg(long)]
    pub template: WorkflowTemplate,

    /// Number of workflows to submit.
    #[arg(long, default_value = "1")]
    pub count: u32,

    /// Use the sampling-reduced request shape for every step.
    #[arg(long)]
    pub sampling: bool,

    /// Skip legally skippable steps that fail terminally.
    #[arg(long)]
    pub skip_on_error: bool,

    /// Inject a simulated tool failure: step=class[:times] (repeatable).
    #[arg(long = "fail", value_name = "STEP=CLASS[:TIMES]")]
    pub fail: Vec<FailureInjection>,
}

pub async fn run(state: &AppState, args: RunArgs, json: bool, quiet: bool) -> Result<()> {
    let flags = ExecutionFlags {
        sampling: args.sampling,
        skip_on_error: args.skip_on_error,
    };

    let mut submissions: Vec<Submission> = Vec::new();
    for _ in 0..args.count.max(1) {
        let submission = state
            .orchestrator
            .submit(&args.org, args.template, flags)
            .await
            .context("Failed to submit workflow")?;
        submissions.push(submission);
    }

    let spinner = (!json && !quiet).then(|| {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(format!(
            "Running {} {} workflow(s) for {}...",
            submissions.len(),
            args.template,
            args.org
        ));
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    });

    let admitted: Vec<Uuid> = submissions
        .iter()
        .filter(|s| s.is_running())
        .map(|s| s.workflow_id)
        .collect();
    let outcomes = state.orchestrator.run_to_completion(admitted).await;

    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let mut reports: Vec<RunReport> = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(report) => reports.push(report),
            Err(e) => tracing::error!(error = %e, "workflow run aborted"),
        }
    }

    // Submissions never promoted are still waiting behind runs owned by
    // another process.
    let driven: HashSet<Uuid> = reports.iter().map(|r| r.workflow_id).collect();
    let waiting: Vec<&Submission> = submissions
        .iter()
        .filter(|s| !driven.contains(&s.workflow_id))
        .collect();

    if json {
        let out = serde_json::json!({
            "submitted": submissions.len(),
            "runs": reports,
            "waiting": waiting,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    if quiet {
        return Ok(());
    }

    println!();
    println!(
        "  {} {} {} workflow(s) for {}",
        style("*").green().bold(),
        submissions.len(),
        style(args.template).cyan(),
        style(&args.org).cyan()
    );
    println!();
    for report in &reports {
        print_run_report(report);
    }
    for submission in &waiting {
        let position = match submission.admission {
            AdmissionOutcome::Queued { position } => position.to_string(),
            AdmissionOutcome::Running => "-".to_string(),
        };
        println!(
            "  {} {} (position {position})",
            style(submission.workflow_id).dim(),
            style("queued").cyan()
        );
    }

    let count = |status: WorkflowStatus| reports.iter().filter(|r| r.status == status).count();
    println!();
    println!(
        "  {} success, {} partial_failure, {} failed, {} cancelled, {} waiting",
        style(count(WorkflowStatus::Success)).green(),
        style(count(WorkflowStatus::PartialFailure)).yellow(),
        style(count(WorkflowStatus::Failed)).red(),
        count(WorkflowStatus::Cancelled),
        waiting.len()
    );
    println!();

    Ok(())
}
