//! CLI command definitions and shared rendering helpers for `apctl`.
//!
//! Uses clap derive macros. Commands are grouped by noun
//! (`apctl workflow list`, `apctl dead-letter requeue`).

pub mod dead_letter;
pub mod run;
pub mod status;
pub mod workflow;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use comfy_table::{Cell, Color};
use console::style;

use autopilot_core::workflow::orchestrator::RunReport;
use autopilot_types::workflow::{RecoveryReport, StepStatus, WorkflowStatus};

/// Operate the Autopilot workflow engine.
#[derive(Parser)]
#[command(name = "apctl", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for engine logs and the audit trail, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit workflows and drive them to completion.
    Run(run::RunArgs),

    /// Inspect and control workflow runs.
    #[command(alias = "wf")]
    Workflow {
        #[command(subcommand)]
        action: workflow::WorkflowCommand,
    },

    /// Inspect and requeue dead-lettered workflows.
    #[command(name = "dead-letter", alias = "dlq")]
    DeadLetter {
        #[command(subcommand)]
        action: dead_letter::DeadLetterCommand,
    },

    /// Workflow counts by status and dead-letter total.
    Status,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

// ---------------------------------------------------------------------------
// Shared rendering
// ---------------------------------------------------------------------------

pub(crate) fn status_color(status: WorkflowStatus) -> Color {
    match status {
        WorkflowStatus::Success => Color::Green,
        WorkflowStatus::Running => Color::Cyan,
        WorkflowStatus::Queued => Color::Blue,
        WorkflowStatus::PartialFailure => Color::Yellow,
        WorkflowStatus::Failed => Color::Red,
        WorkflowStatus::Cancelled => Color::DarkGrey,
    }
}

pub(crate) fn status_cell(status: WorkflowStatus) -> Cell {
    Cell::new(status).fg(status_color(status))
}

pub(crate) fn step_status_cell(status: StepStatus) -> Cell {
    let color = match status {
        StepStatus::Success => Color::Green,
        StepStatus::Running => Color::Cyan,
        StepStatus::Pending => Color::DarkGrey,
        StepStatus::Skipped => Color::Yellow,
        StepStatus::Failed => Color::Red,
    };
    Cell::new(status).fg(color)
}

/// Styled status word for line output.
pub(crate) fn styled_status(status: WorkflowStatus) -> String {
    match status {
        WorkflowStatus::Success => style(status).green().to_string(),
        WorkflowStatus::PartialFailure => style(status).yellow().to_string(),
        WorkflowStatus::Failed => style(status).red().bold().to_string(),
        WorkflowStatus::Cancelled => style(status).dim().to_string(),
        WorkflowStatus::Queued | WorkflowStatus::Running => style(status).cyan().to_string(),
    }
}

/// Failed step, sanitized error and the actions an operator can take.
pub(crate) fn print_recovery(report: &RecoveryReport) {
    if let Some(failed) = &report.failed_step {
        println!(
            "    {} {} [{}] after {} retries",
            style("failed step:").dim(),
            style(&failed.step).bold(),
            style(failed.failure_class).red(),
            failed.retry_count
        );
        println!("    {} {}", style("error:").dim(), failed.error);
    }
    for warning in &report.warnings {
        println!("    {} {warning}", style("warning:").yellow());
    }
    if !report.available_actions.is_empty() {
        let actions: Vec<String> = report
            .available_actions
            .iter()
            .map(|a| a.to_string())
            .collect();
        println!("    {} {}", style("actions:").dim(), actions.join(", "));
    }
}

/// One line per finished run plus recovery details when it did not succeed.
pub(crate) fn print_run_report(report: &RunReport) {
    println!(
        "  {} {} {} ({} steps done)",
        style(report.workflow_id).dim(),
        report.template,
        styled_status(report.status),
        report.completed_steps.len()
    );
    if let Some(dead_letter_id) = report.dead_letter_id {
        println!("    {} {dead_letter_id}", style("dead letter:").dim());
    }
    if let Some(recovery) = &report.recovery {
        print_recovery(recovery);
    }
}
