//! CLI workflow subcommands: list, show, queue, cancel, cancel-all and
//! recover.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use autopilot_core::repository::SortOrder;
use autopilot_core::repository::workflow::{RunFilter, WorkflowStore};
use autopilot_core::workflow::orchestrator::CancelOutcome;
use autopilot_core::workflow::recovery::build_report;
use autopilot_types::workflow::WorkflowStatus;

use super::{print_recovery, print_run_report, status_cell, step_status_cell, styled_status};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// List runs of an org, newest first.
    List {
        #[arg(long)]
        org: String,

        /// Only runs in this status.
        #[arg(long)]
        status: Option<WorkflowStatus>,

        #[arg(long, default_value = "50")]
        limit: i64,
    },

    /// Show one run with its steps, attempts and recovery options.
    Show {
        workflow_id: Uuid,

        /// Also print the audit trail.
        #[arg(long)]
        events: bool,
    },

    /// Running and queued runs of an org in admission order.
    Queue {
        #[arg(long)]
        org: String,
    },

    /// Cancel a queued or running workflow.
    Cancel { workflow_id: Uuid },

    /// Cancel every queued and running workflow of an org.
    #[command(name = "cancel-all")]
    CancelAll {
        #[arg(long)]
        org: String,
    },

    /// Resume runs left without a driver by a crashed process.
    Recover {
        /// Only report stale runs closed at startup; do not resume.
        #[arg(long)]
        no_resume: bool,
    },
}

pub async fn handle_workflow_command(
    cmd: WorkflowCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        WorkflowCommand::List { org, status, limit } => {
            handle_list(&org, status, limit, state, json).await
        }
        WorkflowCommand::Show {
            workflow_id,
            events,
        } => handle_show(workflow_id, events, state, json).await,
        WorkflowCommand::Queue { org } => handle_queue(&org, state, json).await,
        WorkflowCommand::Cancel { workflow_id } => {
            let outcome = state
                .orchestrator
                .cancel(workflow_id)
                .await
                .with_context(|| format!("Failed to cancel workflow {workflow_id}"))?;
            finish_cancel(vec![outcome], state, json).await
        }
        WorkflowCommand::CancelAll { org } => {
            let outcomes = state
                .orchestrator
                .cancel_all(&org)
                .await
                .with_context(|| format!("Failed to cancel workflows of {org}"))?;
            finish_cancel(outcomes, state, json).await
        }
        WorkflowCommand::Recover { no_resume } => handle_recover(no_resume, state, json).await,
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

async fn handle_list(
    org: &str,
    status: Option<WorkflowStatus>,
    limit: i64,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let filter = RunFilter {
        org_id: Some(org.to_string()),
        status,
        sort_order: SortOrder::Desc,
        limit: Some(limit.max(1)),
    };
    let runs = state
        .orchestrator
        .list_runs(&filter)
        .await
        .context("Failed to list runs")?;

    if json {
        let out: Vec<_> = runs
            .iter()
            .map(|w| {
                serde_json::json!({
                    "workflow_id": w.id.to_string(),
                    "template": w.template.to_string(),
                    "status": w.status,
                    "flags": w.flags,
                    "created_at": w.created_at.to_rfc3339(),
                    "finished_at": w.finished_at.map(|t| t.to_rfc3339()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!();
        println!("  No runs for '{org}'.");
        println!(
            "  Start one with: {}",
            style(format!("apctl run --org {org} --template profile")).dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Workflow").fg(Color::Cyan),
            Cell::new("Template"),
            Cell::new("Status"),
            Cell::new("Steps"),
            Cell::new("Created"),
        ]);

    for w in &runs {
        let done = w.results.iter().filter(|r| r.is_success()).count();
        table.add_row(vec![
            Cell::new(w.id),
            Cell::new(w.template),
            status_cell(w.status),
            Cell::new(format!("{done}/{}", w.steps.len())),
            Cell::new(w.created_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

async fn handle_show(workflow_id: Uuid, events: bool, state: &AppState, json: bool) -> Result<()> {
    let workflow = state
        .orchestrator
        .get_workflow(workflow_id)
        .await
        .with_context(|| format!("Workflow {workflow_id} not found"))?;
    let store = state.orchestrator.store();
    let attempts = store
        .list_attempts(&workflow_id)
        .await
        .context("Failed to load step attempts")?;
    let audit = if events {
        store
            .list_audit_events(&workflow_id)
            .await
            .context("Failed to load audit events")?
    } else {
        Vec::new()
    };
    let recovery = matches!(
        workflow.status,
        WorkflowStatus::Failed | WorkflowStatus::PartialFailure
    )
    .then(|| build_report(&workflow));

    if json {
        let out = serde_json::json!({
            "workflow": workflow,
            "attempts": attempts,
            "recovery": recovery,
            "events": audit,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} for {}",
        style(workflow.template).cyan().bold(),
        style(workflow.id).dim(),
        style(&workflow.org_id).cyan()
    );
    println!("  Status:  {}", styled_status(workflow.status));
    if workflow.flags.sampling || workflow.flags.skip_on_error {
        println!(
            "  Flags:   sampling={} skip_on_error={}",
            workflow.flags.sampling, workflow.flags.skip_on_error
        );
    }
    println!("  Created: {}", workflow.created_at.to_rfc3339());
    if let Some(finished) = workflow.finished_at {
        println!("  Finished: {}", finished.to_rfc3339());
    }
    println!();

    let mut steps = Table::new();
    steps
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Retries"),
            Cell::new("Output / error"),
        ]);
    for (def, result) in workflow.steps.iter().zip(&workflow.results) {
        let detail = match (&result.output, &result.error) {
            (_, Some(error)) => error.to_string(),
            (Some(output), None) => output.summary(),
            (None, None) => String::new(),
        };
        let name = if def.side_effecting {
            format!("{} *", def.name)
        } else {
            def.name.clone()
        };
        steps.add_row(vec![
            Cell::new(name),
            step_status_cell(result.status),
            Cell::new(result.retry_count),
            Cell::new(detail),
        ]);
    }
    println!("{steps}");

    if !attempts.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Step").fg(Color::Cyan),
                Cell::new("#"),
                Cell::new("Outcome"),
                Cell::new("Class"),
                Cell::new("Sampled"),
                Cell::new("Backoff"),
            ]);
        for a in &attempts {
            table.add_row(vec![
                Cell::new(&a.step_name),
                Cell::new(a.attempt),
                Cell::new(format!("{:?}", a.outcome).to_lowercase()),
                Cell::new(a.failure_class.map(|c| c.code()).unwrap_or("-")),
                Cell::new(if a.sampled { "yes" } else { "no" }),
                Cell::new(format!("{}ms", a.backoff_ms)),
            ]);
        }
        println!();
        println!("  {}", style("── Attempts ──").dim());
        println!("{table}");
    }

    if let Some(recovery) = &recovery {
        println!();
        println!("  {}", style("── Recovery ──").dim());
        print_recovery(recovery);
    }

    if !audit.is_empty() {
        println!();
        println!("  {}", style("── Audit trail ──").dim());
        for event in &audit {
            println!(
                "  {} {} {} {}{}",
                style(event.recorded_at.format("%H:%M:%S%.3f")).dim(),
                event.kind,
                event.step_id.as_deref().unwrap_or("-"),
                event.status,
                event
                    .error_code
                    .as_deref()
                    .map(|c| format!(" [{c}]"))
                    .unwrap_or_default()
            );
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

async fn handle_queue(org: &str, state: &AppState, json: bool) -> Result<()> {
    let list = |status| RunFilter {
        org_id: Some(org.to_string()),
        status: Some(status),
        sort_order: SortOrder::Asc,
        limit: None,
    };
    let running = state
        .orchestrator
        .list_runs(&list(WorkflowStatus::Running))
        .await
        .context("Failed to list running workflows")?;
    let queued = state
        .orchestrator
        .list_runs(&list(WorkflowStatus::Queued))
        .await
        .context("Failed to list queued workflows")?;
    let limit = state.orchestrator.admission().limit();

    if json {
        let out = serde_json::json!({
            "org_id": org,
            "limit": limit,
            "running": running.iter().map(|w| w.id).collect::<Vec<_>>(),
            "queued": queued
                .iter()
                .enumerate()
                .map(|(i, w)| serde_json::json!({ "workflow_id": w.id, "position": i + 1 }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} running {}/{}, {} queued",
        style(org).cyan().bold(),
        running.len(),
        limit,
        queued.len()
    );
    println!();
    if running.is_empty() && queued.is_empty() {
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Position").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Template"),
            Cell::new("Status"),
            Cell::new("Created"),
        ]);
    for w in &running {
        table.add_row(vec![
            Cell::new("-"),
            Cell::new(w.id),
            Cell::new(w.template),
            status_cell(w.status),
            Cell::new(w.created_at.format("%H:%M:%S")),
        ]);
    }
    for (i, w) in queued.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(w.id),
            Cell::new(w.template),
            status_cell(w.status),
            Cell::new(w.created_at.format("%H:%M:%S")),
        ]);
    }
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// Print cancel outcomes and drive any workflow promoted into a freed slot.
async fn finish_cancel(outcomes: Vec<CancelOutcome>, state: &AppState, json: bool) -> Result<()> {
    let promoted: Vec<Uuid> = outcomes.iter().filter_map(|o| o.promoted).collect();
    let reports: Vec<_> = state
        .orchestrator
        .run_to_completion(promoted)
        .await
        .into_iter()
        .filter_map(|r| match r {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "promoted workflow aborted");
                None
            }
        })
        .collect();

    if json {
        let out = serde_json::json!({ "cancelled": outcomes, "promoted_runs": reports });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    if outcomes.is_empty() {
        println!("  Nothing to cancel.");
    }
    for outcome in &outcomes {
        println!(
            "  {} {} {}",
            style("*").yellow().bold(),
            style(outcome.workflow_id).dim(),
            styled_status(outcome.status)
        );
    }
    if !reports.is_empty() {
        println!();
        println!("  {}", style("── Promoted ──").dim());
        for report in &reports {
            print_run_report(report);
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Recover
// ---------------------------------------------------------------------------

async fn handle_recover(no_resume: bool, state: &AppState, json: bool) -> Result<()> {
    let reaped = &state.startup_reap;
    let orphaned = if no_resume {
        Vec::new()
    } else {
        state
            .orchestrator
            .orphaned_runs()
            .await
            .context("Failed to list orphaned runs")?
    };
    let resumed: Vec<_> = state
        .orchestrator
        .run_to_completion(orphaned)
        .await
        .into_iter()
        .filter_map(|r| match r {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "resumed workflow aborted");
                None
            }
        })
        .collect();

    if json {
        let out = serde_json::json!({ "reaped": reaped, "resumed": resumed });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} stale run(s) dead-lettered, {} closed as finished",
        style(reaped.dead_lettered.len()).bold(),
        reaped.completed.len()
    );
    for id in &reaped.dead_lettered {
        println!("    {} {}", style(id).dim(), style("TIMEOUT").red());
    }
    if no_resume {
        println!();
        return Ok(());
    }
    println!("  {} run(s) resumed", style(resumed.len()).bold());
    for report in &resumed {
        print_run_report(report);
    }
    println!();
    Ok(())
}
