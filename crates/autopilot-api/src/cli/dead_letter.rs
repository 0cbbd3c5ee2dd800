//! CLI dead-letter subcommands: list, show and requeue.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use autopilot_types::workflow::{AdmissionOutcome, RequeueStrategy};

use super::{print_recovery, print_run_report};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum DeadLetterCommand {
    /// Dead-letter records of an org, newest first.
    List {
        #[arg(long)]
        org: String,

        /// Only records created at or after this time (RFC 3339).
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// Only records created at or before this time (RFC 3339).
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },

    /// Latest dead-letter record of a workflow.
    Show { workflow_id: Uuid },

    /// Requeue a failed or partially failed workflow and run it.
    Requeue {
        workflow_id: Uuid,

        /// retry, retry_with_sampling or skip_and_continue.
        #[arg(long)]
        strategy: RequeueStrategy,

        /// Operator requesting the requeue.
        #[arg(long)]
        actor: String,

        #[arg(long, default_value = "")]
        reason: String,
    },
}

pub async fn handle_dead_letter_command(
    cmd: DeadLetterCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        DeadLetterCommand::List { org, from, to } => handle_list(&org, from, to, state, json).await,
        DeadLetterCommand::Show { workflow_id } => handle_show(workflow_id, state, json).await,
        DeadLetterCommand::Requeue {
            workflow_id,
            strategy,
            actor,
            reason,
        } => handle_requeue(workflow_id, strategy, &actor, &reason, state, json).await,
    }
}

async fn handle_list(
    org: &str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            bail!("--from ({from}) is after --to ({to})");
        }
    }
    let records = state
        .orchestrator
        .dead_letters()
        .search(org, from, to)
        .await
        .context("Failed to search dead letters")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!();
        println!("  No dead-lettered workflows for '{org}'.");
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
            Cell::new("Failed step"),
            Cell::new("Class"),
            Cell::new("Requeues"),
            Cell::new("Created"),
        ]);
    for r in &records {
        table.add_row(vec![
            Cell::new(r.workflow_id),
            Cell::new(r.template),
            Cell::new(&r.failed_step),
            Cell::new(r.final_failure_class).fg(Color::Red),
            Cell::new(r.requeue_history.len()),
            Cell::new(r.created_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }
    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_show(workflow_id: Uuid, state: &AppState, json: bool) -> Result<()> {
    let Some(record) = state
        .orchestrator
        .dead_letters()
        .latest(&workflow_id)
        .await
        .context("Failed to load dead-letter record")?
    else {
        bail!("No dead-letter record for workflow {workflow_id}");
    };
    let recovery = state.orchestrator.recovery_report(workflow_id).await.ok();

    if json {
        let out = serde_json::json!({ "record": record, "recovery": recovery });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} ({})",
        style("Dead letter").red().bold(),
        style(record.id).dim(),
        record.template
    );
    println!("  Workflow:    {}", record.workflow_id);
    println!("  Org:         {}", style(&record.org_id).cyan());
    println!(
        "  Failed step: {} [{}]",
        style(&record.failed_step).bold(),
        style(record.final_failure_class).red()
    );
    println!("  Input hash:  {}", style(&record.original_input_hash).dim());
    println!("  Created:     {}", record.created_at.to_rfc3339());

    if !record.error_history.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("At").fg(Color::Cyan),
                Cell::new("Step"),
                Cell::new("#"),
                Cell::new("Class"),
                Cell::new("Error"),
            ]);
        for e in &record.error_history {
            table.add_row(vec![
                Cell::new(e.at.format("%H:%M:%S%.3f")),
                Cell::new(&e.step_name),
                Cell::new(e.attempt),
                Cell::new(e.failure_class),
                Cell::new(&e.error),
            ]);
        }
        println!();
        println!("  {}", style("── Errors ──").dim());
        println!("{table}");
    }

    if !record.requeue_history.is_empty() {
        println!();
        println!("  {}", style("── Requeues ──").dim());
        for entry in &record.requeue_history {
            println!(
                "  {} {} by {}{}",
                style(entry.at.to_rfc3339()).dim(),
                entry.strategy,
                style(&entry.actor).cyan(),
                if entry.reason.is_empty() {
                    String::new()
                } else {
                    format!(": {}", entry.reason)
                }
            );
        }
    }

    if let Some(recovery) = &recovery {
        println!();
        println!("  {}", style("── Recovery ──").dim());
        print_recovery(recovery);
    }
    println!();
    Ok(())
}

async fn handle_requeue(
    workflow_id: Uuid,
    strategy: RequeueStrategy,
    actor: &str,
    reason: &str,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let submission = state
        .orchestrator
        .requeue(workflow_id, actor, strategy, reason)
        .await
        .with_context(|| format!("Failed to requeue workflow {workflow_id}"))?;

    let report = if submission.is_running() {
        let mut outcomes = state.orchestrator.run_to_completion([workflow_id]).await;
        match outcomes.pop() {
            Some(outcome) => Some(outcome.context("Requeued workflow aborted")?),
            None => None,
        }
    } else {
        None
    };

    if json {
        let out = serde_json::json!({ "submission": submission, "run": report });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Requeued {} with {} (actor {})",
        style("*").green().bold(),
        style(workflow_id).dim(),
        style(strategy).cyan(),
        actor
    );
    match (&report, submission.admission) {
        (Some(report), _) => print_run_report(report),
        (None, AdmissionOutcome::Queued { position }) => {
            println!("  Waiting for a slot (position {position}).");
        }
        (None, AdmissionOutcome::Running) => {}
    }
    println!();
    Ok(())
}
