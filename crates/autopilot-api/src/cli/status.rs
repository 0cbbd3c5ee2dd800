//! Engine status dashboard.

use anyhow::{Context, Result};
use console::style;

use autopilot_core::repository::dead_letter::DeadLetterStore;
use autopilot_core::repository::workflow::RunFilter;
use autopilot_types::workflow::WorkflowStatus;

use super::styled_status;
use crate::state::AppState;

const STATUSES: [WorkflowStatus; 6] = [
    WorkflowStatus::Queued,
    WorkflowStatus::Running,
    WorkflowStatus::Success,
    WorkflowStatus::PartialFailure,
    WorkflowStatus::Failed,
    WorkflowStatus::Cancelled,
];

/// Workflow counts by status, dead-letter total and effective config.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let runs = state
        .orchestrator
        .list_runs(&RunFilter::default())
        .await
        .context("Failed to list runs")?;
    let counts: Vec<(WorkflowStatus, usize)> = STATUSES
        .iter()
        .map(|s| (*s, runs.iter().filter(|w| w.status == *s).count()))
        .collect();
    let dead_letters = state
        .orchestrator
        .dead_letters()
        .store()
        .count(None)
        .await
        .context("Failed to count dead letters")?;

    if json {
        let by_status: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(s, n)| (s.to_string(), serde_json::json!(n)))
            .collect();
        let out = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "workflows": {
                "total": runs.len(),
                "by_status": by_status,
            },
            "dead_letters": dead_letters,
            "concurrency_limit": state.config.concurrency_limit,
            "max_retries": state.config.max_retries,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Autopilot engine v{}",
        style("⚡").bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!();

    println!("  {}", style("── Workflows ──").dim());
    println!("  Total:  {}", style(runs.len()).bold());
    for (status, n) in &counts {
        if *n > 0 {
            println!("  {:<24} {n}", styled_status(*status));
        }
    }
    println!();

    println!("  {}", style("── Dead letters ──").dim());
    println!("  Stored: {}", style(dead_letters).bold());
    println!();

    println!("  {}", style("── Engine ──").dim());
    println!("  Concurrency limit: {} per org", state.config.concurrency_limit);
    println!(
        "  Retries:           {} (backoff {:?}s)",
        state.config.max_retries, state.config.backoff_secs
    );
    println!("  Step timeout:      {}s", state.config.step_timeout_secs);
    println!("  Stale after:       {} min", state.config.stale_run_minutes);
    println!();

    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Database: {}", style("SQLite (WAL mode)").dim());
    println!();

    Ok(())
}
