//! Application state wiring the engine to its infrastructure.
//!
//! The orchestrator is generic over store, tool and gate traits; AppState
//! pins it to the SQLite stores, the simulated tool and the config-driven
//! gate.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use autopilot_core::event::bus::EventBus;
use autopilot_core::workflow::orchestrator::{Orchestrator, ReapReport};
use autopilot_infra::config::{load_engine_config, resolve_data_dir};
use autopilot_infra::crypto::hash::Sha256ContentHasher;
use autopilot_infra::gate::policy::StaticPolicyGate;
use autopilot_infra::sqlite::dead_letter::SqliteDeadLetterStore;
use autopilot_infra::sqlite::pool::{DatabasePool, database_url};
use autopilot_infra::sqlite::workflow::SqliteWorkflowStore;
use autopilot_infra::tool::simulated::{FailureInjection, SimulatedTool};
use autopilot_observe::fields::AUDIT_TARGET;
use autopilot_types::config::EngineConfig;
use autopilot_types::event::AuditEvent;

/// Orchestrator generics pinned to infra implementations.
pub type ConcreteOrchestrator =
    Orchestrator<SqliteWorkflowStore, SqliteDeadLetterStore, SimulatedTool, StaticPolicyGate>;

pub struct AppState {
    pub orchestrator: ConcreteOrchestrator,
    pub config: EngineConfig,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
    /// Stale runs closed while starting up.
    pub startup_reap: ReapReport,
    audit_logger: JoinHandle<()>,
}

impl AppState {
    /// Connect to the database, wire the orchestrator and bring admission
    /// state back in line with what is persisted.
    pub async fn init(injections: Vec<FailureInjection>) -> anyhow::Result<Self> {
        Self::init_at(resolve_data_dir(), injections).await
    }

    pub async fn init_at(
        data_dir: PathBuf,
        injections: Vec<FailureInjection>,
    ) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

        let config = load_engine_config(&data_dir).await;
        let db_pool = DatabasePool::new(&database_url(&data_dir))
            .await
            .context("Failed to open the workflow database")?;

        let bus = EventBus::new(config.event_bus_capacity);
        let audit_logger = spawn_audit_logger(&bus);

        let orchestrator = Orchestrator::new(
            Arc::new(SqliteWorkflowStore::new(db_pool.clone())),
            Arc::new(SqliteDeadLetterStore::new(db_pool.clone())),
            Arc::new(SimulatedTool::new(injections)),
            Arc::new(StaticPolicyGate::new(&config.gate)),
            Arc::new(Sha256ContentHasher::new()),
            &config,
            bus,
        );

        orchestrator
            .restore_admission()
            .await
            .context("Failed to restore admission state")?;
        let startup_reap = orchestrator
            .reap_stale(Utc::now())
            .await
            .context("Failed to reap stale runs")?;

        Ok(Self {
            orchestrator,
            config,
            data_dir,
            db_pool,
            startup_reap,
            audit_logger,
        })
    }

    /// Drop the engine and let the audit logger drain what is left.
    pub async fn shutdown(self) {
        let Self {
            orchestrator,
            audit_logger,
            ..
        } = self;
        drop(orchestrator);
        if tokio::time::timeout(Duration::from_millis(500), audit_logger)
            .await
            .is_err()
        {
            tracing::debug!("audit logger did not drain before exit");
        }
    }
}

/// Mirror every audit event onto the `audit` tracing target.
fn spawn_audit_logger(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_audit_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(target: AUDIT_TARGET, skipped, "audit logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_audit_event(event: &AuditEvent) {
    tracing::info!(
        target: AUDIT_TARGET,
        kind = %event.kind,
        org_id = %event.org_id,
        workflow_id = %event.workflow_id,
        step = event.step_id.as_deref().unwrap_or("-"),
        status = %event.status,
        error_code = event.error_code.as_deref().unwrap_or("-"),
        detail = event.detail.as_deref().unwrap_or(""),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_types::workflow::{ExecutionFlags, RequeueStrategy, WorkflowStatus, WorkflowTemplate};

    #[tokio::test]
    async fn test_dead_letter_survives_restart_and_requeues() {
        let dir = tempfile::tempdir().unwrap();
        let injections = vec!["select_template=malformed_response".parse().unwrap()];

        let state = AppState::init_at(dir.path().to_path_buf(), injections)
            .await
            .unwrap();
        let submission = state
            .orchestrator
            .submit("org_acme", WorkflowTemplate::Dashboard, ExecutionFlags::default())
            .await
            .unwrap();
        assert!(submission.is_running());
        let report = state
            .orchestrator
            .execute(submission.workflow_id)
            .await
            .unwrap();
        assert_eq!(report.status, WorkflowStatus::Failed);
        assert!(report.dead_letter_id.is_some());
        state.shutdown().await;

        // A fresh process sees the record and can recover the run.
        let state = AppState::init_at(dir.path().to_path_buf(), Vec::new())
            .await
            .unwrap();
        assert_eq!(state.startup_reap, ReapReport::default());
        let record = state
            .orchestrator
            .dead_letters()
            .latest(&submission.workflow_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.failed_step, "select_template");

        let requeued = state
            .orchestrator
            .requeue(submission.workflow_id, "oncall", RequeueStrategy::Retry, "fixed")
            .await
            .unwrap();
        assert!(requeued.is_running());
        let report = state
            .orchestrator
            .execute(submission.workflow_id)
            .await
            .unwrap();
        assert_eq!(report.status, WorkflowStatus::Success);
        assert_eq!(
            report.completed_steps,
            vec!["load_catalog", "select_template", "store_artifact"]
        );
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_queued_runs_restored_on_startup() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::init_at(dir.path().to_path_buf(), Vec::new())
            .await
            .unwrap();
        let limit = state.config.concurrency_limit;
        let mut ids = Vec::new();
        for _ in 0..limit + 2 {
            let s = state
                .orchestrator
                .submit("org_acme", WorkflowTemplate::Memo, ExecutionFlags::default())
                .await
                .unwrap();
            ids.push(s.workflow_id);
        }
        state.shutdown().await;

        let state = AppState::init_at(dir.path().to_path_buf(), Vec::new())
            .await
            .unwrap();
        let snapshot = state.orchestrator.queue_snapshot("org_acme").await;
        assert_eq!(snapshot.running, ids[..limit].to_vec());
        assert_eq!(snapshot.queued, ids[limit..].to_vec());
        state.shutdown().await;
    }
}
