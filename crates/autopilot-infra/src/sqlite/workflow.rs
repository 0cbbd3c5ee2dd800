//! SQLite workflow store.
//!
//! Workflow rows hold run-level state; `workflow_steps` holds one row per
//! step with its JSON definition and its current result. Every state write
//! and the audit row it produces are committed in one transaction.

use autopilot_core::event::audit;
use autopilot_core::repository::SortOrder;
use autopilot_core::repository::workflow::{RunFilter, WorkflowStore};
use autopilot_types::error::RepositoryError;
use autopilot_types::event::AuditEvent;
use autopilot_types::workflow::{
    AttemptRecord, ExecutionFlags, StepDefinition, StepError, StepResult, StepStatus, Workflow,
    WorkflowStatus,
};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{
    enum_str, format_datetime, from_json, parse_datetime, parse_enum, parse_opt_datetime,
    parse_uuid, query_err, to_json,
};

/// SQLite-backed implementation of `WorkflowStore`.
pub struct SqliteWorkflowStore {
    pool: DatabasePool,
}

impl SqliteWorkflowStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, rows: Vec<SqliteRow>) -> Result<Vec<Workflow>, RepositoryError> {
        let mut workflows = Vec::with_capacity(rows.len());
        for row in &rows {
            let head = WorkflowRow::from_row(row).map_err(query_err)?;
            workflows.push(self.assemble(head).await?);
        }
        Ok(workflows)
    }

    async fn assemble(&self, head: WorkflowRow) -> Result<Workflow, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM workflow_steps WHERE workflow_id = ? ORDER BY position ASC")
            .bind(&head.id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let mut steps = Vec::with_capacity(rows.len());
        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let (step, result) = StepRow::from_row(row).map_err(query_err)?.into_parts()?;
            steps.push(step);
            results.push(result);
        }
        head.into_workflow(steps, results)
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct WorkflowRow {
    id: String,
    org_id: String,
    template: String,
    status: String,
    flags: String,
    input_hash: String,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
}

impl WorkflowRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            org_id: row.try_get("org_id")?,
            template: row.try_get("template")?,
            status: row.try_get("status")?,
            flags: row.try_get("flags")?,
            input_hash: row.try_get("input_hash")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn into_workflow(
        self,
        steps: Vec<StepDefinition>,
        results: Vec<StepResult>,
    ) -> Result<Workflow, RepositoryError> {
        Ok(Workflow {
            id: parse_uuid(&self.id)?,
            org_id: self.org_id,
            template: parse_enum(&self.template, "template")?,
            status: parse_enum(&self.status, "workflow status")?,
            flags: from_json(&self.flags, "flags")?,
            input_hash: self.input_hash,
            steps,
            results,
            created_at: parse_datetime(&self.created_at)?,
            started_at: parse_opt_datetime(self.started_at.as_deref())?,
            finished_at: parse_opt_datetime(self.finished_at.as_deref())?,
        })
    }
}

struct StepRow {
    step_name: String,
    definition: String,
    status: String,
    output: Option<String>,
    output_hash: Option<String>,
    started_at: Option<String>,
    finished_at: Option<String>,
    retry_count: i64,
    error_class: Option<String>,
    error_message: Option<String>,
    idempotency_key: Option<String>,
    warnings: String,
}

impl StepRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            step_name: row.try_get("step_name")?,
            definition: row.try_get("definition")?,
            status: row.try_get("status")?,
            output: row.try_get("output")?,
            output_hash: row.try_get("output_hash")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            retry_count: row.try_get("retry_count")?,
            error_class: row.try_get("error_class")?,
            error_message: row.try_get("error_message")?,
            idempotency_key: row.try_get("idempotency_key")?,
            warnings: row.try_get("warnings")?,
        })
    }

    fn into_parts(self) -> Result<(StepDefinition, StepResult), RepositoryError> {
        let definition: StepDefinition = from_json(&self.definition, "step definition")?;
        let error = match self.error_class {
            Some(class) => Some(StepError {
                class: parse_enum(&class, "failure class")?,
                message: self.error_message.unwrap_or_default(),
            }),
            None => None,
        };
        let result = StepResult {
            step_name: self.step_name,
            status: parse_enum(&self.status, "step status")?,
            output: self
                .output
                .as_deref()
                .map(|s| from_json(s, "step output"))
                .transpose()?,
            output_hash: self.output_hash,
            started_at: parse_opt_datetime(self.started_at.as_deref())?,
            finished_at: parse_opt_datetime(self.finished_at.as_deref())?,
            retry_count: self.retry_count as u32,
            error,
            idempotency_key: self.idempotency_key,
            warnings: from_json(&self.warnings, "warnings")?,
        };
        Ok((definition, result))
    }
}

fn attempt_from_row(row: &SqliteRow) -> Result<AttemptRecord, RepositoryError> {
    let get = |e: sqlx::Error| RepositoryError::Query(e.to_string());
    let workflow_id: String = row.try_get("workflow_id").map_err(get)?;
    let outcome: String = row.try_get("outcome").map_err(get)?;
    let failure_class: Option<String> = row.try_get("failure_class").map_err(get)?;
    let started_at: String = row.try_get("started_at").map_err(get)?;
    let finished_at: String = row.try_get("finished_at").map_err(get)?;
    let attempt: i64 = row.try_get("attempt").map_err(get)?;
    let backoff_ms: i64 = row.try_get("backoff_ms").map_err(get)?;

    Ok(AttemptRecord {
        workflow_id: parse_uuid(&workflow_id)?,
        step_name: row.try_get("step_name").map_err(get)?,
        attempt: attempt as u32,
        outcome: parse_enum(&outcome, "attempt outcome")?,
        failure_class: failure_class
            .as_deref()
            .map(|c| parse_enum(c, "failure class"))
            .transpose()?,
        error: row.try_get("error").map_err(get)?,
        sampled: row.try_get("sampled").map_err(get)?,
        backoff_ms: backoff_ms as u64,
        started_at: parse_datetime(&started_at)?,
        finished_at: parse_datetime(&finished_at)?,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let get = |e: sqlx::Error| RepositoryError::Query(e.to_string());
    let id: String = row.try_get("id").map_err(get)?;
    let kind: String = row.try_get("kind").map_err(get)?;
    let workflow_id: String = row.try_get("workflow_id").map_err(get)?;
    let started_at: Option<String> = row.try_get("started_at").map_err(get)?;
    let finished_at: Option<String> = row.try_get("finished_at").map_err(get)?;
    let recorded_at: String = row.try_get("recorded_at").map_err(get)?;

    Ok(AuditEvent {
        id: parse_uuid(&id)?,
        kind: parse_enum(&kind, "event kind")?,
        org_id: row.try_get("org_id").map_err(get)?,
        workflow_id: parse_uuid(&workflow_id)?,
        step_id: row.try_get("step_id").map_err(get)?,
        status: row.try_get("status").map_err(get)?,
        error_code: row.try_get("error_code").map_err(get)?,
        started_at: parse_opt_datetime(started_at.as_deref())?,
        finished_at: parse_opt_datetime(finished_at.as_deref())?,
        detail: row.try_get("detail").map_err(get)?,
        recorded_at: parse_datetime(&recorded_at)?,
    })
}

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

pub(crate) async fn insert_event(
    conn: &mut SqliteConnection,
    event: &AuditEvent,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"INSERT INTO audit_events
           (id, kind, org_id, workflow_id, step_id, status, error_code,
            started_at, finished_at, detail, recorded_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(event.id.to_string())
    .bind(enum_str(&event.kind)?)
    .bind(&event.org_id)
    .bind(event.workflow_id.to_string())
    .bind(&event.step_id)
    .bind(&event.status)
    .bind(&event.error_code)
    .bind(event.started_at.as_ref().map(format_datetime))
    .bind(event.finished_at.as_ref().map(format_datetime))
    .bind(&event.detail)
    .bind(format_datetime(&event.recorded_at))
    .execute(conn)
    .await
    .map_err(query_err)?;
    Ok(())
}

async fn org_of(conn: &mut SqliteConnection, workflow_id: &Uuid) -> Result<String, RepositoryError> {
    let row: Option<(String,)> = sqlx::query_as("SELECT org_id FROM workflows WHERE id = ?")
        .bind(workflow_id.to_string())
        .fetch_optional(conn)
        .await
        .map_err(query_err)?;
    row.map(|r| r.0).ok_or(RepositoryError::NotFound)
}

async fn current_step(
    conn: &mut SqliteConnection,
    workflow_id: &Uuid,
    step_name: &str,
) -> Result<StepResult, RepositoryError> {
    let row = sqlx::query("SELECT * FROM workflow_steps WHERE workflow_id = ? AND step_name = ?")
        .bind(workflow_id.to_string())
        .bind(step_name)
        .fetch_optional(conn)
        .await
        .map_err(query_err)?
        .ok_or(RepositoryError::NotFound)?;
    let (_, result) = StepRow::from_row(&row).map_err(query_err)?.into_parts()?;
    Ok(result)
}

async fn write_step(
    conn: &mut SqliteConnection,
    workflow_id: &Uuid,
    result: &StepResult,
) -> Result<(), RepositoryError> {
    let output = result.output.as_ref().map(to_json).transpose()?;
    let error_class = result
        .error
        .as_ref()
        .map(|e| enum_str(&e.class))
        .transpose()?;

    sqlx::query(
        r#"UPDATE workflow_steps SET
             status = ?, output = ?, output_hash = ?, started_at = ?, finished_at = ?,
             retry_count = ?, error_class = ?, error_message = ?, idempotency_key = ?,
             warnings = ?
           WHERE workflow_id = ? AND step_name = ?"#,
    )
    .bind(enum_str(&result.status)?)
    .bind(output)
    .bind(&result.output_hash)
    .bind(result.started_at.as_ref().map(format_datetime))
    .bind(result.finished_at.as_ref().map(format_datetime))
    .bind(result.retry_count as i64)
    .bind(error_class)
    .bind(result.error.as_ref().map(|e| e.message.clone()))
    .bind(&result.idempotency_key)
    .bind(to_json(&result.warnings)?)
    .bind(workflow_id.to_string())
    .bind(&result.step_name)
    .execute(conn)
    .await
    .map_err(query_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// WorkflowStore impl
// ---------------------------------------------------------------------------

impl WorkflowStore for SqliteWorkflowStore {
    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let inserted = sqlx::query(
            r#"INSERT INTO workflows
               (id, org_id, template, status, flags, input_hash, created_at, started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.org_id)
        .bind(enum_str(&workflow.template)?)
        .bind(enum_str(&workflow.status)?)
        .bind(to_json(&workflow.flags)?)
        .bind(&workflow.input_hash)
        .bind(format_datetime(&workflow.created_at))
        .bind(workflow.started_at.as_ref().map(format_datetime))
        .bind(workflow.finished_at.as_ref().map(format_datetime))
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE") => {
                return Err(RepositoryError::Conflict(format!(
                    "workflow {} already exists",
                    workflow.id
                )));
            }
            Err(e) => return Err(query_err(e)),
        }

        for (position, step) in workflow.steps.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO workflow_steps (workflow_id, org_id, step_name, position, definition)
                   VALUES (?, ?, ?, ?, ?)"#,
            )
            .bind(workflow.id.to_string())
            .bind(&workflow.org_id)
            .bind(&step.name)
            .bind(position as i64)
            .bind(to_json(step)?)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;

            let result = workflow
                .result(&step.name)
                .cloned()
                .unwrap_or_else(|| StepResult::pending(&step.name));
            write_step(&mut tx, &workflow.id, &result).await?;
        }

        let event = audit::workflow_transition(&workflow.org_id, workflow.id, workflow.status);
        insert_event(&mut tx, &event).await?;

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let head = WorkflowRow::from_row(&row).map_err(query_err)?;
                Ok(Some(self.assemble(head).await?))
            }
            None => Ok(None),
        }
    }

    async fn update_status(
        &self,
        id: &Uuid,
        status: WorkflowStatus,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        let org_id = org_of(&mut tx, id).await?;

        let at = format_datetime(&at);
        let (started_at, finished_at) = match status {
            WorkflowStatus::Running => (Some(at.clone()), None),
            WorkflowStatus::Queued => (None, None),
            _ => (None, Some(at.clone())),
        };

        sqlx::query(
            r#"UPDATE workflows SET
                 status = ?,
                 started_at = COALESCE(started_at, ?),
                 finished_at = ?
               WHERE id = ?"#,
        )
        .bind(enum_str(&status)?)
        .bind(started_at)
        .bind(finished_at)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        insert_event(&mut tx, &audit::workflow_transition(&org_id, *id, status)).await?;
        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn update_flags(&self, id: &Uuid, flags: ExecutionFlags) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE workflows SET flags = ? WHERE id = ?")
            .bind(to_json(&flags)?)
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Workflow>, RepositoryError> {
        let mut sql = String::from("SELECT * FROM workflows");
        let mut conditions: Vec<&str> = Vec::new();
        if filter.org_id.is_some() {
            conditions.push("org_id = ?");
        }
        if filter.status.is_some() {
            conditions.push("status = ?");
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        let order = match filter.sort_order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        sql.push_str(&format!(" ORDER BY created_at {order}, id {order}"));
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit.max(0)));
        }

        let mut query = sqlx::query(&sql);
        if let Some(org_id) = &filter.org_id {
            query = query.bind(org_id.clone());
        }
        if let Some(status) = filter.status {
            query = query.bind(enum_str(&status)?);
        }

        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        self.hydrate(rows).await
    }

    async fn list_by_org_and_date_range(
        &self,
        org_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflows WHERE org_id = ? AND created_at >= ? AND created_at <= ? ORDER BY created_at ASC, id ASC",
        )
        .bind(org_id)
        .bind(format_datetime(&from))
        .bind(format_datetime(&to))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        self.hydrate(rows).await
    }

    async fn list_by_status(
        &self,
        org_id: Option<&str>,
        status: WorkflowStatus,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let status = enum_str(&status)?;
        let rows = match org_id {
            Some(org_id) => {
                sqlx::query(
                    "SELECT * FROM workflows WHERE org_id = ? AND status = ? ORDER BY created_at ASC, id ASC",
                )
                .bind(org_id)
                .bind(&status)
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM workflows WHERE status = ? ORDER BY created_at ASC, id ASC")
                    .bind(&status)
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(query_err)?;
        self.hydrate(rows).await
    }

    async fn upsert_step(
        &self,
        workflow_id: &Uuid,
        result: &StepResult,
    ) -> Result<StepResult, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        let org_id = org_of(&mut tx, workflow_id).await?;

        // Success wins: a stored success is returned untouched.
        let current = current_step(&mut tx, workflow_id, &result.step_name).await?;
        if current.is_success() {
            tx.rollback().await.map_err(query_err)?;
            return Ok(current);
        }

        write_step(&mut tx, workflow_id, result).await?;
        insert_event(&mut tx, &audit::step_transition(&org_id, *workflow_id, result)).await?;
        tx.commit().await.map_err(query_err)?;
        Ok(result.clone())
    }

    async fn reset_step(&self, workflow_id: &Uuid, step_name: &str) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        let org_id = org_of(&mut tx, workflow_id).await?;

        let current = current_step(&mut tx, workflow_id, step_name).await?;
        if current.status == StepStatus::Success {
            tx.rollback().await.map_err(query_err)?;
            return Ok(false);
        }

        let pending = StepResult::pending(step_name);
        write_step(&mut tx, workflow_id, &pending).await?;
        insert_event(&mut tx, &audit::step_transition(&org_id, *workflow_id, &pending)).await?;
        tx.commit().await.map_err(query_err)?;
        Ok(true)
    }

    async fn record_attempt(&self, attempt: &AttemptRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO step_attempts
               (workflow_id, step_name, attempt, outcome, failure_class, error,
                sampled, backoff_ms, started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(attempt.workflow_id.to_string())
        .bind(&attempt.step_name)
        .bind(attempt.attempt as i64)
        .bind(enum_str(&attempt.outcome)?)
        .bind(attempt.failure_class.as_ref().map(enum_str).transpose()?)
        .bind(&attempt.error)
        .bind(attempt.sampled)
        .bind(attempt.backoff_ms as i64)
        .bind(format_datetime(&attempt.started_at))
        .bind(format_datetime(&attempt.finished_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn list_attempts(&self, workflow_id: &Uuid) -> Result<Vec<AttemptRecord>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM step_attempts WHERE workflow_id = ? ORDER BY id ASC")
            .bind(workflow_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        rows.iter().map(attempt_from_row).collect()
    }

    async fn append_audit_event(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let mut conn = self.pool.writer.acquire().await.map_err(query_err)?;
        insert_event(&mut conn, event).await
    }

    async fn list_audit_events(&self, workflow_id: &Uuid) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM audit_events WHERE workflow_id = ? ORDER BY seq ASC")
            .bind(workflow_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        rows.iter().map(event_from_row).collect()
    }
}
