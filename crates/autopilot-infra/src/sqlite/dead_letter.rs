//! SQLite dead-letter store.
//!
//! Records are inserted once and never updated or deleted. Operator requeues
//! append rows to `requeue_history`, which is folded back into
//! `DeadLetterRecord::requeue_history` on read.

use autopilot_core::repository::dead_letter::DeadLetterStore;
use autopilot_types::dead_letter::{DeadLetterRecord, RequeueEntry};
use autopilot_types::error::RepositoryError;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{
    enum_str, format_datetime, from_json, parse_datetime, parse_enum, parse_uuid, query_err,
    to_json,
};

pub struct SqliteDeadLetterStore {
    pool: DatabasePool,
}

impl SqliteDeadLetterStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn with_history(&self, row: &SqliteRow) -> Result<DeadLetterRecord, RepositoryError> {
        let mut record = DeadLetterRow::from_row(row).map_err(query_err)?.into_record()?;
        let rows = sqlx::query(
            "SELECT actor, reason, strategy, requested_at FROM requeue_history WHERE dead_letter_id = ? ORDER BY id ASC",
        )
        .bind(record.id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        for row in &rows {
            let strategy: String = row.try_get("strategy").map_err(query_err)?;
            let requested_at: String = row.try_get("requested_at").map_err(query_err)?;
            record.requeue_history.push(RequeueEntry {
                actor: row.try_get("actor").map_err(query_err)?,
                reason: row.try_get("reason").map_err(query_err)?,
                strategy: parse_enum(&strategy, "requeue strategy")?,
                at: parse_datetime(&requested_at)?,
            });
        }
        Ok(record)
    }

    async fn collect(&self, rows: Vec<SqliteRow>) -> Result<Vec<DeadLetterRecord>, RepositoryError> {
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(self.with_history(row).await?);
        }
        Ok(records)
    }
}

struct DeadLetterRow {
    id: String,
    workflow_id: String,
    org_id: String,
    template: String,
    failed_step: String,
    final_failure_class: String,
    original_input_hash: String,
    step_history: String,
    error_history: String,
    created_at: String,
}

impl DeadLetterRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            org_id: row.try_get("org_id")?,
            template: row.try_get("template")?,
            failed_step: row.try_get("failed_step")?,
            final_failure_class: row.try_get("final_failure_class")?,
            original_input_hash: row.try_get("original_input_hash")?,
            step_history: row.try_get("step_history")?,
            error_history: row.try_get("error_history")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_record(self) -> Result<DeadLetterRecord, RepositoryError> {
        Ok(DeadLetterRecord {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            org_id: self.org_id,
            template: parse_enum(&self.template, "template")?,
            failed_step: self.failed_step,
            final_failure_class: parse_enum(&self.final_failure_class, "failure class")?,
            original_input_hash: self.original_input_hash,
            step_history: from_json(&self.step_history, "step history")?,
            error_history: from_json(&self.error_history, "error history")?,
            requeue_history: Vec::new(),
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

impl DeadLetterStore for SqliteDeadLetterStore {
    async fn insert(&self, record: &DeadLetterRecord) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let inserted = sqlx::query(
            r#"INSERT INTO dead_letters
               (id, workflow_id, org_id, template, failed_step, final_failure_class,
                original_input_hash, step_history, error_history, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.id.to_string())
        .bind(record.workflow_id.to_string())
        .bind(&record.org_id)
        .bind(enum_str(&record.template)?)
        .bind(&record.failed_step)
        .bind(enum_str(&record.final_failure_class)?)
        .bind(&record.original_input_hash)
        .bind(to_json(&record.step_history)?)
        .bind(to_json(&record.error_history)?)
        .bind(format_datetime(&record.created_at))
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE") => {
                return Err(RepositoryError::Conflict(format!(
                    "dead-letter record {} already exists",
                    record.id
                )));
            }
            Err(e) => return Err(query_err(e)),
        }

        for entry in &record.requeue_history {
            insert_requeue(&mut tx, &record.id, entry).await?;
        }
        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<DeadLetterRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM dead_letters WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => Ok(Some(self.with_history(&row).await?)),
            None => Ok(None),
        }
    }

    async fn latest_for_workflow(
        &self,
        workflow_id: &Uuid,
    ) -> Result<Option<DeadLetterRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM dead_letters WHERE workflow_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(workflow_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        match row {
            Some(row) => Ok(Some(self.with_history(&row).await?)),
            None => Ok(None),
        }
    }

    async fn append_requeue(&self, id: &Uuid, entry: &RequeueEntry) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM dead_letters WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_err)?;
        if exists.is_none() {
            return Err(RepositoryError::NotFound);
        }

        insert_requeue(&mut tx, id, entry).await?;
        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn search(
        &self,
        org_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<DeadLetterRecord>, RepositoryError> {
        let mut sql = String::from("SELECT * FROM dead_letters WHERE org_id = ?");
        if from.is_some() {
            sql.push_str(" AND created_at >= ?");
        }
        if to.is_some() {
            sql.push_str(" AND created_at <= ?");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");

        let mut query = sqlx::query(&sql).bind(org_id);
        if let Some(from) = from {
            query = query.bind(format_datetime(&from));
        }
        if let Some(to) = to {
            query = query.bind(format_datetime(&to));
        }

        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        self.collect(rows).await
    }

    async fn count(&self, org_id: Option<&str>) -> Result<u64, RepositoryError> {
        let (count,): (i64,) = match org_id {
            Some(org_id) => {
                sqlx::query_as("SELECT COUNT(*) FROM dead_letters WHERE org_id = ?")
                    .bind(org_id)
                    .fetch_one(&self.pool.reader)
                    .await
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM dead_letters")
                    .fetch_one(&self.pool.reader)
                    .await
            }
        }
        .map_err(query_err)?;
        Ok(count.max(0) as u64)
    }
}

async fn insert_requeue(
    conn: &mut SqliteConnection,
    dead_letter_id: &Uuid,
    entry: &RequeueEntry,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO requeue_history (dead_letter_id, actor, reason, strategy, requested_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(dead_letter_id.to_string())
    .bind(&entry.actor)
    .bind(&entry.reason)
    .bind(enum_str(&entry.strategy)?)
    .bind(format_datetime(&entry.at))
    .execute(conn)
    .await
    .map_err(query_err)?;
    Ok(())
}
