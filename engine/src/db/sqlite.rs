//! SQLite store
//!
//! Relational provider on top of the shared sqlx pool. Each statement is
//! atomic and WAL mode gives every read a committed snapshot, so eviction
//! running on another connection never tears a result set.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use super::{ContextStore, ConversationRecord, Task};

/// `ContextStore` backed by SQLite
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &SqliteRow) -> Result<ConversationRecord> {
        let timestamp_us: i64 = row.get("timestamp_us");
        let seq: i64 = row.get("seq");
        let tokens: i64 = row.get("tokens");
        let context_ids: String = row.get("context_ids");
        Ok(ConversationRecord {
            id: row.get("id"),
            session_id: row.get("session_id"),
            source: row.get("source"),
            input: row.get("input"),
            output: row.get("output"),
            tokens: tokens as u64,
            context_ids: serde_json::from_str(&context_ids)
                .context("Failed to decode record context ids")?,
            timestamp: from_micros(timestamp_us)?,
            seq: seq as u64,
        })
    }

    fn row_to_task(row: &SqliteRow) -> Result<Task> {
        let body: String = row.get("body");
        serde_json::from_str(&body).context("Failed to decode stored task")
    }
}

fn from_micros(us: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us).with_context(|| format!("Invalid timestamp {}", us))
}

#[async_trait]
impl ContextStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert_record(&self, record: &ConversationRecord) -> Result<()> {
        let context_ids =
            serde_json::to_string(&record.context_ids).context("Failed to encode context ids")?;

        sqlx::query(
            r#"
            INSERT INTO conversation_history
                (id, session_id, source, input, output, tokens, context_ids, timestamp_us, seq)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.session_id)
        .bind(&record.source)
        .bind(&record.input)
        .bind(&record.output)
        .bind(record.tokens as i64)
        .bind(context_ids)
        .bind(record.timestamp.timestamp_micros())
        .bind(record.seq as i64)
        .execute(&self.pool)
        .await
        .context("Failed to insert conversation record")?;

        Ok(())
    }

    async fn session_records(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ConversationRecord>> {
        // LIMIT -1 means no limit in SQLite
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let rows = sqlx::query(
            r#"
            SELECT id, session_id, source, input, output, tokens, context_ids, timestamp_us, seq
            FROM conversation_history
            WHERE session_id = ?
            ORDER BY timestamp_us DESC, seq DESC
            LIMIT ?
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch session records")?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn count_session_records(&self, session_id: &str) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conversation_history WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await
                .context("Failed to count session records")?;

        Ok(count as usize)
    }

    async fn delete_records(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let ids_json = serde_json::to_string(ids)?;
        let result = sqlx::query(
            "DELETE FROM conversation_history WHERE id IN (SELECT value FROM json_each(?))",
        )
        .bind(ids_json)
        .execute(&self.pool)
        .await
        .context("Failed to delete conversation records")?;

        Ok(result.rows_affected())
    }

    async fn delete_session_records_before(
        &self,
        session_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM conversation_history WHERE session_id = ? AND timestamp_us < ?",
        )
        .bind(session_id)
        .bind(cutoff.timestamp_micros())
        .execute(&self.pool)
        .await
        .context("Failed to delete expired session records")?;

        Ok(result.rows_affected())
    }

    async fn delete_records_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM conversation_history WHERE timestamp_us < ?")
            .bind(cutoff.timestamp_micros())
            .execute(&self.pool)
            .await
            .context("Failed to delete expired records")?;

        Ok(result.rows_affected())
    }

    async fn clear_session(&self, session_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM conversation_history WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("Failed to clear session")?;

        Ok(result.rows_affected())
    }

    async fn session_ids(&self) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT session_id FROM conversation_history ORDER BY session_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list sessions")?;

        Ok(ids)
    }

    async fn put_task(&self, task: &Task) -> Result<()> {
        let body = serde_json::to_string(task).context("Failed to encode task")?;

        sqlx::query(
            r#"
            INSERT INTO tasks (task_id, state, body, created_at_us, updated_at_us)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(task_id) DO UPDATE SET
                state = excluded.state,
                body = excluded.body,
                updated_at_us = excluded.updated_at_us
            "#,
        )
        .bind(&task.task_id)
        .bind(task.state.as_str())
        .bind(body)
        .bind(task.created_at.timestamp_micros())
        .bind(task.updated_at.timestamp_micros())
        .execute(&self.pool)
        .await
        .context("Failed to store task")?;

        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT body FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch task")?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn recent_tasks(&self, limit: usize) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT body FROM tasks ORDER BY updated_at_us DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch recent tasks")?;

        rows.iter().map(Self::row_to_task).collect()
    }
}
