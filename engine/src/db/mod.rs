/// Storage module
///
/// This module defines the `ContextStore` contract that every storage backend
/// implements, and the SQLite connection handling used by the relational
/// backend. Tasks and conversation records are the only persisted entities;
/// backends must support keyed lookup by `task_id` / `session_id` and
/// timestamp-ordered scans.
///
/// Backends are chosen by connection-string scheme in [`factory::open_store`].
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

pub mod factory;
pub mod memory;
pub mod records;
pub mod sqlite;
pub mod tasks;

// Re-export commonly used types
pub use factory::open_store;
pub use memory::MemoryStore;
pub use records::ConversationRecord;
pub use sqlite::SqliteStore;
pub use tasks::{
    Approvals, InternalResearch, RequirementsVersion, ResearchRequirement, ResearchScope,
    RiskAssessment, Task, TaskMetadata,
};

/// Durable record storage behind a narrow interface
///
/// Reads must be snapshot-consistent: a concurrent delete never removes a
/// record out from under a read that is already in progress.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Backend name for logging ("memory", "sqlite")
    fn name(&self) -> &str;

    /// Insert a conversation record
    async fn insert_record(&self, record: &ConversationRecord) -> Result<()>;

    /// Records of a session, most recent first, optionally limited
    async fn session_records(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ConversationRecord>>;

    /// Number of records currently held for a session
    async fn count_session_records(&self, session_id: &str) -> Result<usize>;

    /// Delete records by id; returns the number removed
    async fn delete_records(&self, ids: &[String]) -> Result<u64>;

    /// Delete one session's records older than `cutoff`
    async fn delete_session_records_before(
        &self,
        session_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64>;

    /// Delete every record older than `cutoff`, across sessions
    async fn delete_records_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Delete all records of a session
    async fn clear_session(&self, session_id: &str) -> Result<u64>;

    /// Sessions that currently hold at least one record
    async fn session_ids(&self) -> Result<Vec<String>>;

    /// Insert or replace a task
    async fn put_task(&self, task: &Task) -> Result<()>;

    /// Fetch a task by id
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>>;

    /// Most recently updated tasks first
    async fn recent_tasks(&self, limit: usize) -> Result<Vec<Task>>;
}

/// Map a storage failure onto the caller-facing taxonomy
pub fn storage_error(err: anyhow::Error) -> sdk::errors::WorkflowError {
    sdk::errors::WorkflowError::Storage(format!("{:#}", err))
}

/// SQLite connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) a database file
    ///
    /// This will:
    /// 1. Create the parent directory if needed
    /// 2. Enable WAL mode so readers never wait on the evicting writer
    /// 3. Run migrations to set up the schema
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Initializing database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!("Database connection established");

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    ///
    /// Migrations are idempotent and can be run multiple times safely.
    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::raw_sql(include_str!("../../migrations/001_initial.sql"))
            .execute(&self.pool)
            .await
            .context("Failed to execute migration 001_initial.sql")?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checkpoint the WAL and close all connections
    pub async fn close(self) -> Result<()> {
        info!("Closing database connection");

        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;

        self.pool.close().await;
        Ok(())
    }

    /// Wrap the pool in the `ContextStore` implementation
    pub fn store(&self) -> SqliteStore {
        SqliteStore::new(self.pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("arbiter.db");

        let db = Database::new(&db_path).await.unwrap();
        assert!(db_path.exists());

        let result = sqlx::query("SELECT 1").fetch_one(db.pool()).await;
        assert!(result.is_ok());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("arbiter.db");

        let db = Database::new(&db_path).await.unwrap();

        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(db.pool())
                .await
                .unwrap();

        assert!(tables.contains(&"conversation_history".to_string()));
        assert!(tables.contains(&"tasks".to_string()));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("arbiter.db");

        let db = Database::new(&db_path).await.unwrap();
        db.close().await.unwrap();

        let reopened = Database::new(&db_path).await.unwrap();
        let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(reopened.pool())
            .await
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");
        reopened.close().await.unwrap();
    }
}
