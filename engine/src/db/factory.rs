//! Store factory
//!
//! Backends are selected from the connection string alone:
//!
//! | URL                     | Backend       |
//! |-------------------------|---------------|
//! | `""`, `memory://`       | `MemoryStore` |
//! | `sqlite://<path>`       | `SqliteStore` |
//! | `<path>.db`             | `SqliteStore` |
//!
//! Anything else is a configuration error.

use anyhow::Result;
use sdk::errors::WorkflowError;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::{ContextStore, Database, MemoryStore};
use crate::config::expand_path;

/// Backend chosen for a connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Sqlite(PathBuf),
}

impl StoreKind {
    /// Classify a connection string without opening anything
    pub fn parse(url: &str) -> Result<Self, WorkflowError> {
        let url = url.trim();

        if url.is_empty() || url == "memory://" {
            return Ok(StoreKind::Memory);
        }

        if let Some(path) = url.strip_prefix("sqlite://") {
            if path.is_empty() {
                return Err(WorkflowError::Config(
                    "sqlite:// URL is missing a file path".to_string(),
                ));
            }
            return Ok(StoreKind::Sqlite(PathBuf::from(path)));
        }

        if url.ends_with(".db") && !url.contains("://") {
            return Ok(StoreKind::Sqlite(PathBuf::from(url)));
        }

        Err(WorkflowError::Config(format!(
            "Unsupported database URL '{}'. Use memory://, sqlite://<path> or a .db file path",
            url
        )))
    }
}

/// Open the store a connection string points at
pub async fn open_store(url: &str) -> Result<Arc<dyn ContextStore>> {
    match StoreKind::parse(url)? {
        StoreKind::Memory => {
            info!("Using in-memory context store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreKind::Sqlite(path) => {
            let path = expand_path(&path)?;
            let db = Database::new(&path).await?;
            info!("Using SQLite context store at {}", path.display());
            Ok(Arc::new(db.store()))
        }
    }
}
