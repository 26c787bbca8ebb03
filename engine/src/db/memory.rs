//! In-memory store
//!
//! Process-local provider used when no database URL is configured. Reads
//! copy the matching records out under a shared lock, so a concurrent
//! eviction can never shrink a result that is already being returned.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{ContextStore, ConversationRecord, Task};

/// `ContextStore` backed by hash maps
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, Vec<ConversationRecord>>>>,
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn insert_record(&self, record: &ConversationRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records
            .entry(record.session_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn session_records(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ConversationRecord>> {
        let mut snapshot = {
            let records = self.records.read().await;
            records.get(session_id).cloned().unwrap_or_default()
        };

        snapshot.sort_by(ConversationRecord::newest_first);
        if let Some(limit) = limit {
            snapshot.truncate(limit);
        }
        Ok(snapshot)
    }

    async fn count_session_records(&self, session_id: &str) -> Result<usize> {
        let records = self.records.read().await;
        Ok(records.get(session_id).map(Vec::len).unwrap_or(0))
    }

    async fn delete_records(&self, ids: &[String]) -> Result<u64> {
        let mut records = self.records.write().await;
        let mut removed = 0u64;
        for session in records.values_mut() {
            let before = session.len();
            session.retain(|r| !ids.contains(&r.id));
            removed += (before - session.len()) as u64;
        }
        records.retain(|_, session| !session.is_empty());
        Ok(removed)
    }

    async fn delete_session_records_before(
        &self,
        session_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let mut records = self.records.write().await;
        let Some(session) = records.get_mut(session_id) else {
            return Ok(0);
        };

        let before = session.len();
        session.retain(|r| r.timestamp >= cutoff);
        let removed = (before - session.len()) as u64;

        if session.is_empty() {
            records.remove(session_id);
        }
        Ok(removed)
    }

    async fn delete_records_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.write().await;
        let mut removed = 0u64;
        for session in records.values_mut() {
            let before = session.len();
            session.retain(|r| r.timestamp >= cutoff);
            removed += (before - session.len()) as u64;
        }
        records.retain(|_, session| !session.is_empty());
        Ok(removed)
    }

    async fn clear_session(&self, session_id: &str) -> Result<u64> {
        let mut records = self.records.write().await;
        Ok(records
            .remove(session_id)
            .map(|session| session.len() as u64)
            .unwrap_or(0))
    }

    async fn session_ids(&self) -> Result<Vec<String>> {
        let records = self.records.read().await;
        let mut ids: Vec<String> = records.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn put_task(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(task_id).cloned())
    }

    async fn recent_tasks(&self, limit: usize) -> Result<Vec<Task>> {
        let mut snapshot: Vec<Task> = {
            let tasks = self.tasks.read().await;
            tasks.values().cloned().collect()
        };
        snapshot.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        snapshot.truncate(limit);
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TaskMetadata;
    use chrono::Duration;
    use sdk::types::TaskState;

    fn record(session: &str, seq: u64, timestamp: DateTime<Utc>) -> ConversationRecord {
        ConversationRecord {
            id: format!("{}-{}", session, seq),
            session_id: session.to_string(),
            source: "judge-plan".to_string(),
            input: format!("in {}", seq),
            output: format!("out {}", seq),
            tokens: 2,
            context_ids: Vec::new(),
            timestamp,
            seq,
        }
    }

    fn task(id: &str, updated_at: DateTime<Utc>) -> Task {
        Task {
            task_id: id.to_string(),
            state: TaskState::Created,
            title: id.to_string(),
            description: String::new(),
            requirements: String::new(),
            acceptance_criteria: Vec::new(),
            metadata: TaskMetadata::default(),
            created_at: updated_at,
            updated_at,
        }
    }

    #[tokio::test]
    async fn test_session_records_newest_first() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_record(&record("s1", 1, now)).await.unwrap();
        store
            .insert_record(&record("s1", 2, now + Duration::seconds(1)))
            .await
            .unwrap();
        store.insert_record(&record("s2", 3, now)).await.unwrap();

        let records = store.session_records("s1", None).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].seq, 2);

        let limited = store.session_records("s1", Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].seq, 2);
    }

    #[tokio::test]
    async fn test_snapshot_survives_concurrent_delete() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for seq in 0..5 {
            store.insert_record(&record("s1", seq, now)).await.unwrap();
        }

        let snapshot = store.session_records("s1", None).await.unwrap();
        store.clear_session("s1").await.unwrap();

        assert_eq!(snapshot.len(), 5);
        assert_eq!(store.count_session_records("s1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_before_cutoff() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert_record(&record("s1", 1, now - Duration::hours(2)))
            .await
            .unwrap();
        store.insert_record(&record("s1", 2, now)).await.unwrap();
        store
            .insert_record(&record("s2", 3, now - Duration::hours(2)))
            .await
            .unwrap();

        let removed = store
            .delete_session_records_before("s1", now - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.session_ids().await.unwrap(), vec!["s1", "s2"]);

        let removed = store
            .delete_records_before(now - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.session_ids().await.unwrap(), vec!["s1"]);
    }

    #[tokio::test]
    async fn test_delete_records_by_id() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_record(&record("s1", 1, now)).await.unwrap();
        store.insert_record(&record("s1", 2, now)).await.unwrap();

        let removed = store
            .delete_records(&["s1-1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count_session_records("s1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recent_tasks_ordered_by_update() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.put_task(&task("old", now - Duration::minutes(5))).await.unwrap();
        store.put_task(&task("new", now)).await.unwrap();

        let tasks = store.recent_tasks(10).await.unwrap();
        assert_eq!(tasks[0].task_id, "new");
        assert_eq!(tasks[1].task_id, "old");
        assert!(store.get_task("missing").await.unwrap().is_none());
    }
}
