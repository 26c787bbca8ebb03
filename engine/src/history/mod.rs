//! Conversation history cache
//!
//! Session-scoped, size-bounded view of past tool invocations. Every decision
//! point reads its context through [`ConversationHistoryCache::recent`], and
//! every invocation that opts into history is recorded with
//! [`ConversationHistoryCache::save`].
//!
//! # Eviction
//!
//! Three rules keep each session bounded:
//!
//! 1. **Capacity**: a session never keeps more than `max_context_records`
//!    records; the oldest by `(timestamp, seq)` go first.
//! 2. **Budget**: the newest records are kept while their estimated tokens
//!    fit in `max_context_tokens`; everything older goes.
//! 3. **Age**: records older than the retention period are deleted.
//!
//! Eviction runs in a background task after each save and on a periodic
//! sweep. Reads apply the same bounds themselves, so a caller never observes
//! a session that eviction has not caught up with yet. Short-lived processes
//! call [`ConversationHistoryCache::flush`] before exiting so scheduled
//! evictions are not lost with the runtime.

use chrono::{DateTime, Utc};
use sdk::errors::WorkflowError;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::db::{storage_error, ContextStore, ConversationRecord};

/// Bounds applied to every session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    pub max_context_records: usize,
    pub max_context_tokens: u64,
    pub retention: Duration,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            max_context_records: 20,
            max_context_tokens: 25_000,
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl From<&DatabaseConfig> for HistoryLimits {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            max_context_records: config.max_context_records,
            max_context_tokens: config.max_context_tokens,
            retention: config.retention(),
        }
    }
}

/// What one eviction pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub over_capacity: u64,
    pub over_budget: u64,
    pub expired: u64,
}

/// Rough token count of a text, four characters per token rounded up
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Length of the newest-first prefix that fits both the count and token bounds
fn retained_prefix(records: &[ConversationRecord], limits: &HistoryLimits) -> usize {
    let mut tokens = 0u64;
    records
        .iter()
        .take(limits.max_context_records)
        .take_while(|r| {
            tokens = tokens.saturating_add(r.tokens);
            tokens <= limits.max_context_tokens
        })
        .count()
}

/// Per-session bounded history on top of a `ContextStore`
#[derive(Clone)]
pub struct ConversationHistoryCache {
    store: Arc<dyn ContextStore>,
    limits: HistoryLimits,
    seq: Arc<AtomicU64>,
    last_timestamp_us: Arc<AtomicI64>,
    pending: Arc<Mutex<JoinSet<()>>>,
}

impl ConversationHistoryCache {
    pub fn new(store: Arc<dyn ContextStore>, limits: HistoryLimits) -> Self {
        Self {
            store,
            limits,
            seq: Arc::new(AtomicU64::new(0)),
            last_timestamp_us: Arc::new(AtomicI64::new(i64::MIN)),
            pending: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn limits(&self) -> HistoryLimits {
        self.limits
    }

    /// Record one invocation and schedule eviction for its session
    ///
    /// Eviction runs on a spawned task; the caller never waits for it.
    pub async fn save(
        &self,
        session_id: &str,
        source: &str,
        input: &str,
        output: &str,
    ) -> Result<String, WorkflowError> {
        self.save_with_context(session_id, source, input, output, Vec::new())
            .await
    }

    /// Same as [`Self::save`], remembering which records were read as context
    pub async fn save_with_context(
        &self,
        session_id: &str,
        source: &str,
        input: &str,
        output: &str,
        context_ids: Vec<String>,
    ) -> Result<String, WorkflowError> {
        let record = ConversationRecord {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            source: source.to_string(),
            input: input.to_string(),
            output: output.to_string(),
            tokens: estimate_tokens(input) + estimate_tokens(output),
            context_ids,
            timestamp: self.next_timestamp(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
        };

        self.store
            .insert_record(&record)
            .await
            .map_err(storage_error)?;

        debug!(
            session_id = %session_id,
            record_id = %record.id,
            source = %source,
            tokens = record.tokens,
            "Saved conversation record"
        );

        let cache = self.clone();
        let session = session_id.to_string();
        let mut pending = self.pending.lock().await;
        while pending.try_join_next().is_some() {}
        pending.spawn(async move {
            if let Err(e) = cache.evict(&session).await {
                warn!(session_id = %session, "Background eviction failed: {}", e);
            }
        });

        Ok(record.id)
    }

    /// Wait for every eviction scheduled so far
    ///
    /// Must be awaited before the runtime shuts down; evictions still queued
    /// at that point are cancelled and the session stays over its bounds.
    pub async fn flush(&self) {
        let mut pending = std::mem::take(&mut *self.pending.lock().await);

        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                warn!("Eviction task did not complete: {}", e);
            }
        }
    }

    /// Most recent records of a session, newest first
    ///
    /// Returns at most `min(limit, max_context_records)` records, none older
    /// than the retention period, whose tokens fit in `max_context_tokens`.
    pub async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationRecord>, WorkflowError> {
        let effective = limit.min(self.limits.max_context_records);
        if effective == 0 {
            return Ok(Vec::new());
        }

        let cutoff = self.cutoff();
        let mut records = self
            .store
            .session_records(session_id, Some(effective))
            .await
            .map_err(storage_error)?;

        // Expired records sort last, so filtering after the limit is exact
        records.retain(|r| r.timestamp >= cutoff);
        records.truncate(retained_prefix(&records, &self.limits));
        Ok(records)
    }

    /// Remove every record of a session
    pub async fn clear(&self, session_id: &str) -> Result<u64, WorkflowError> {
        let removed = self
            .store
            .clear_session(session_id)
            .await
            .map_err(storage_error)?;

        info!(session_id = %session_id, removed, "Cleared session history");
        Ok(removed)
    }

    /// Apply the capacity, budget and age rules to one session
    pub async fn evict(&self, session_id: &str) -> Result<EvictionReport, WorkflowError> {
        let mut report = EvictionReport::default();

        let records = self
            .store
            .session_records(session_id, None)
            .await
            .map_err(storage_error)?;

        let keep = retained_prefix(&records, &self.limits);
        if keep < records.len() {
            let by_count = records.len().saturating_sub(self.limits.max_context_records);
            let doomed: Vec<String> = records.into_iter().skip(keep).map(|r| r.id).collect();

            let removed = self
                .store
                .delete_records(&doomed)
                .await
                .map_err(storage_error)?;
            report.over_capacity = removed.min(by_count as u64);
            report.over_budget = removed - report.over_capacity;
        }

        report.expired = self
            .store
            .delete_session_records_before(session_id, self.cutoff())
            .await
            .map_err(storage_error)?;

        if report != EvictionReport::default() {
            debug!(
                session_id = %session_id,
                over_capacity = report.over_capacity,
                over_budget = report.over_budget,
                expired = report.expired,
                "Evicted conversation records"
            );
        }

        Ok(report)
    }

    /// Apply the age rule to every session
    pub async fn purge_expired(&self) -> Result<u64, WorkflowError> {
        let removed = self
            .store
            .delete_records_before(self.cutoff())
            .await
            .map_err(storage_error)?;

        if removed > 0 {
            info!(removed, "Purged expired conversation records");
        }
        Ok(removed)
    }

    /// Run [`Self::purge_expired`] every `interval` until the task is aborted
    pub fn spawn_retention_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(e) = cache.purge_expired().await {
                    warn!("Retention sweep failed: {}", e);
                }
            }
        })
    }

    fn cutoff(&self) -> DateTime<Utc> {
        let retention = chrono::Duration::from_std(self.limits.retention)
            .unwrap_or(chrono::Duration::MAX);
        Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Wall-clock timestamp forced to never move backwards
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let now_us = now.timestamp_micros();
        let previous = self.last_timestamp_us.fetch_max(now_us, Ordering::SeqCst);
        let us = previous.max(now_us);
        DateTime::from_timestamp_micros(us).unwrap_or(now)
    }
}

/// Render records as a context block, oldest first
pub fn format_as_context(records: &[ConversationRecord]) -> String {
    let mut ordered: Vec<&ConversationRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.order_key());

    ordered
        .iter()
        .map(|r| format!("Tool: {}\nInput: {}\nOutput: {}", r.source, r.input, r.output))
        .collect::<Vec<_>>()
        .join("\n\n")
}
