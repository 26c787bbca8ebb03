//! Conversation records
//!
//! One record per tool invocation that opts into history. Records are never
//! updated in place; they are removed only by eviction or a session clear.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A stored tool invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationRecord {
    pub id: String,
    pub session_id: String,
    /// Name of the operation that produced the record
    pub source: String,
    pub input: String,
    pub output: String,
    /// Estimated token size of input plus output
    #[serde(default)]
    pub tokens: u64,
    /// Records that were read as context for this invocation
    #[serde(default)]
    pub context_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// Logical counter breaking timestamp ties in insertion order
    pub seq: u64,
}

impl ConversationRecord {
    /// Ordering key used everywhere records are sorted
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.seq)
    }

    /// Most-recent-first comparison
    pub fn newest_first(a: &ConversationRecord, b: &ConversationRecord) -> Ordering {
        b.order_key().cmp(&a.order_key())
    }
}
