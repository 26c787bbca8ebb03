//! Standard response envelope
//!
//! Every lifecycle operation answers with the same shape so the assistant on
//! the other side only has to understand one contract:
//!
//! ```json
//! {
//!   "next_action": "judge-plan",
//!   "instructions": { "rationale": "...", "steps": ["..."], "payload": {} },
//!   "blockers": [],
//!   "metadata": { "task_id": "...", "correlation_id": "...", "final": false }
//! }
//! ```
//!
//! `next_action` is `null` exactly when `metadata.final` is true. The
//! constructors are the only way to build an envelope, so the two fields
//! cannot disagree.

use serde::{Deserialize, Serialize};

use crate::types::Operation;

/// Guidance for the assistant: why, what to prepare, and operation payload
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Instructions {
    pub rationale: String,
    pub steps: Vec<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Instructions {
    pub fn new(rationale: impl Into<String>) -> Self {
        Self {
            rationale: rationale.into(),
            steps: Vec::new(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps = steps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Envelope metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvelopeMetadata {
    pub task_id: Option<String>,
    pub correlation_id: String,
    #[serde(rename = "final")]
    pub is_final: bool,
}

/// The navigator's output contract
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    next_action: Option<Operation>,
    pub instructions: Instructions,
    #[serde(default)]
    pub blockers: Vec<String>,
    metadata: EnvelopeMetadata,
}

impl ResponseEnvelope {
    /// Envelope pointing the caller at its next operation
    pub fn next(
        next_action: Operation,
        instructions: Instructions,
        task_id: Option<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            next_action: Some(next_action),
            instructions,
            blockers: Vec::new(),
            metadata: EnvelopeMetadata {
                task_id,
                correlation_id: correlation_id.into(),
                is_final: false,
            },
        }
    }

    /// Envelope closing the lifecycle; no further action exists
    pub fn terminal(
        instructions: Instructions,
        task_id: Option<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            next_action: None,
            instructions,
            blockers: Vec::new(),
            metadata: EnvelopeMetadata {
                task_id,
                correlation_id: correlation_id.into(),
                is_final: true,
            },
        }
    }

    pub fn with_blockers(mut self, blockers: Vec<String>) -> Self {
        self.blockers = blockers;
        self
    }

    pub fn next_action(&self) -> Option<Operation> {
        self.next_action
    }

    pub fn metadata(&self) -> &EnvelopeMetadata {
        &self.metadata
    }

    pub fn is_final(&self) -> bool {
        self.metadata.is_final
    }

    pub fn task_id(&self) -> Option<&str> {
        self.metadata.task_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_envelope_is_not_final() {
        let env = ResponseEnvelope::next(
            Operation::JudgePlan,
            Instructions::new("plan first"),
            Some("t1".to_string()),
            "c1",
        );
        assert_eq!(env.next_action(), Some(Operation::JudgePlan));
        assert!(!env.is_final());
    }

    #[test]
    fn test_wire_shape() {
        let env = ResponseEnvelope::terminal(
            Instructions::new("done").with_steps(["celebrate"]),
            Some("t1".to_string()),
            "c1",
        );
        let json = serde_json::to_value(&env).unwrap();
        assert!(json["next_action"].is_null());
        assert_eq!(json["metadata"]["final"], true);
        assert_eq!(json["metadata"]["task_id"], "t1");
        assert_eq!(json["instructions"]["steps"][0], "celebrate");
        assert_eq!(json["blockers"], serde_json::json!([]));
    }

    #[test]
    fn test_next_action_serializes_registry_name() {
        let env = ResponseEnvelope::next(
            Operation::JudgeCodeChange,
            Instructions::default(),
            None,
            "c2",
        );
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["next_action"], "judge-code-change");
    }
}
