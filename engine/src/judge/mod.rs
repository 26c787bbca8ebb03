//! Judgment capability
//!
//! The navigator never evaluates plans, code or tests itself. It hands a
//! [`JudgmentRequest`] to a [`Judge`] (an LLM endpoint or a rule evaluator)
//! and acts on the returned [`Verdict`]. Two more capabilities sit behind
//! the same seam: a [`Decider`] that may pick the next operation, and an
//! [`Elicitor`] that asks the human a structured question.
//!
//! All three are traits so tests can script their behavior.

use async_trait::async_trait;
use regex::Regex;
use sdk::errors::WorkflowError;
use sdk::types::Operation;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::db::{ConversationRecord, InternalResearch, ResearchRequirement, RiskAssessment, Task};

pub mod http;

pub use http::HttpJudge;

/// Errors raised by an external judgment call
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum JudgmentError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl JudgmentError {
    /// Short class name used in logs and attempt events
    pub fn class(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::Unauthorized(_) => "unauthorized",
            Self::Upstream { .. } => "upstream",
            Self::Network(_) => "network",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Unavailable(_) => "unavailable",
        }
    }

    /// Only this class is retried by the invoker
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

impl From<JudgmentError> for WorkflowError {
    fn from(err: JudgmentError) -> Self {
        match err {
            JudgmentError::RateLimited(msg) => WorkflowError::RateLimited(msg),
            other => WorkflowError::Judgment(other.to_string()),
        }
    }
}

/// One past invocation handed to the judge as context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub source: String,
    pub input: String,
    pub output: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&ConversationRecord> for HistoryEntry {
    fn from(record: &ConversationRecord) -> Self {
        Self {
            source: record.source.clone(),
            input: record.input.clone(),
            output: record.output.clone(),
            timestamp: record.timestamp,
        }
    }
}

/// What the judge is asked to evaluate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgmentRequest {
    pub operation: Operation,
    pub task: Task,
    /// Caller-supplied fields of the operation (plan, diff, test summary...)
    pub submission: serde_json::Value,
    /// Recent session history, newest first
    pub history: Vec<HistoryEntry>,
}

/// Structured judgment result
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub approved: bool,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub required_improvements: Vec<String>,
    /// Conditional requirement flags, only meaningful for plan review
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research: Option<ResearchRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_research: Option<InternalResearch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<RiskAssessment>,
}

impl Verdict {
    pub fn approved(feedback: impl Into<String>) -> Self {
        Self {
            approved: true,
            feedback: feedback.into(),
            ..Default::default()
        }
    }

    pub fn rejected<I, S>(feedback: impl Into<String>, improvements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            approved: false,
            feedback: feedback.into(),
            required_improvements: improvements.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Evaluates a submission against the task
#[async_trait]
pub trait Judge: Send + Sync {
    async fn evaluate(&self, request: &JudgmentRequest) -> Result<Verdict, JudgmentError>;
}

/// Input for a delegated next-action decision
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionRequest {
    pub task: Task,
    pub last_operation: Operation,
    pub approved: bool,
    /// Operation the decision table would choose
    pub suggested: Option<Operation>,
    pub history: Vec<HistoryEntry>,
}

/// A delegated decision; `next_action` is unvalidated text
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub next_action: Option<String>,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub steps: Vec<String>,
}

/// Picks the next operation when the table alone is not enough
#[async_trait]
pub trait Decider: Send + Sync {
    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, JudgmentError>;
}

/// A structured question for the human
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElicitationRequest {
    pub operation: Operation,
    pub message: String,
    /// JSON schema of the expected answer
    pub schema: serde_json::Value,
}

/// How the human answered
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum ElicitationOutcome {
    Accepted(serde_json::Value),
    Declined,
    /// The host cannot elicit; the message tells the assistant to ask directly
    Unavailable(String),
}

/// Asks the human through the host
#[async_trait]
pub trait Elicitor: Send + Sync {
    async fn elicit(&self, request: &ElicitationRequest)
        -> Result<ElicitationOutcome, JudgmentError>;
}

/// Elicitor for hosts without elicitation support
pub struct FallbackElicitor;

#[async_trait]
impl Elicitor for FallbackElicitor {
    async fn elicit(
        &self,
        request: &ElicitationRequest,
    ) -> Result<ElicitationOutcome, JudgmentError> {
        Ok(ElicitationOutcome::Unavailable(format!(
            "Elicitation is not available. Ask the user directly: {}",
            request.message
        )))
    }
}

fn fence_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").ok())
        .as_ref()
}

/// Pull a JSON object out of a model response
///
/// Accepts bare JSON, a fenced code block, or an object embedded in prose.
pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if serde_json::from_str::<serde_json::Value>(trimmed).is_ok_and(|v| v.is_object()) {
        return Some(trimmed.to_string());
    }

    if let Some(pattern) = fence_pattern() {
        for captures in pattern.captures_iter(trimmed) {
            if let Some(body) = captures.get(1) {
                let body = body.as_str().trim();
                if serde_json::from_str::<serde_json::Value>(body).is_ok_and(|v| v.is_object()) {
                    return Some(body.to_string());
                }
            }
        }
    }

    for (start, _) in trimmed.match_indices('{') {
        if let Some(candidate) = balanced_object(&trimmed[start..]) {
            if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                return Some(candidate.to_string());
            }
        }
    }

    None
}

/// Prefix of `s` up to the brace closing its first `{`
fn balanced_object(s: &str) -> Option<&str> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
