//! Error types and handling
//!
//! This module provides the error taxonomy shared by the Arbiter engine and
//! its callers. All errors implement the `ArbiterErrorExt` trait which provides
//! a short hint for self-correction and indicates whether the caller may
//! simply retry the same call later.
//!
//! Every variant carries enough structured detail (current state, allowed
//! states, missing approvals, attempt counts) for a caller to fix its request
//! without guessing.

use thiserror::Error;

use crate::types::{ApprovalStage, TaskState};

/// Trait for Arbiter error extensions
pub trait ArbiterErrorExt {
    /// Returns a short hint describing how the caller can recover
    fn user_hint(&self) -> &str;

    /// Returns whether retrying the same call later may succeed
    ///
    /// Validation failures (`NotFound`, `InvalidTransition`,
    /// `IncompleteApprovals`) need a different request, not a retry.
    fn is_recoverable(&self) -> bool;
}

/// Main workflow error type
///
/// # Error Categories
///
/// - **Lookup**: unknown task or session
/// - **Lifecycle**: transitions outside the edge table, missing approvals
/// - **Judgment**: rate limiting, exhausted retries, deadlines
/// - **Internal**: decision table defects, storage and configuration failures
///
/// # Examples
///
/// ```
/// use sdk::errors::{ArbiterErrorExt, WorkflowError};
///
/// let error = WorkflowError::NotFound("task-1".to_string());
/// assert!(!error.is_recoverable());
///
/// let transient = WorkflowError::RateLimitExhausted {
///     attempts: 6,
///     last_error: "429".to_string(),
/// };
/// assert!(transient.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum WorkflowError {
    // Lookup errors
    #[error("Not found: {0}")]
    NotFound(String),

    // Lifecycle errors
    #[error("Invalid transition {from} -> {to}; allowed from {from}: {}", format_states(.allowed))]
    InvalidTransition {
        from: TaskState,
        to: TaskState,
        allowed: Vec<TaskState>,
    },

    #[error("Cannot complete task in state {state}: missing {} approval(s)", format_stages(.missing))]
    IncompleteApprovals {
        state: TaskState,
        missing: Vec<ApprovalStage>,
    },

    // Judgment errors
    #[error("Judgment call rate limited: {0}")]
    RateLimited(String),

    #[error("Judgment call still rate limited after {attempts} attempts: {last_error}")]
    RateLimitExhausted { attempts: u32, last_error: String },

    #[error("Deadline exceeded after {attempts} attempt(s) ({elapsed_ms}ms)")]
    DeadlineExceeded { attempts: u32, elapsed_ms: u64 },

    #[error("Judgment call failed: {0}")]
    Judgment(String),

    #[error("Elicitation failed: {0}")]
    Elicitation(String),

    // Internal defects
    #[error("Invalid next action: {0}")]
    InvalidNextAction(String),

    // Infrastructure errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

fn format_states(states: &[TaskState]) -> String {
    if states.is_empty() {
        return "none".to_string();
    }
    states
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_stages(stages: &[ApprovalStage]) -> String {
    stages
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ArbiterErrorExt for WorkflowError {
    fn user_hint(&self) -> &str {
        match self {
            Self::NotFound(_) => "Recover the current task or create a new one",
            Self::InvalidTransition { .. } => "Request one of the allowed next states",
            Self::IncompleteApprovals { .. } => {
                "Obtain the missing plan, code or test approvals before completing"
            }
            Self::RateLimited(_) => "Judgment endpoint is throttling. Wait and try again",
            Self::RateLimitExhausted { .. } => {
                "Judgment endpoint is still throttling. The task was not changed; retry later"
            }
            Self::DeadlineExceeded { .. } => {
                "Judgment took too long. The task was not changed; retry later"
            }
            Self::Judgment(_) => "Judgment endpoint failed. Check its configuration",
            Self::Elicitation(_) => "Could not reach the user. Ask the question directly",
            Self::InvalidNextAction(_) => "Internal routing defect. Report this as a bug",
            Self::Storage(_) => "Storage operation failed. Check the database URL",
            Self::Config(_) => "Check your config.toml file for errors",
            Self::InvalidInput(_) => "Fix the request fields and call again",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Transient conditions: the same call may succeed later
            Self::RateLimited(_)
            | Self::RateLimitExhausted { .. }
            | Self::DeadlineExceeded { .. }
            | Self::Judgment(_)
            | Self::Elicitation(_)
            | Self::Storage(_) => true,

            _ => false,
        }
    }
}
