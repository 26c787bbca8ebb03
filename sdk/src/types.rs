//! Task lifecycle and operation registry types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::WorkflowError;

/// Lifecycle state of a task
///
/// The state is the single source of truth for where a task sits in the
/// plan → implement → test → complete lifecycle. Only the edges returned by
/// [`TaskState::allowed_transitions`] may be taken.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Planning,
    PlanApproved,
    Implementing,
    ReviewReady,
    Testing,
    Completed,
    Blocked,
    Cancelled,
}

impl TaskState {
    /// Every state, in lifecycle order
    pub const ALL: [TaskState; 9] = [
        TaskState::Created,
        TaskState::Planning,
        TaskState::PlanApproved,
        TaskState::Implementing,
        TaskState::ReviewReady,
        TaskState::Testing,
        TaskState::Completed,
        TaskState::Blocked,
        TaskState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Created => "created",
            TaskState::Planning => "planning",
            TaskState::PlanApproved => "plan_approved",
            TaskState::Implementing => "implementing",
            TaskState::ReviewReady => "review_ready",
            TaskState::Testing => "testing",
            TaskState::Completed => "completed",
            TaskState::Blocked => "blocked",
            TaskState::Cancelled => "cancelled",
        }
    }

    /// States directly reachable from this one
    ///
    /// `Blocked` may return to any non-terminal lifecycle state. `Completed`
    /// can only be cancelled and `Cancelled` has no outgoing edges.
    pub fn allowed_transitions(&self) -> &'static [TaskState] {
        use TaskState as S;
        match self {
            S::Created => &[S::Planning, S::Blocked, S::Cancelled],
            S::Planning => &[S::PlanApproved, S::Created, S::Blocked, S::Cancelled],
            S::PlanApproved => &[S::Implementing, S::Planning, S::Blocked, S::Cancelled],
            S::Implementing => &[
                S::Implementing,
                S::Testing,
                S::ReviewReady,
                S::PlanApproved,
                S::Blocked,
                S::Cancelled,
            ],
            S::Testing => &[
                S::Testing,
                S::ReviewReady,
                S::Implementing,
                S::Blocked,
                S::Cancelled,
            ],
            S::ReviewReady => &[
                S::Completed,
                S::Testing,
                S::Implementing,
                S::Blocked,
                S::Cancelled,
            ],
            S::Completed => &[S::Cancelled],
            S::Blocked => &[
                S::Created,
                S::Planning,
                S::PlanApproved,
                S::Implementing,
                S::Testing,
                S::ReviewReady,
                S::Cancelled,
            ],
            S::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: TaskState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// True for `Completed` and `Cancelled`
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Cancelled)
    }

    /// Short human-readable description of the state
    pub fn description(&self) -> &'static str {
        match self {
            TaskState::Created => "Task created, ready for planning",
            TaskState::Planning => "Planning phase in progress",
            TaskState::PlanApproved => "Plan approved, ready for implementation",
            TaskState::Implementing => "Implementation in progress",
            TaskState::ReviewReady => "Implementation approved, ready for test validation",
            TaskState::Testing => "Tests validated, ready for completion review",
            TaskState::Completed => "Task completed successfully",
            TaskState::Blocked => "Task blocked by external dependencies",
            TaskState::Cancelled => "Task cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| WorkflowError::InvalidInput(format!("unknown task state '{}'", s)))
    }
}

/// Approval gates that must all be granted before completion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStage {
    Plan,
    Code,
    Test,
}

impl ApprovalStage {
    pub const ALL: [ApprovalStage; 3] = [ApprovalStage::Plan, ApprovalStage::Code, ApprovalStage::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStage::Plan => "plan",
            ApprovalStage::Code => "code",
            ApprovalStage::Test => "test",
        }
    }
}

impl fmt::Display for ApprovalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed registry of operations a caller may be told to invoke next
///
/// This is the only set of values `next_action` can take. Strings coming
/// from outside (for example a delegated decision) must pass through
/// [`Operation::from_str`], which is the whitelist check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Operation {
    #[serde(rename = "create-or-update-task")]
    CreateOrUpdateTask,
    #[serde(rename = "recover-current-task")]
    RecoverCurrentTask,
    #[serde(rename = "judge-plan")]
    JudgePlan,
    #[serde(rename = "judge-code-change")]
    JudgeCodeChange,
    #[serde(rename = "judge-testing")]
    JudgeTesting,
    #[serde(rename = "judge-completion")]
    JudgeCompletion,
    #[serde(rename = "raise-obstacle")]
    RaiseObstacle,
    #[serde(rename = "raise-missing-requirements")]
    RaiseMissingRequirements,
    #[serde(rename = "navigate")]
    Navigate,
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Operation::CreateOrUpdateTask,
        Operation::RecoverCurrentTask,
        Operation::JudgePlan,
        Operation::JudgeCodeChange,
        Operation::JudgeTesting,
        Operation::JudgeCompletion,
        Operation::RaiseObstacle,
        Operation::RaiseMissingRequirements,
        Operation::Navigate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateOrUpdateTask => "create-or-update-task",
            Operation::RecoverCurrentTask => "recover-current-task",
            Operation::JudgePlan => "judge-plan",
            Operation::JudgeCodeChange => "judge-code-change",
            Operation::JudgeTesting => "judge-testing",
            Operation::JudgeCompletion => "judge-completion",
            Operation::RaiseObstacle => "raise-obstacle",
            Operation::RaiseMissingRequirements => "raise-missing-requirements",
            Operation::Navigate => "navigate",
        }
    }

    /// Whether this operation is decided by an external judgment call
    pub fn requires_judgment(&self) -> bool {
        matches!(
            self,
            Operation::JudgePlan
                | Operation::JudgeCodeChange
                | Operation::JudgeTesting
                | Operation::JudgeCompletion
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == name)
            .ok_or_else(|| WorkflowError::InvalidNextAction(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_a_sink() {
        assert!(TaskState::Cancelled.allowed_transitions().is_empty());
        for state in TaskState::ALL {
            if state != TaskState::Cancelled {
                assert!(
                    state.can_transition_to(TaskState::Cancelled),
                    "{} should be cancellable",
                    state
                );
            }
        }
    }

    #[test]
    fn test_completed_only_reachable_from_review_ready() {
        let sources: Vec<TaskState> = TaskState::ALL
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(TaskState::Completed))
            .collect();
        assert_eq!(sources, vec![TaskState::ReviewReady]);
    }

    #[test]
    fn test_blocked_cannot_jump_to_completed() {
        assert!(!TaskState::Blocked.can_transition_to(TaskState::Completed));
        assert!(TaskState::Blocked.can_transition_to(TaskState::Testing));
    }

    #[test]
    fn test_state_string_round_trip() {
        for state in TaskState::ALL {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
        assert!("done".parse::<TaskState>().is_err());
    }

    #[test]
    fn test_operation_whitelist() {
        assert_eq!(
            "judge-plan".parse::<Operation>().unwrap(),
            Operation::JudgePlan
        );
        let err = "judge_everything".parse::<Operation>().unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidNextAction(name) if name == "judge_everything"));
    }

    #[test]
    fn test_operation_serde_matches_registry_names() {
        for op in Operation::ALL {
            let json = serde_json::to_string(&op).unwrap();
            assert_eq!(json, format!("\"{}\"", op.as_str()));
        }
    }
}
