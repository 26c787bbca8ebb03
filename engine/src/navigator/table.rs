//! Decision table
//!
//! Keyed by `(operation, current state)`. Approval walks the happy path and
//! stamps the stage; rejection never moves the task, so the caller reworks
//! the submission from the state it was in.

use sdk::types::{ApprovalStage, Operation, TaskState};

use TaskState as S;

/// One row of the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// States entered on approval, in order
    pub path: &'static [TaskState],
    /// Approval recorded on approval
    pub stamp: Option<ApprovalStage>,
    /// Next operation on approval; `None` closes the lifecycle
    pub on_approve: Option<Operation>,
    /// Next operation on rejection
    pub on_reject: Operation,
}

const PLAN_ACCEPTED: Transition = Transition {
    path: &[S::PlanApproved],
    stamp: Some(ApprovalStage::Plan),
    on_approve: Some(Operation::JudgeCodeChange),
    on_reject: Operation::JudgePlan,
};

const PLAN_REPLANNED: Transition = Transition {
    path: &[S::Planning, S::PlanApproved],
    ..PLAN_ACCEPTED
};

const CODE_ACCEPTED: Transition = Transition {
    path: &[S::ReviewReady],
    stamp: Some(ApprovalStage::Code),
    on_approve: Some(Operation::JudgeTesting),
    on_reject: Operation::JudgeCodeChange,
};

const CODE_FROM_SCRATCH: Transition = Transition {
    path: &[S::Implementing, S::ReviewReady],
    ..CODE_ACCEPTED
};

const TESTS_ACCEPTED: Transition = Transition {
    path: &[S::Testing],
    stamp: Some(ApprovalStage::Test),
    on_approve: Some(Operation::JudgeCompletion),
    on_reject: Operation::JudgeTesting,
};

const COMPLETED: Transition = Transition {
    path: &[S::Completed],
    stamp: None,
    on_approve: None,
    on_reject: Operation::JudgeCompletion,
};

const COMPLETED_FROM_TESTING: Transition = Transition {
    path: &[S::ReviewReady, S::Completed],
    ..COMPLETED
};

/// Row for a judgment operation in a state, `None` if not allowed there
pub fn transition(op: Operation, state: TaskState) -> Option<Transition> {
    match (op, state) {
        (Operation::JudgePlan, S::Created) => Some(PLAN_REPLANNED),
        (Operation::JudgePlan, S::Planning) => Some(PLAN_ACCEPTED),
        (Operation::JudgePlan, S::PlanApproved) => Some(PLAN_REPLANNED),
        (Operation::JudgePlan, S::Implementing) => Some(PLAN_ACCEPTED),

        (Operation::JudgeCodeChange, S::PlanApproved) => Some(CODE_FROM_SCRATCH),
        (Operation::JudgeCodeChange, S::Implementing) => Some(CODE_ACCEPTED),
        (Operation::JudgeCodeChange, S::Testing) => Some(CODE_FROM_SCRATCH),

        (Operation::JudgeTesting, S::ReviewReady) => Some(TESTS_ACCEPTED),
        (Operation::JudgeTesting, S::Testing) => Some(TESTS_ACCEPTED),

        (Operation::JudgeCompletion, S::Testing) => Some(COMPLETED_FROM_TESTING),
        (Operation::JudgeCompletion, S::ReviewReady) => Some(COMPLETED),

        _ => None,
    }
}

/// State a judgment operation is trying to reach
pub fn target_state(op: Operation) -> Option<TaskState> {
    match op {
        Operation::JudgePlan => Some(S::PlanApproved),
        Operation::JudgeCodeChange => Some(S::ReviewReady),
        Operation::JudgeTesting => Some(S::Testing),
        Operation::JudgeCompletion => Some(S::Completed),
        _ => None,
    }
}

/// States in which a judgment operation is accepted
pub fn accepted_states(op: Operation) -> Vec<TaskState> {
    TaskState::ALL
        .iter()
        .copied()
        .filter(|state| transition(op, *state).is_some())
        .collect()
}

/// Next operation for a task resting in `state`
pub fn route(state: TaskState) -> Option<Operation> {
    match state {
        S::Created | S::Planning => Some(Operation::JudgePlan),
        S::PlanApproved | S::Implementing => Some(Operation::JudgeCodeChange),
        S::ReviewReady => Some(Operation::JudgeTesting),
        S::Testing => Some(Operation::JudgeCompletion),
        S::Blocked => Some(Operation::RaiseObstacle),
        S::Completed | S::Cancelled => None,
    }
}

/// What the assistant should prepare before calling `op`
pub fn preparation_steps(op: Operation) -> &'static [&'static str] {
    match op {
        Operation::CreateOrUpdateTask => &[
            "Collect the task title, description and requirements",
            "List acceptance criteria",
        ],
        Operation::RecoverCurrentTask => &["Recover the task id before continuing"],
        Operation::JudgePlan => &[
            "Write the implementation plan and system design",
            "Research unfamiliar libraries and cite sources",
            "Identify existing components the plan builds on",
        ],
        Operation::JudgeCodeChange => &[
            "Implement the approved plan",
            "Submit the diff together with the file path and a change description",
        ],
        Operation::JudgeTesting => &[
            "Write or update tests covering the change",
            "Run the suite and capture the execution results",
        ],
        Operation::JudgeCompletion => &[
            "Summarize the completed work",
            "Map each requirement to the change that satisfies it",
        ],
        Operation::RaiseObstacle => &[
            "Describe the problem and the research already done",
            "Offer concrete options for the user to choose from",
        ],
        Operation::RaiseMissingRequirements => &[
            "State the current understanding of the request",
            "List the gaps and the questions that would close them",
        ],
        Operation::Navigate => &["Ask for the next step of the workflow"],
    }
}
