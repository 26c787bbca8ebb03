//! Operation inputs
//!
//! One struct per lifecycle operation, deserialized from whatever the host
//! transport delivers. Each is recorded verbatim in the session history.

use sdk::types::TaskState;
use serde::{Deserialize, Serialize};

use crate::db::Task;

/// Who is calling; history is grouped by `session_id`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallContext {
    pub session_id: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl CallContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskAction {
    Create,
    Update,
}

/// create-or-update-task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRequest {
    pub action: TaskAction,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub requirements: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Only `blocked`, `cancelled`, or resuming a blocked task may be requested
    #[serde(default)]
    pub state: Option<TaskState>,
}

impl TaskRequest {
    pub fn create(title: impl Into<String>, requirements: impl Into<String>) -> Self {
        Self {
            action: TaskAction::Create,
            task_id: None,
            title: Some(title.into()),
            description: None,
            requirements: Some(requirements.into()),
            acceptance_criteria: None,
            tags: None,
            state: None,
        }
    }

    pub fn update(task_id: impl Into<String>) -> Self {
        Self {
            action: TaskAction::Update,
            task_id: Some(task_id.into()),
            title: None,
            description: None,
            requirements: None,
            acceptance_criteria: None,
            tags: None,
            state: None,
        }
    }
}

/// judge-plan
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanSubmission {
    pub task_id: String,
    pub plan: String,
    pub design: String,
    #[serde(default)]
    pub research: Option<String>,
    #[serde(default)]
    pub research_urls: Vec<String>,
}

/// judge-code-change
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CodeChangeSubmission {
    pub task_id: String,
    pub code_change: String,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub change_description: Option<String>,
}

/// judge-testing
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestingSubmission {
    pub task_id: String,
    pub test_summary: String,
    #[serde(default)]
    pub test_files: Vec<String>,
    pub execution_results: String,
    #[serde(default)]
    pub coverage: Option<String>,
}

/// judge-completion
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompletionSubmission {
    pub task_id: String,
    pub completion_summary: String,
    #[serde(default)]
    pub requirements_met: Vec<String>,
    pub implementation_details: String,
}

/// raise-obstacle
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ObstacleReport {
    #[serde(default)]
    pub task_id: Option<String>,
    pub problem: String,
    pub research: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// raise-missing-requirements
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MissingRequirements {
    #[serde(default)]
    pub task_id: Option<String>,
    pub current_request: String,
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub questions: Vec<String>,
}

/// recover-current-task result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecoveredTask {
    pub found: bool,
    pub task_id: Option<String>,
    pub task: Option<Task>,
}
