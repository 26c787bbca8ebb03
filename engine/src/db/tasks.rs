/// Task records
///
/// A task is the unit of work tracked from creation to completion or
/// cancellation. It is never physically deleted; cancellation is a state.
/// The `state` field is only ever written by the lifecycle state machine.
use chrono::{DateTime, Utc};
use sdk::types::{ApprovalStage, TaskState};
use serde::{Deserialize, Serialize};

/// Depth of external research a task needs
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResearchScope {
    #[default]
    None,
    Light,
    Deep,
}

/// Whether online research is required before the plan can be approved
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResearchRequirement {
    pub required: bool,
    pub scope: ResearchScope,
    #[serde(default)]
    pub rationale: String,
}

/// Whether the plan must reference existing components of the codebase
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InternalResearch {
    pub required: bool,
    #[serde(default)]
    pub related_components: Vec<String>,
}

/// Whether the plan must carry an explicit risk analysis
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub required: bool,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub mitigations: Vec<String>,
}

/// Approval timestamps for each gated stage
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Approvals {
    pub plan_approved_at: Option<DateTime<Utc>>,
    pub code_approved_at: Option<DateTime<Utc>>,
    pub test_approved_at: Option<DateTime<Utc>>,
}

impl Approvals {
    pub fn get(&self, stage: ApprovalStage) -> Option<DateTime<Utc>> {
        match stage {
            ApprovalStage::Plan => self.plan_approved_at,
            ApprovalStage::Code => self.code_approved_at,
            ApprovalStage::Test => self.test_approved_at,
        }
    }

    pub fn grant(&mut self, stage: ApprovalStage, at: DateTime<Utc>) {
        match stage {
            ApprovalStage::Plan => self.plan_approved_at = Some(at),
            ApprovalStage::Code => self.code_approved_at = Some(at),
            ApprovalStage::Test => self.test_approved_at = Some(at),
        }
    }

    /// Stages without an approval timestamp, in lifecycle order
    pub fn missing(&self) -> Vec<ApprovalStage> {
        ApprovalStage::ALL
            .iter()
            .copied()
            .filter(|stage| self.get(*stage).is_none())
            .collect()
    }
}

/// One version of the task requirements
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequirementsVersion {
    pub content: String,
    /// "initial", "update" or "clarification"
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

/// Conditional requirement flags and bookkeeping attached to a task
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskMetadata {
    #[serde(default)]
    pub research: ResearchRequirement,
    #[serde(default)]
    pub internal_research: InternalResearch,
    #[serde(default)]
    pub risk_assessment: RiskAssessment,
    #[serde(default)]
    pub approvals: Approvals,
    /// State the task was in when it entered `Blocked`
    #[serde(default)]
    pub blocked_from: Option<TaskState>,
    #[serde(default)]
    pub requirements_history: Vec<RequirementsVersion>,
    #[serde(default)]
    pub modified_files: Vec<String>,
    #[serde(default)]
    pub test_files: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TaskMetadata {
    pub fn add_modified_file(&mut self, path: &str) {
        if !self.modified_files.iter().any(|p| p == path) {
            self.modified_files.push(path.to_string());
        }
    }

    pub fn add_test_file(&mut self, path: &str) {
        if !self.test_files.iter().any(|p| p == path) {
            self.test_files.push(path.to_string());
        }
    }
}

/// Task record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub task_id: String,
    pub state: TaskState,
    pub title: String,
    pub description: String,
    pub requirements: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub metadata: TaskMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Replace the requirements text, keeping a version trail
    ///
    /// Returns false when the text is unchanged.
    pub fn amend_requirements(&mut self, content: &str, source: &str, at: DateTime<Utc>) -> bool {
        if self.requirements == content {
            return false;
        }
        self.requirements = content.to_string();
        self.metadata.requirements_history.push(RequirementsVersion {
            content: content.to_string(),
            source: source.to_string(),
            timestamp: at,
        });
        true
    }
}
