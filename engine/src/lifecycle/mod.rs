//! Task state machine
//!
//! Owns every task write. A task's `state` only moves along the edges of
//! [`TaskState::allowed_transitions`], and moving into `Completed` also
//! requires plan, code and test approvals on the task. A `Blocked` task
//! leaves only for the state it was blocked from, or for `Cancelled`.
//!
//! Updates to one task are serialized by a per-task async mutex held across
//! read, validate and write. Distinct tasks never wait on each other. A
//! rejected update leaves the stored task exactly as it was.

use chrono::{DateTime, Utc};
use sdk::errors::WorkflowError;
use sdk::types::{ApprovalStage, TaskState};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{
    storage_error, ContextStore, InternalResearch, RequirementsVersion, ResearchRequirement,
    RiskAssessment, Task, TaskMetadata,
};

/// How many recent tasks `current` looks at
const RECOVERY_SCAN_LIMIT: usize = 100;

/// Fields of a new task
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub requirements: String,
    pub acceptance_criteria: Vec<String>,
    pub tags: Vec<String>,
}

/// Partial update applied together with an optional state change
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    /// Provenance recorded in the requirements history
    pub requirements_source: Option<String>,
    pub acceptance_criteria: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub research: Option<ResearchRequirement>,
    pub internal_research: Option<InternalResearch>,
    pub risk_assessment: Option<RiskAssessment>,
    pub grant: Vec<ApprovalStage>,
    pub modified_files: Vec<String>,
    pub test_files: Vec<String>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, stage: ApprovalStage) -> Self {
        self.grant.push(stage);
        self
    }

    pub fn requirements(mut self, content: impl Into<String>, source: impl Into<String>) -> Self {
        self.requirements = Some(content.into());
        self.requirements_source = Some(source.into());
        self
    }

    pub fn modified_file(mut self, path: impl Into<String>) -> Self {
        self.modified_files.push(path.into());
        self
    }

    pub fn test_file(mut self, path: impl Into<String>) -> Self {
        self.test_files.push(path.into());
        self
    }

    fn apply(self, task: &mut Task, now: DateTime<Utc>) {
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(requirements) = self.requirements {
            let source = self.requirements_source.as_deref().unwrap_or("update");
            task.amend_requirements(&requirements, source, now);
        }
        if let Some(criteria) = self.acceptance_criteria {
            task.acceptance_criteria = criteria;
        }
        if let Some(tags) = self.tags {
            task.metadata.tags = tags;
        }
        if let Some(research) = self.research {
            task.metadata.research = research;
        }
        if let Some(internal) = self.internal_research {
            task.metadata.internal_research = internal;
        }
        if let Some(risk) = self.risk_assessment {
            task.metadata.risk_assessment = risk;
        }
        for stage in self.grant {
            task.metadata.approvals.grant(stage, now);
        }
        for path in &self.modified_files {
            task.metadata.add_modified_file(path);
        }
        for path in &self.test_files {
            task.metadata.add_test_file(path);
        }
    }
}

/// Validated task lifecycle on top of a `ContextStore`
pub struct TaskStateMachine {
    store: Arc<dyn ContextStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TaskStateMachine {
    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh task in `Created`
    pub async fn create(&self, fields: NewTask) -> Result<Task, WorkflowError> {
        if fields.title.trim().is_empty() {
            return Err(WorkflowError::InvalidInput(
                "task title must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let mut metadata = TaskMetadata {
            tags: fields.tags,
            ..Default::default()
        };
        if !fields.requirements.is_empty() {
            metadata.requirements_history.push(RequirementsVersion {
                content: fields.requirements.clone(),
                source: "initial".to_string(),
                timestamp: now,
            });
        }

        let task = Task {
            task_id: Uuid::new_v4().to_string(),
            state: TaskState::Created,
            title: fields.title,
            description: fields.description,
            requirements: fields.requirements,
            acceptance_criteria: fields.acceptance_criteria,
            metadata,
            created_at: now,
            updated_at: now,
        };

        self.store.put_task(&task).await.map_err(storage_error)?;

        info!(task_id = %task.task_id, title = %task.title, "Created task");
        Ok(task)
    }

    /// Fetch a task; never mutates anything
    pub async fn get(&self, task_id: &str) -> Result<Task, WorkflowError> {
        self.store
            .get_task(task_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| WorkflowError::NotFound(format!("task {}", task_id)))
    }

    /// Apply fields and optionally move along one edge
    pub async fn update(
        &self,
        task_id: &str,
        fields: TaskUpdate,
        requested_state: Option<TaskState>,
    ) -> Result<Task, WorkflowError> {
        match requested_state {
            Some(state) => self.advance(task_id, fields, &[state]).await,
            None => self.advance(task_id, fields, &[]).await,
        }
    }

    /// Apply fields and walk `path` edge by edge, committing once
    ///
    /// Every edge is validated before anything is written; either the whole
    /// walk and all fields commit or nothing does.
    pub async fn advance(
        &self,
        task_id: &str,
        fields: TaskUpdate,
        path: &[TaskState],
    ) -> Result<Task, WorkflowError> {
        let lock = self.lock_for(task_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.advance_locked(task_id, fields, path).await
        };
        self.release_lock(task_id, lock).await;
        result
    }

    async fn advance_locked(
        &self,
        task_id: &str,
        fields: TaskUpdate,
        path: &[TaskState],
    ) -> Result<Task, WorkflowError> {
        let original = self.get(task_id).await?;
        let mut candidate = original.clone();

        for &next in path {
            let from = candidate.state;
            if !from.can_transition_to(next) {
                debug!(task_id = %task_id, from = %from, to = %next, "Rejected transition");
                return Err(WorkflowError::InvalidTransition {
                    from,
                    to: next,
                    allowed: from.allowed_transitions().to_vec(),
                });
            }

            let origin = candidate.metadata.blocked_from;
            if from == TaskState::Blocked && next != TaskState::Cancelled && origin != Some(next) {
                debug!(task_id = %task_id, to = %next, "Rejected resume from blocked");
                return Err(WorkflowError::InvalidTransition {
                    from,
                    to: next,
                    allowed: origin.into_iter().chain([TaskState::Cancelled]).collect(),
                });
            }

            if next == TaskState::Blocked && from != TaskState::Blocked {
                candidate.metadata.blocked_from = Some(from);
            } else if from == TaskState::Blocked && next != TaskState::Blocked {
                candidate.metadata.blocked_from = None;
            }
            candidate.state = next;
        }

        let now = Utc::now().max(original.updated_at);
        fields.apply(&mut candidate, now);

        if path.contains(&TaskState::Completed) {
            let missing = candidate.metadata.approvals.missing();
            if !missing.is_empty() {
                return Err(WorkflowError::IncompleteApprovals {
                    state: original.state,
                    missing,
                });
            }
        }

        candidate.updated_at = now;
        self.store.put_task(&candidate).await.map_err(storage_error)?;

        if candidate.state != original.state {
            info!(
                task_id = %task_id,
                from = %original.state,
                to = %candidate.state,
                "Task state changed"
            );
        } else {
            debug!(task_id = %task_id, state = %candidate.state, "Task updated");
        }

        Ok(candidate)
    }

    /// The task a caller most likely lost track of
    ///
    /// Most recently updated non-terminal task, else the most recently
    /// updated task of any state.
    pub async fn current(&self) -> Result<Option<Task>, WorkflowError> {
        let tasks = self
            .store
            .recent_tasks(RECOVERY_SCAN_LIMIT)
            .await
            .map_err(storage_error)?;

        let active = tasks.iter().find(|t| !t.state.is_terminal()).cloned();
        Ok(active.or_else(|| tasks.into_iter().next()))
    }

    async fn lock_for(&self, task_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(task_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Drop the entry once no other caller holds or waits on it
    async fn release_lock(&self, task_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        // Every holder cloned its Arc under this map lock, so a count of one
        // means the map is the last owner
        if locks
            .get(task_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(task_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn machine() -> TaskStateMachine {
        TaskStateMachine::new(Arc::new(MemoryStore::new()))
    }

    fn new_task(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            description: "desc".to_string(),
            requirements: "must work".to_string(),
            acceptance_criteria: vec!["works".to_string()],
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_create_starts_in_created() {
        let sm = machine();
        let task = sm.create(new_task("A")).await.unwrap();

        assert_eq!(task.state, TaskState::Created);
        assert_eq!(task.requirements, "must work");
        assert_eq!(task.metadata.requirements_history.len(), 1);
        assert_eq!(sm.get(&task.task_id).await.unwrap(), task);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_title() {
        let sm = machine();
        assert!(matches!(
            sm.create(new_task("  ")).await,
            Err(WorkflowError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let sm = machine();
        assert!(matches!(
            sm.get("nope").await,
            Err(WorkflowError::NotFound(_))
        ));
        assert!(matches!(
            sm.update("nope", TaskUpdate::new(), Some(TaskState::Planning)).await,
            Err(WorkflowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_transition_leaves_task_untouched() {
        let sm = machine();
        let task = sm.create(new_task("A")).await.unwrap();

        let fields = TaskUpdate {
            title: Some("renamed".to_string()),
            ..Default::default()
        };
        let err = sm
            .update(&task.task_id, fields, Some(TaskState::Testing))
            .await
            .unwrap_err();

        match err {
            WorkflowError::InvalidTransition { from, to, allowed } => {
                assert_eq!(from, TaskState::Created);
                assert_eq!(to, TaskState::Testing);
                assert_eq!(
                    allowed,
                    vec![TaskState::Planning, TaskState::Blocked, TaskState::Cancelled]
                );
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(sm.get(&task.task_id).await.unwrap(), task);
    }

    #[tokio::test]
    async fn test_advance_validates_every_edge() {
        let sm = machine();
        let task = sm.create(new_task("A")).await.unwrap();

        // Second edge PLANNING -> IMPLEMENTING does not exist
        let err = sm
            .advance(
                &task.task_id,
                TaskUpdate::new(),
                &[TaskState::Planning, TaskState::Implementing],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidTransition {
                from: TaskState::Planning,
                ..
            }
        ));
        assert_eq!(sm.get(&task.task_id).await.unwrap().state, TaskState::Created);

        let task = sm
            .advance(
                &task.task_id,
                TaskUpdate::new().grant(ApprovalStage::Plan),
                &[TaskState::Planning, TaskState::PlanApproved],
            )
            .await
            .unwrap();
        assert_eq!(task.state, TaskState::PlanApproved);
        assert!(task.metadata.approvals.plan_approved_at.is_some());
    }

    #[tokio::test]
    async fn test_completion_requires_all_approvals() {
        let sm = machine();
        let task = sm.create(new_task("A")).await.unwrap();
        let id = task.task_id.clone();

        sm.advance(
            &id,
            TaskUpdate::new().grant(ApprovalStage::Plan),
            &[
                TaskState::Planning,
                TaskState::PlanApproved,
                TaskState::Implementing,
                TaskState::ReviewReady,
            ],
        )
        .await
        .unwrap();

        let err = sm
            .update(&id, TaskUpdate::new(), Some(TaskState::Completed))
            .await
            .unwrap_err();
        match err {
            WorkflowError::IncompleteApprovals { state, missing } => {
                assert_eq!(state, TaskState::ReviewReady);
                assert_eq!(missing, vec![ApprovalStage::Code, ApprovalStage::Test]);
            }
            other => panic!("unexpected error {other}"),
        }

        let done = sm
            .update(
                &id,
                TaskUpdate::new()
                    .grant(ApprovalStage::Code)
                    .grant(ApprovalStage::Test),
                Some(TaskState::Completed),
            )
            .await
            .unwrap();
        assert_eq!(done.state, TaskState::Completed);
    }

    #[tokio::test]
    async fn test_blocked_records_origin_and_cancel_is_terminal() {
        let sm = machine();
        let task = sm.create(new_task("A")).await.unwrap();
        let id = task.task_id.clone();

        sm.update(&id, TaskUpdate::new(), Some(TaskState::Planning))
            .await
            .unwrap();
        let blocked = sm
            .update(&id, TaskUpdate::new(), Some(TaskState::Blocked))
            .await
            .unwrap();
        assert_eq!(blocked.metadata.blocked_from, Some(TaskState::Planning));

        let resumed = sm
            .update(&id, TaskUpdate::new(), Some(TaskState::Planning))
            .await
            .unwrap();
        assert_eq!(resumed.metadata.blocked_from, None);

        sm.update(&id, TaskUpdate::new(), Some(TaskState::Cancelled))
            .await
            .unwrap();
        assert!(matches!(
            sm.update(&id, TaskUpdate::new(), Some(TaskState::Created)).await,
            Err(WorkflowError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_requirements_amendment_keeps_identity() {
        let sm = machine();
        let task = sm.create(new_task("A")).await.unwrap();

        let updated = sm
            .update(
                &task.task_id,
                TaskUpdate::new().requirements("must work offline", "clarification"),
                None,
            )
            .await
            .unwrap();

        assert_eq!(updated.task_id, task.task_id);
        assert_eq!(updated.requirements, "must work offline");
        assert_eq!(updated.metadata.requirements_history.len(), 2);
        assert_eq!(
            updated.metadata.requirements_history[1].source,
            "clarification"
        );
    }

    #[tokio::test]
    async fn test_current_prefers_active_tasks() {
        let sm = machine();
        let active = sm.create(new_task("active")).await.unwrap();
        let other = sm.create(new_task("other")).await.unwrap();
        sm.update(&other.task_id, TaskUpdate::new(), Some(TaskState::Cancelled))
            .await
            .unwrap();

        let current = sm.current().await.unwrap().unwrap();
        assert_eq!(current.task_id, active.task_id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_serialized() {
        let sm = Arc::new(machine());
        let task = sm.create(new_task("A")).await.unwrap();

        // PLANNING has no self edge, so only one racing CREATED -> PLANNING wins
        let mut handles = Vec::new();
        for _ in 0..8 {
            let sm = sm.clone();
            let id = task.task_id.clone();
            handles.push(tokio::spawn(async move {
                sm.update(&id, TaskUpdate::new(), Some(TaskState::Planning))
                    .await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(
            sm.get(&task.task_id).await.unwrap().state,
            TaskState::Planning
        );
        assert!(sm.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_blocked_resumes_only_to_origin() {
        let sm = machine();
        let task = sm.create(new_task("A")).await.unwrap();
        let id = task.task_id.clone();

        sm.update(&id, TaskUpdate::new(), Some(TaskState::Blocked))
            .await
            .unwrap();

        let err = sm
            .update(&id, TaskUpdate::new(), Some(TaskState::ReviewReady))
            .await
            .unwrap_err();
        match err {
            WorkflowError::InvalidTransition { from, to, allowed } => {
                assert_eq!(from, TaskState::Blocked);
                assert_eq!(to, TaskState::ReviewReady);
                assert_eq!(allowed, vec![TaskState::Created, TaskState::Cancelled]);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let stored = sm.get(&id).await.unwrap();
        assert_eq!(stored.state, TaskState::Blocked);
        assert_eq!(stored.metadata.blocked_from, Some(TaskState::Created));

        let resumed = sm
            .update(&id, TaskUpdate::new(), Some(TaskState::Created))
            .await
            .unwrap();
        assert_eq!(resumed.state, TaskState::Created);
    }

    #[tokio::test]
    async fn test_blocked_task_can_always_be_cancelled() {
        let sm = machine();
        let task = sm.create(new_task("A")).await.unwrap();
        let id = task.task_id.clone();

        sm.advance(
            &id,
            TaskUpdate::new(),
            &[TaskState::Planning, TaskState::Blocked, TaskState::Cancelled],
        )
        .await
        .unwrap();
        assert_eq!(sm.get(&id).await.unwrap().state, TaskState::Cancelled);
    }

    #[tokio::test]
    async fn test_lock_entries_released_after_update() {
        let sm = machine();
        let first = sm.create(new_task("A")).await.unwrap();
        let second = sm.create(new_task("B")).await.unwrap();

        sm.update(&first.task_id, TaskUpdate::new(), Some(TaskState::Planning))
            .await
            .unwrap();
        let _ = sm
            .update(&second.task_id, TaskUpdate::new(), Some(TaskState::Completed))
            .await;

        assert!(sm.locks.lock().await.is_empty());
    }
}
