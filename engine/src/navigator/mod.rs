//! Workflow navigator
//!
//! The per-call decision function. Every lifecycle operation goes through
//! here: load the task, load recent session history, call the judge when the
//! operation needs one, apply the transition from the decision table, record
//! the call in history and answer with a [`ResponseEnvelope`].
//!
//! # Failure semantics
//!
//! - `NotFound`, `InvalidTransition` and `IncompleteApprovals` are returned
//!   before the judge is called.
//! - `RateLimitExhausted` and `DeadlineExceeded` leave the task in its
//!   pre-call state; the caller may retry the whole operation.
//! - A delegated decision naming an unknown operation fails with
//!   `InvalidNextAction` and nothing is written.

use sdk::envelope::{Instructions, ResponseEnvelope};
use sdk::errors::WorkflowError;
use sdk::types::{Operation, TaskState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::Task;
use crate::history::ConversationHistoryCache;
use crate::invoker::ResilientInvoker;
use crate::judge::{
    Decider, DecisionRequest, ElicitationOutcome, ElicitationRequest, Elicitor,
    FallbackElicitor, HistoryEntry, Judge, JudgmentRequest,
};
use crate::lifecycle::{NewTask, TaskStateMachine, TaskUpdate};

pub mod requests;
pub mod table;

pub use requests::{
    CallContext, CodeChangeSubmission, CompletionSubmission, MissingRequirements,
    ObstacleReport, PlanSubmission, RecoveredTask, TaskAction, TaskRequest, TestingSubmission,
};

/// Records handed to the judge when not configured otherwise
pub const DEFAULT_ENRICHMENT_COUNT: usize = 10;

/// Next operation plus the guidance that goes with it
struct NextStep {
    action: Option<Operation>,
    rationale: Option<String>,
    steps: Vec<String>,
}

/// Routes lifecycle calls through judgment, state and history
pub struct WorkflowNavigator {
    tasks: Arc<TaskStateMachine>,
    history: ConversationHistoryCache,
    invoker: ResilientInvoker,
    judge: Arc<dyn Judge>,
    decider: Option<Arc<dyn Decider>>,
    elicitor: Arc<dyn Elicitor>,
    enrichment_count: usize,
}

impl WorkflowNavigator {
    pub fn new(
        tasks: Arc<TaskStateMachine>,
        history: ConversationHistoryCache,
        invoker: ResilientInvoker,
        judge: Arc<dyn Judge>,
    ) -> Self {
        Self {
            tasks,
            history,
            invoker,
            judge,
            decider: None,
            elicitor: Arc::new(FallbackElicitor),
            enrichment_count: DEFAULT_ENRICHMENT_COUNT,
        }
    }

    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn with_elicitor(mut self, elicitor: Arc<dyn Elicitor>) -> Self {
        self.elicitor = elicitor;
        self
    }

    pub fn with_enrichment_count(mut self, count: usize) -> Self {
        self.enrichment_count = count;
        self
    }

    pub fn tasks(&self) -> &TaskStateMachine {
        &self.tasks
    }

    pub fn history(&self) -> &ConversationHistoryCache {
        &self.history
    }

    /// Run an operation from its JSON input
    ///
    /// The operation is already a registry member; only the input shape is
    /// checked here.
    pub async fn dispatch(
        &self,
        ctx: &CallContext,
        op: Operation,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, WorkflowError> {
        match op {
            Operation::CreateOrUpdateTask => {
                to_json(self.create_or_update_task(ctx, parse(input)?).await?)
            }
            Operation::RecoverCurrentTask => to_json(self.recover_current_task(ctx).await?),
            Operation::JudgePlan => to_json(self.judge_plan(ctx, parse(input)?).await?),
            Operation::JudgeCodeChange => {
                to_json(self.judge_code_change(ctx, parse(input)?).await?)
            }
            Operation::JudgeTesting => to_json(self.judge_testing(ctx, parse(input)?).await?),
            Operation::JudgeCompletion => {
                to_json(self.judge_completion(ctx, parse(input)?).await?)
            }
            Operation::RaiseObstacle => to_json(self.raise_obstacle(ctx, parse(input)?).await?),
            Operation::RaiseMissingRequirements => {
                to_json(self.raise_missing_requirements(ctx, parse(input)?).await?)
            }
            Operation::Navigate => {
                let task_id = input
                    .get("task_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| WorkflowError::InvalidInput("task_id is required".to_string()))?;
                to_json(self.navigate(ctx, task_id).await?)
            }
        }
    }

    /// create-or-update-task
    pub async fn create_or_update_task(
        &self,
        ctx: &CallContext,
        request: TaskRequest,
    ) -> Result<ResponseEnvelope, WorkflowError> {
        let result = self.create_or_update_inner(ctx, &request).await;
        self.finish(ctx, Operation::CreateOrUpdateTask, &request, result)
            .await
    }

    async fn create_or_update_inner(
        &self,
        ctx: &CallContext,
        request: &TaskRequest,
    ) -> Result<ResponseEnvelope, WorkflowError> {
        let task = match request.action {
            TaskAction::Create => {
                let title = request.title.clone().ok_or_else(|| {
                    WorkflowError::InvalidInput("title is required to create a task".to_string())
                })?;
                self.tasks
                    .create(NewTask {
                        title,
                        description: request.description.clone().unwrap_or_default(),
                        requirements: request.requirements.clone().unwrap_or_default(),
                        acceptance_criteria: request
                            .acceptance_criteria
                            .clone()
                            .unwrap_or_default(),
                        tags: request.tags.clone().unwrap_or_default(),
                    })
                    .await?
            }
            TaskAction::Update => {
                let task_id = request.task_id.as_deref().ok_or_else(|| {
                    WorkflowError::InvalidInput("task_id is required to update a task".to_string())
                })?;
                let current = self.tasks.get(task_id).await?;
                let requested = requestable_state(&current, request.state)?;

                let mut fields = TaskUpdate {
                    title: request.title.clone(),
                    description: request.description.clone(),
                    acceptance_criteria: request.acceptance_criteria.clone(),
                    tags: request.tags.clone(),
                    ..Default::default()
                };
                if let Some(requirements) = &request.requirements {
                    fields = fields.requirements(requirements.clone(), "update");
                }

                self.tasks.update(task_id, fields, requested).await?
            }
        };

        let next = self
            .decide_next(
                ctx,
                &task,
                Operation::CreateOrUpdateTask,
                true,
                table::route(task.state),
                None,
            )
            .await?;

        let rationale = format!("Task is {}: {}", task.state, task.state.description());
        Ok(self.envelope(ctx, &task, next, rationale, json!({ "task": task })))
    }

    /// recover-current-task
    pub async fn recover_current_task(
        &self,
        ctx: &CallContext,
    ) -> Result<RecoveredTask, WorkflowError> {
        let result = self.tasks.current().await.map(|task| RecoveredTask {
            found: task.is_some(),
            task_id: task.as_ref().map(|t| t.task_id.clone()),
            task,
        });
        self.finish(ctx, Operation::RecoverCurrentTask, &json!({}), result)
            .await
    }

    /// judge-plan
    pub async fn judge_plan(
        &self,
        ctx: &CallContext,
        submission: PlanSubmission,
    ) -> Result<ResponseEnvelope, WorkflowError> {
        let mut context_ids = Vec::new();
        let result = self
            .judge_submission(
                ctx,
                Operation::JudgePlan,
                &submission.task_id,
                to_json(&submission)?,
                TaskUpdate::new(),
                &mut context_ids,
            )
            .await;
        self.finish_with_context(ctx, Operation::JudgePlan, &submission, result, context_ids)
            .await
    }

    /// judge-code-change
    pub async fn judge_code_change(
        &self,
        ctx: &CallContext,
        submission: CodeChangeSubmission,
    ) -> Result<ResponseEnvelope, WorkflowError> {
        let mut extra = TaskUpdate::new();
        if let Some(path) = &submission.file_path {
            extra = extra.modified_file(path.clone());
        }

        let mut context_ids = Vec::new();
        let result = self
            .judge_submission(
                ctx,
                Operation::JudgeCodeChange,
                &submission.task_id,
                to_json(&submission)?,
                extra,
                &mut context_ids,
            )
            .await;
        self.finish_with_context(ctx, Operation::JudgeCodeChange, &submission, result, context_ids)
            .await
    }

    /// judge-testing
    pub async fn judge_testing(
        &self,
        ctx: &CallContext,
        submission: TestingSubmission,
    ) -> Result<ResponseEnvelope, WorkflowError> {
        let mut extra = TaskUpdate::new();
        for path in &submission.test_files {
            extra = extra.test_file(path.clone());
        }

        let mut context_ids = Vec::new();
        let result = self
            .judge_submission(
                ctx,
                Operation::JudgeTesting,
                &submission.task_id,
                to_json(&submission)?,
                extra,
                &mut context_ids,
            )
            .await;
        self.finish_with_context(ctx, Operation::JudgeTesting, &submission, result, context_ids)
            .await
    }

    /// judge-completion
    pub async fn judge_completion(
        &self,
        ctx: &CallContext,
        submission: CompletionSubmission,
    ) -> Result<ResponseEnvelope, WorkflowError> {
        let mut context_ids = Vec::new();
        let result = self
            .judge_submission(
                ctx,
                Operation::JudgeCompletion,
                &submission.task_id,
                to_json(&submission)?,
                TaskUpdate::new(),
                &mut context_ids,
            )
            .await;
        self.finish_with_context(ctx, Operation::JudgeCompletion, &submission, result, context_ids)
            .await
    }

    /// navigate: where should a task go from here
    pub async fn navigate(
        &self,
        ctx: &CallContext,
        task_id: &str,
    ) -> Result<ResponseEnvelope, WorkflowError> {
        let result = async {
            let task = self.tasks.get(task_id).await?;
            let next = self
                .decide_next(
                    ctx,
                    &task,
                    Operation::Navigate,
                    true,
                    table::route(task.state),
                    None,
                )
                .await?;
            let rationale = format!("Task is {}: {}", task.state, task.state.description());
            let payload = json!({ "task": task });
            Ok::<_, WorkflowError>(self.envelope(ctx, &task, next, rationale, payload))
        }
        .await;

        self.finish(ctx, Operation::Navigate, &json!({ "task_id": task_id }), result)
            .await
    }

    /// raise-obstacle: block the task and ask the user how to proceed
    pub async fn raise_obstacle(
        &self,
        ctx: &CallContext,
        report: ObstacleReport,
    ) -> Result<ResponseEnvelope, WorkflowError> {
        let result = self.raise_obstacle_inner(ctx, &report).await;
        self.finish(ctx, Operation::RaiseObstacle, &report, result)
            .await
    }

    async fn raise_obstacle_inner(
        &self,
        ctx: &CallContext,
        report: &ObstacleReport,
    ) -> Result<ResponseEnvelope, WorkflowError> {
        let mut task = match &report.task_id {
            Some(id) => {
                let task = self.tasks.get(id).await?;
                if task.state == TaskState::Blocked {
                    Some(task)
                } else {
                    Some(
                        self.tasks
                            .update(id, TaskUpdate::new(), Some(TaskState::Blocked))
                            .await?,
                    )
                }
            }
            None => None,
        };

        let options = report
            .options
            .iter()
            .enumerate()
            .map(|(i, option)| format!("{}. {}", i + 1, option))
            .collect::<Vec<_>>()
            .join("\n");

        let request = ElicitationRequest {
            operation: Operation::RaiseObstacle,
            message: format!(
                "OBSTACLE ENCOUNTERED\n\nProblem: {}\n\nResearch done: {}\n\nOptions:\n{}\n\n\
                 Choose an option and add any context.",
                report.problem, report.research, options
            ),
            schema: json!({
                "type": "object",
                "properties": {
                    "chosen_option": { "type": "string" },
                    "additional_context": { "type": "string" }
                },
                "required": ["chosen_option"]
            }),
        };

        let outcome = self.elicit(&request).await?;

        if matches!(outcome, ElicitationOutcome::Accepted(_)) {
            if let Some(current) = &task {
                if let Some(origin) = current.metadata.blocked_from {
                    task = Some(
                        self.tasks
                            .update(&current.task_id, TaskUpdate::new(), Some(origin))
                            .await?,
                    );
                }
            }
        }

        let next = match (&outcome, &task) {
            (ElicitationOutcome::Accepted(_), Some(t)) if t.state != TaskState::Blocked => {
                NextStep::from_table(table::route(t.state))
            }
            (ElicitationOutcome::Accepted(_), None) => {
                NextStep::from_table(Some(Operation::CreateOrUpdateTask))
            }
            _ => NextStep {
                action: Some(Operation::CreateOrUpdateTask),
                rationale: None,
                steps: vec![
                    "Ask the user directly how to resolve the obstacle".to_string(),
                    "Resume the task with create-or-update-task once resolved".to_string(),
                ],
            },
        };

        Ok(self.elicitation_envelope(ctx, task.as_ref(), next, outcome))
    }

    /// raise-missing-requirements: ask the user to close requirement gaps
    pub async fn raise_missing_requirements(
        &self,
        ctx: &CallContext,
        report: MissingRequirements,
    ) -> Result<ResponseEnvelope, WorkflowError> {
        let result = self.raise_missing_requirements_inner(ctx, &report).await;
        self.finish(ctx, Operation::RaiseMissingRequirements, &report, result)
            .await
    }

    async fn raise_missing_requirements_inner(
        &self,
        ctx: &CallContext,
        report: &MissingRequirements,
    ) -> Result<ResponseEnvelope, WorkflowError> {
        let mut task = match &report.task_id {
            Some(id) => Some(self.tasks.get(id).await?),
            None => None,
        };

        let gaps = report
            .gaps
            .iter()
            .map(|gap| format!("- {}", gap))
            .collect::<Vec<_>>()
            .join("\n");
        let questions = report
            .questions
            .iter()
            .enumerate()
            .map(|(i, q)| format!("{}. {}", i + 1, q))
            .collect::<Vec<_>>()
            .join("\n");

        let request = ElicitationRequest {
            operation: Operation::RaiseMissingRequirements,
            message: format!(
                "REQUIREMENTS CLARIFICATION NEEDED\n\nCurrent understanding: {}\n\n\
                 Gaps:\n{}\n\nQuestions:\n{}",
                report.current_request, gaps, questions
            ),
            schema: json!({
                "type": "object",
                "properties": {
                    "clarified_requirements": { "type": "string" },
                    "priority": { "type": "string", "enum": ["high", "medium", "low"] }
                },
                "required": ["clarified_requirements"]
            }),
        };

        let outcome = self.elicit(&request).await?;

        if let (ElicitationOutcome::Accepted(data), Some(current)) = (&outcome, &task) {
            let clarified = data
                .get("clarified_requirements")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty());
            if let Some(clarified) = clarified {
                task = Some(
                    self.tasks
                        .update(
                            &current.task_id,
                            TaskUpdate::new().requirements(clarified, "clarification"),
                            None,
                        )
                        .await?,
                );
            }
        }

        let next = match (&outcome, &task) {
            (ElicitationOutcome::Accepted(_), Some(t)) => {
                NextStep::from_table(table::route(t.state))
            }
            (ElicitationOutcome::Accepted(_), None) => {
                NextStep::from_table(Some(Operation::CreateOrUpdateTask))
            }
            _ => NextStep {
                action: Some(Operation::CreateOrUpdateTask),
                rationale: None,
                steps: vec![
                    "Ask the user the open questions directly".to_string(),
                    "Record the answers with create-or-update-task".to_string(),
                ],
            },
        };

        Ok(self.elicitation_envelope(ctx, task.as_ref(), next, outcome))
    }

    /// Shared path of the four judgment operations
    async fn judge_submission(
        &self,
        ctx: &CallContext,
        op: Operation,
        task_id: &str,
        submission: serde_json::Value,
        extra: TaskUpdate,
        context_ids: &mut Vec<String>,
    ) -> Result<ResponseEnvelope, WorkflowError> {
        let task = self.tasks.get(task_id).await?;

        let row = table::transition(op, task.state).ok_or_else(|| {
            debug!(
                task_id = %task_id,
                operation = %op,
                state = %task.state,
                accepted = ?table::accepted_states(op),
                "Operation not accepted in current state"
            );
            WorkflowError::InvalidTransition {
                from: task.state,
                to: table::target_state(op).unwrap_or(task.state),
                allowed: task.state.allowed_transitions().to_vec(),
            }
        })?;

        if op == Operation::JudgeCompletion {
            let missing = task.metadata.approvals.missing();
            if !missing.is_empty() {
                return Err(WorkflowError::IncompleteApprovals {
                    state: task.state,
                    missing,
                });
            }
        }

        let records = self
            .history
            .recent(&ctx.session_id, self.enrichment_count)
            .await?;
        context_ids.extend(records.iter().map(|r| r.id.clone()));
        let history: Vec<HistoryEntry> = records.iter().map(HistoryEntry::from).collect();

        let request = JudgmentRequest {
            operation: op,
            task: task.clone(),
            submission,
            history: history.clone(),
        };
        let verdict = self
            .invoker
            .invoke(|| self.judge.evaluate(&request))
            .await?;

        info!(
            task_id = %task_id,
            operation = %op,
            approved = verdict.approved,
            "Judgment received"
        );

        let (path, suggested) = if verdict.approved {
            (row.path, row.on_approve)
        } else {
            (&[][..], Some(row.on_reject))
        };
        // The decider sees the task as it will be after the commit
        let mut projected = task.clone();
        if let Some(last) = path.last() {
            projected.state = *last;
        }
        let next = self
            .decide_next(
                ctx,
                &projected,
                op,
                verdict.approved,
                suggested,
                Some(history),
            )
            .await?;

        // A rejection writes nothing; the caller reworks from the same state
        let updated = if verdict.approved {
            let mut fields = extra;
            if let Some(stage) = row.stamp {
                fields = fields.grant(stage);
            }
            if op == Operation::JudgePlan {
                fields.research = verdict.research.clone();
                fields.internal_research = verdict.internal_research.clone();
                fields.risk_assessment = verdict.risk_assessment.clone();
            }
            self.tasks.advance(task_id, fields, path).await?
        } else {
            task
        };

        let rationale = if !verdict.feedback.is_empty() {
            verdict.feedback.clone()
        } else if verdict.approved {
            format!("{} approved", op)
        } else {
            format!("{} rejected", op)
        };

        let payload = json!({
            "approved": verdict.approved,
            "feedback": verdict.feedback,
            "required_improvements": verdict.required_improvements,
            "task": updated,
        });

        let mut next = next;
        if !verdict.approved && next.steps.is_empty() {
            next.steps = verdict.required_improvements.clone();
        }

        let envelope = self.envelope(ctx, &updated, next, rationale, payload);
        if verdict.approved {
            Ok(envelope)
        } else {
            Ok(envelope.with_blockers(verdict.required_improvements))
        }
    }

    /// Table suggestion, optionally overridden by the decider
    ///
    /// `history` is loaded from the session when the caller has none at hand.
    async fn decide_next(
        &self,
        ctx: &CallContext,
        task: &Task,
        last_operation: Operation,
        approved: bool,
        suggested: Option<Operation>,
        history: Option<Vec<HistoryEntry>>,
    ) -> Result<NextStep, WorkflowError> {
        let (Some(suggestion), Some(decider)) = (suggested, &self.decider) else {
            return Ok(NextStep::from_table(suggested));
        };

        let history = match history {
            Some(history) => history,
            None => self
                .history
                .recent(&ctx.session_id, self.enrichment_count)
                .await?
                .iter()
                .map(HistoryEntry::from)
                .collect(),
        };
        let request = DecisionRequest {
            task: task.clone(),
            last_operation,
            approved,
            suggested: Some(suggestion),
            history,
        };

        match self.invoker.invoke(|| decider.decide(&request)).await {
            Ok(decision) => match decision.next_action.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() => {
                    let action: Operation = name.parse()?;
                    debug!(
                        task_id = %task.task_id,
                        suggested = %suggestion,
                        chosen = %action,
                        "Decider picked next action"
                    );
                    Ok(NextStep {
                        action: Some(action),
                        rationale: Some(decision.rationale).filter(|r| !r.is_empty()),
                        steps: decision.steps,
                    })
                }
                _ => Ok(NextStep::from_table(suggested)),
            },
            Err(e) => {
                warn!(
                    task_id = %task.task_id,
                    "Decider failed, falling back to decision table: {}",
                    e
                );
                Ok(NextStep::from_table(suggested))
            }
        }
    }

    async fn elicit(
        &self,
        request: &ElicitationRequest,
    ) -> Result<ElicitationOutcome, WorkflowError> {
        self.elicitor
            .elicit(request)
            .await
            .map_err(|e| WorkflowError::Elicitation(e.to_string()))
    }

    fn envelope(
        &self,
        ctx: &CallContext,
        task: &Task,
        next: NextStep,
        rationale: String,
        payload: serde_json::Value,
    ) -> ResponseEnvelope {
        let correlation_id = correlation_id(ctx);
        let task_id = Some(task.task_id.clone());
        let rationale = next.rationale.unwrap_or(rationale);

        // Terminal states close the lifecycle even if a decider said otherwise
        match next.action.filter(|_| !task.state.is_terminal()) {
            Some(action) => ResponseEnvelope::next(
                action,
                Instructions::new(rationale)
                    .with_steps(next.steps)
                    .with_payload(payload),
                task_id,
                correlation_id,
            ),
            None => ResponseEnvelope::terminal(
                Instructions::new(rationale).with_payload(payload),
                task_id,
                correlation_id,
            ),
        }
    }

    fn elicitation_envelope(
        &self,
        ctx: &CallContext,
        task: Option<&Task>,
        next: NextStep,
        outcome: ElicitationOutcome,
    ) -> ResponseEnvelope {
        let rationale = match &outcome {
            ElicitationOutcome::Accepted(_) => "User answered".to_string(),
            ElicitationOutcome::Declined => "User declined to answer".to_string(),
            ElicitationOutcome::Unavailable(message) => message.clone(),
        };
        let payload = json!({ "outcome": outcome, "task": task });

        match task {
            Some(task) => self.envelope(ctx, task, next, rationale, payload),
            None => ResponseEnvelope::next(
                next.action.unwrap_or(Operation::CreateOrUpdateTask),
                Instructions::new(next.rationale.unwrap_or(rationale))
                    .with_steps(next.steps)
                    .with_payload(payload),
                None,
                correlation_id(ctx),
            ),
        }
    }

    /// Record the call in session history and hand the result back
    async fn finish<I, T>(
        &self,
        ctx: &CallContext,
        op: Operation,
        input: &I,
        result: Result<T, WorkflowError>,
    ) -> Result<T, WorkflowError>
    where
        I: Serialize,
        T: Serialize,
    {
        self.finish_with_context(ctx, op, input, result, Vec::new())
            .await
    }

    /// Same as `finish`, linking the records the call read as context
    async fn finish_with_context<I, T>(
        &self,
        ctx: &CallContext,
        op: Operation,
        input: &I,
        result: Result<T, WorkflowError>,
        context_ids: Vec<String>,
    ) -> Result<T, WorkflowError>
    where
        I: Serialize,
        T: Serialize,
    {
        let output = match &result {
            Ok(value) => serde_json::to_string(value),
            Err(err) => serde_json::to_string(&json!({ "error": err.to_string() })),
        };

        match (serde_json::to_string(input), output) {
            (Ok(input), Ok(output)) => {
                if let Err(e) = self
                    .history
                    .save_with_context(&ctx.session_id, op.as_str(), &input, &output, context_ids)
                    .await
                {
                    warn!(
                        session_id = %ctx.session_id,
                        operation = %op,
                        "Failed to record call: {}",
                        e
                    );
                }
            }
            _ => warn!(operation = %op, "Failed to serialize call for history"),
        }

        result
    }
}

impl NextStep {
    fn from_table(action: Option<Operation>) -> Self {
        Self {
            action,
            rationale: None,
            steps: action
                .map(|op| {
                    table::preparation_steps(op)
                        .iter()
                        .map(|s| s.to_string())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// Which states a caller may request directly through create-or-update-task
///
/// Lifecycle progress only happens through judgment; callers may block,
/// cancel, or resume a blocked task to where it came from.
fn requestable_state(
    task: &Task,
    requested: Option<TaskState>,
) -> Result<Option<TaskState>, WorkflowError> {
    match requested {
        None => Ok(None),
        Some(state) if state == task.state => Ok(None),
        Some(TaskState::Blocked) | Some(TaskState::Cancelled) => Ok(requested),
        Some(state)
            if task.state == TaskState::Blocked && task.metadata.blocked_from == Some(state) =>
        {
            Ok(requested)
        }
        Some(state) => Err(WorkflowError::InvalidInput(format!(
            "state {} can only be reached through its judgment operation",
            state
        ))),
    }
}

fn correlation_id(ctx: &CallContext) -> String {
    ctx.correlation_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn parse<T: DeserializeOwned>(input: serde_json::Value) -> Result<T, WorkflowError> {
    serde_json::from_value(input).map_err(|e| WorkflowError::InvalidInput(e.to_string()))
}

fn to_json<T: Serialize>(value: T) -> Result<serde_json::Value, WorkflowError> {
    serde_json::to_value(value).map_err(|e| WorkflowError::InvalidInput(e.to_string()))
}
