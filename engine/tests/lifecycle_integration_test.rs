//! End-to-end lifecycle scenarios over a SQLite context store
//!
//! A scripted judge stands in for the endpoint; tasks and history are
//! persisted through `open_store` and survive reopening the database.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use arbiter_engine::db::{open_store, ContextStore};
use arbiter_engine::history::{ConversationHistoryCache, HistoryLimits};
use arbiter_engine::invoker::ResilientInvoker;
use arbiter_engine::judge::{Judge, JudgmentError, JudgmentRequest, Verdict};
use arbiter_engine::lifecycle::TaskStateMachine;
use arbiter_engine::navigator::{
    CallContext, CodeChangeSubmission, CompletionSubmission, PlanSubmission, TaskRequest,
    TestingSubmission, WorkflowNavigator,
};
use sdk::types::{ApprovalStage, Operation, TaskState};

/// Replays verdicts and remembers what it was asked
#[derive(Default)]
struct ScriptedJudge {
    verdicts: Mutex<VecDeque<Verdict>>,
    seen: Mutex<Vec<JudgmentRequest>>,
}

impl ScriptedJudge {
    fn new(verdicts: Vec<Verdict>) -> Arc<Self> {
        Arc::new(Self {
            verdicts: Mutex::new(verdicts.into()),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn evaluate(&self, request: &JudgmentRequest) -> Result<Verdict, JudgmentError> {
        self.seen.lock().unwrap().push(request.clone());
        Ok(self
            .verdicts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Verdict::approved("ok")))
    }
}

fn url(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("arbiter.db").display())
}

async fn navigator(store: Arc<dyn ContextStore>, judge: Arc<ScriptedJudge>) -> WorkflowNavigator {
    let tasks = Arc::new(TaskStateMachine::new(store.clone()));
    let history = ConversationHistoryCache::new(store, HistoryLimits::default());
    WorkflowNavigator::new(tasks, history, ResilientInvoker::default(), judge)
}

fn ctx() -> CallContext {
    CallContext::new("session-a").with_correlation_id("corr-1")
}

#[tokio::test]
async fn test_rejected_plan_then_full_lifecycle() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&url(&dir)).await.unwrap();
    let judge = ScriptedJudge::new(vec![
        Verdict::rejected("no rollback story", ["describe the rollback"]),
        Verdict::approved("plan is solid"),
    ]);
    let nav = navigator(store, judge.clone()).await;

    let created = nav
        .create_or_update_task(&ctx(), TaskRequest::create("Add login", "users log in"))
        .await
        .unwrap();
    assert_eq!(created.metadata().correlation_id, "corr-1");
    let id = created.task_id().unwrap().to_string();

    let plan = PlanSubmission {
        task_id: id.clone(),
        plan: "session table".to_string(),
        design: "sqlite".to_string(),
        ..Default::default()
    };

    let rejected = nav.judge_plan(&ctx(), plan.clone()).await.unwrap();
    assert_eq!(rejected.next_action(), Some(Operation::JudgePlan));
    assert_eq!(rejected.blockers, vec!["describe the rollback"]);
    assert_eq!(nav.tasks().get(&id).await.unwrap().state, TaskState::Created);

    let approved = nav.judge_plan(&ctx(), plan).await.unwrap();
    assert_eq!(approved.next_action(), Some(Operation::JudgeCodeChange));

    nav.judge_code_change(
        &ctx(),
        CodeChangeSubmission {
            task_id: id.clone(),
            code_change: "+fn login() {}".to_string(),
            file_path: Some("src/login.rs".to_string()),
            change_description: Some("login handler".to_string()),
        },
    )
    .await
    .unwrap();

    nav.judge_testing(
        &ctx(),
        TestingSubmission {
            task_id: id.clone(),
            test_summary: "login tests".to_string(),
            test_files: vec!["tests/login.rs".to_string()],
            execution_results: "2 passed".to_string(),
            coverage: Some("90%".to_string()),
        },
    )
    .await
    .unwrap();

    let done = nav
        .judge_completion(
            &ctx(),
            CompletionSubmission {
                task_id: id.clone(),
                completion_summary: "done".to_string(),
                requirements_met: vec!["users log in".to_string()],
                implementation_details: "session table".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(done.is_final());
    assert_eq!(done.next_action(), None);

    let task = nav.tasks().get(&id).await.unwrap();
    assert_eq!(task.state, TaskState::Completed);
    for stage in ApprovalStage::ALL {
        assert!(task.metadata.approvals.get(stage).is_some(), "{stage} missing");
    }

    // The second plan review saw the first one in its context
    let seen = judge.seen.lock().unwrap();
    assert_eq!(seen.len(), 5);
    assert_eq!(seen[1].history[0].source, "judge-plan");
    assert!(seen[1].history.len() >= 2);
}

#[tokio::test]
async fn test_state_and_history_survive_reopen() {
    let dir = TempDir::new().unwrap();

    let id = {
        let store = open_store(&url(&dir)).await.unwrap();
        let nav = navigator(store, ScriptedJudge::new(Vec::new())).await;
        let id = nav
            .create_or_update_task(&ctx(), TaskRequest::create("Add login", "users log in"))
            .await
            .unwrap()
            .task_id()
            .unwrap()
            .to_string();
        nav.judge_plan(
            &ctx(),
            PlanSubmission {
                task_id: id.clone(),
                plan: "p".to_string(),
                design: "d".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        id
    };

    let store = open_store(&url(&dir)).await.unwrap();
    let nav = navigator(store, ScriptedJudge::new(Vec::new())).await;

    let recovered = nav.recover_current_task(&ctx()).await.unwrap();
    assert!(recovered.found);
    assert_eq!(recovered.task_id.as_deref(), Some(id.as_str()));
    assert_eq!(recovered.task.unwrap().state, TaskState::PlanApproved);

    let records = nav.history().recent("session-a", 10).await.unwrap();
    let sources: Vec<&str> = records.iter().map(|r| r.source.as_str()).collect();
    assert_eq!(
        sources,
        vec!["recover-current-task", "judge-plan", "create-or-update-task"]
    );
}

#[tokio::test]
async fn test_sessions_do_not_share_history() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&url(&dir)).await.unwrap();
    let nav = navigator(store, ScriptedJudge::new(Vec::new())).await;

    nav.create_or_update_task(&CallContext::new("one"), TaskRequest::create("a", "r"))
        .await
        .unwrap();
    nav.create_or_update_task(&CallContext::new("two"), TaskRequest::create("b", "r"))
        .await
        .unwrap();

    assert_eq!(nav.history().recent("one", 10).await.unwrap().len(), 1);
    assert_eq!(nav.history().recent("two", 10).await.unwrap().len(), 1);
    assert_eq!(nav.history().clear("one").await.unwrap(), 1);
    assert!(nav.history().recent("one", 10).await.unwrap().is_empty());
    assert_eq!(nav.history().recent("two", 10).await.unwrap().len(), 1);
}
