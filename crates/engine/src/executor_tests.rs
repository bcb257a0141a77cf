//! Engine tests driven through `MemoryStore` and `MockExecutor`.
//!
//! Time-sensitive tests run with a paused tokio clock so back-off and
//! timeouts elapse instantly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use db::models::{
    NewRun, NewWorkflow, PublishChain, RunRow, StepExecutionRow, StepRow, WorkflowRow,
};
use db::{DbError, ExecutionOutcome, MemoryStore, RunStatus, Store};
use executors::mock::MockExecutor;
use executors::{ExecutorError, RunContext, StepExecutor, StepResult};

use crate::executor::{default_registry, ExecutorConfig, ExecutorRegistry, RunEngine};
use crate::models::{BranchLabel, GraphEdge, GraphNode, WorkflowGraph};
use crate::publish::Publisher;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// trigger -> each `(node_id, step_type)` in order.
fn linear(actions: &[(&str, &str)]) -> WorkflowGraph {
    let mut nodes = vec![GraphNode::trigger("t", "contact_updated", json!({}))];
    let mut edges = Vec::new();
    let mut previous = "t".to_string();
    for (i, (id, step_type)) in actions.iter().enumerate() {
        nodes.push(GraphNode::action(*id, *step_type, json!({})));
        edges.push(GraphEdge::new(format!("e{i}"), previous.clone(), *id));
        previous = id.to_string();
    }
    WorkflowGraph::new(nodes, edges)
}

/// trigger -> condition(amount > 10) -> high | low
fn branching() -> WorkflowGraph {
    WorkflowGraph::new(
        vec![
            GraphNode::trigger("t", "deal_updated", json!({})),
            GraphNode::condition("c", json!({ "field": "amount", "operator": "gt", "value": 10 })),
            GraphNode::action("high", "high_value", json!({})),
            GraphNode::action("low", "low_value", json!({})),
        ],
        vec![
            GraphEdge::new("e1", "t", "c"),
            GraphEdge::new("e2", "c", "high").on(BranchLabel::True),
            GraphEdge::new("e3", "c", "low").on(BranchLabel::False),
        ],
    )
}

async fn published(store: &Arc<MemoryStore>, graph: &WorkflowGraph) -> WorkflowRow {
    let wf = store
        .create_workflow(NewWorkflow {
            organization_id: Uuid::new_v4(),
            name: "engine test".into(),
            raw_graph: graph.to_value().unwrap(),
        })
        .await
        .unwrap();
    Publisher::new(store.clone()).publish(wf.id).await.unwrap();
    store.get_workflow(wf.id).await.unwrap()
}

trait Register {
    fn with(self, step_type: &str, executor: Arc<dyn StepExecutor>) -> Self;
}

impl Register for ExecutorRegistry {
    fn with(mut self, step_type: &str, executor: Arc<dyn StepExecutor>) -> Self {
        self.insert(step_type.to_owned(), executor);
        self
    }
}

fn engine(store: &Arc<MemoryStore>, registry: ExecutorRegistry, config: ExecutorConfig) -> RunEngine {
    RunEngine::new(store.clone(), registry, config)
}

fn fast_config(max_retries: u32) -> ExecutorConfig {
    ExecutorConfig {
        max_retries,
        retry_base_delay: Duration::from_millis(100),
        step_timeout: Duration::from_secs(1),
    }
}

/// Aborts the run it is executing, then returns `result`.
struct AbortingExecutor {
    store: Arc<MemoryStore>,
    retryable: bool,
}

#[async_trait]
impl StepExecutor for AbortingExecutor {
    async fn execute(&self, _config: &Value, ctx: &RunContext) -> Result<StepResult, ExecutorError> {
        self.store
            .transition_run(ctx.run_id, RunStatus::Running, RunStatus::Aborted, None)
            .await
            .unwrap();
        if self.retryable {
            Err(ExecutorError::Retryable("still busy".into()))
        } else {
            Ok(StepResult::success())
        }
    }
}

/// Delegates to a `MemoryStore` but refuses every write made after a run
/// starts: step executions and the failure transition.
struct BrokenWrites {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl Store for BrokenWrites {
    async fn create_workflow(&self, new: NewWorkflow) -> Result<WorkflowRow, DbError> {
        self.inner.create_workflow(new).await
    }
    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        self.inner.get_workflow(id).await
    }
    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, DbError> {
        self.inner.list_workflows().await
    }
    async fn update_graph(&self, id: Uuid, raw_graph: Value) -> Result<WorkflowRow, DbError> {
        self.inner.update_graph(id, raw_graph).await
    }
    async fn deactivate_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        self.inner.deactivate_workflow(id).await
    }
    async fn list_active_workflows(&self, org: Uuid, trigger_type: &str) -> Result<Vec<WorkflowRow>, DbError> {
        self.inner.list_active_workflows(org, trigger_type).await
    }
    async fn publish_chain(&self, chain: PublishChain) -> Result<WorkflowRow, DbError> {
        self.inner.publish_chain(chain).await
    }
    async fn list_steps(&self, workflow_id: Uuid, version: i32) -> Result<Vec<StepRow>, DbError> {
        self.inner.list_steps(workflow_id, version).await
    }
    async fn create_run(&self, new: NewRun) -> Result<RunRow, DbError> {
        self.inner.create_run(new).await
    }
    async fn get_run(&self, id: Uuid) -> Result<RunRow, DbError> {
        self.inner.get_run(id).await
    }
    async fn list_runs(&self, workflow_id: Uuid) -> Result<Vec<RunRow>, DbError> {
        self.inner.list_runs(workflow_id).await
    }
    async fn transition_run(
        &self,
        id: Uuid,
        from: RunStatus,
        to: RunStatus,
        last_error: Option<String>,
    ) -> Result<RunRow, DbError> {
        if to == RunStatus::Failed {
            return Err(DbError::Unavailable("disk full".into()));
        }
        self.inner.transition_run(id, from, to, last_error).await
    }
    async fn update_run_progress(&self, id: Uuid, current: Option<Uuid>, context: Value) -> Result<(), DbError> {
        self.inner.update_run_progress(id, current, context).await
    }
    async fn record_step_execution(&self, _execution: StepExecutionRow) -> Result<(), DbError> {
        Err(DbError::Unavailable("disk full".into()))
    }
    async fn list_step_executions(&self, run_id: Uuid) -> Result<Vec<StepExecutionRow>, DbError> {
        self.inner.list_step_executions(run_id).await
    }
}

// ---------------------------------------------------------------------------
// Happy paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn linear_chain_runs_every_step_in_order() {
    let store = Arc::new(MemoryStore::new());
    let wf = published(&store, &linear(&[("a", "send_email"), ("b", "add_tag")])).await;
    let email = Arc::new(MockExecutor::succeeding("email", json!({ "emailed": true })));
    let tag = Arc::new(MockExecutor::succeeding("tag", json!({ "tagged": true })));
    let engine = engine(
        &store,
        default_registry().with("send_email", email.clone()).with("add_tag", tag.clone()),
        ExecutorConfig::default(),
    );

    let run = engine.start(&wf, json!({ "entityId": "c-1" })).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert!(run.ended_at.is_some());
    assert_eq!(run.context, json!({ "entityId": "c-1", "emailed": true, "tagged": true }));
    assert_eq!(email.call_count(), 1);
    assert_eq!(tag.call_count(), 1);

    // Context starts as the trigger snapshot; the second step saw the first step's patch.
    assert_eq!(email.calls.lock().unwrap()[0], json!({ "entityId": "c-1" }));
    assert_eq!(tag.calls.lock().unwrap()[0], json!({ "entityId": "c-1", "emailed": true }));

    let steps = store.list_steps(wf.id, wf.version).await.unwrap();
    assert_eq!(run.current_step_id, Some(steps[1].id));

    let executions = store.list_step_executions(run.id).await.unwrap();
    let order: Vec<Uuid> = executions.iter().map(|e| e.step_id).collect();
    assert_eq!(order, vec![steps[0].id, steps[1].id]);
    assert!(executions.iter().all(|e| e.outcome == ExecutionOutcome::Success && e.attempt == 1));
}

#[tokio::test]
async fn trigger_only_workflow_succeeds_without_steps() {
    let store = Arc::new(MemoryStore::new());
    let wf = published(&store, &linear(&[])).await;
    let engine = engine(&store, default_registry(), ExecutorConfig::default());

    let run = engine.start(&wf, json!({})).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert!(store.list_step_executions(run.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn condition_follows_exactly_one_branch() {
    let store = Arc::new(MemoryStore::new());
    let wf = published(&store, &branching()).await;
    let high = Arc::new(MockExecutor::succeeding("high", json!({})));
    let low = Arc::new(MockExecutor::succeeding("low", json!({})));
    let engine = engine(
        &store,
        default_registry().with("high_value", high.clone()).with("low_value", low.clone()),
        ExecutorConfig::default(),
    );

    let big = engine.start(&wf, json!({ "amount": 50 })).await.unwrap();
    assert_eq!(big.status, RunStatus::Succeeded);
    assert_eq!((high.call_count(), low.call_count()), (1, 0));

    let small = engine.start(&wf, json!({ "amount": 5 })).await.unwrap();
    assert_eq!(small.status, RunStatus::Succeeded);
    assert_eq!((high.call_count(), low.call_count()), (1, 1));

    let outcomes: Vec<ExecutionOutcome> = store
        .list_step_executions(small.id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.outcome)
        .collect();
    assert_eq!(outcomes, vec![ExecutionOutcome::BranchFalse, ExecutionOutcome::Success]);
}

#[tokio::test]
async fn missing_branch_ends_the_run_successfully() {
    let graph = WorkflowGraph::new(
        vec![
            GraphNode::trigger("t", "deal_updated", json!({})),
            GraphNode::condition("c", json!({ "field": "amount", "operator": "gt", "value": 10 })),
            GraphNode::action("high", "high_value", json!({})),
        ],
        vec![
            GraphEdge::new("e1", "t", "c"),
            GraphEdge::new("e2", "c", "high").on(BranchLabel::True),
        ],
    );
    let store = Arc::new(MemoryStore::new());
    let wf = published(&store, &graph).await;
    let high = Arc::new(MockExecutor::succeeding("high", json!({})));
    let engine = engine(&store, default_registry().with("high_value", high.clone()), ExecutorConfig::default());

    let run = engine.start(&wf, json!({ "amount": 1 })).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(high.call_count(), 0);
}

// ---------------------------------------------------------------------------
// Failures and retries
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_fails_run_without_advancing() {
    let store = Arc::new(MemoryStore::new());
    let wf = published(&store, &linear(&[("a", "webhook"), ("b", "add_tag")])).await;
    let webhook = Arc::new(MockExecutor::failing_retryable("webhook", "503 from upstream"));
    let tag = Arc::new(MockExecutor::succeeding("tag", json!({})));
    let engine = engine(
        &store,
        default_registry().with("webhook", webhook.clone()).with("add_tag", tag.clone()),
        fast_config(3),
    );

    let run = engine.start(&wf, json!({})).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.last_error.as_deref().unwrap().contains("503 from upstream"));
    assert_eq!(webhook.call_count(), 4);
    assert_eq!(tag.call_count(), 0);

    let steps = store.list_steps(wf.id, wf.version).await.unwrap();
    assert_eq!(run.current_step_id, Some(steps[0].id));

    let executions = store.list_step_executions(run.id).await.unwrap();
    let attempts: Vec<i32> = executions.iter().map(|e| e.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3, 4]);
    assert!(executions.iter().all(|e| e.outcome == ExecutionOutcome::Failure));
    assert!(executions.iter().all(|e| e.error_detail.is_some()));
}

#[tokio::test(start_paused = true)]
async fn flaky_step_recovers_within_retry_budget() {
    let store = Arc::new(MemoryStore::new());
    let wf = published(&store, &linear(&[("a", "webhook")])).await;
    let webhook = Arc::new(MockExecutor::flaky("webhook", 2));
    let engine = engine(&store, default_registry().with("webhook", webhook.clone()), fast_config(3));

    let run = engine.start(&wf, json!({})).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(webhook.call_count(), 3);
    let outcomes: Vec<ExecutionOutcome> = store
        .list_step_executions(run.id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.outcome)
        .collect();
    assert_eq!(
        outcomes,
        vec![ExecutionOutcome::Failure, ExecutionOutcome::Failure, ExecutionOutcome::Success]
    );
}

#[tokio::test(start_paused = true)]
async fn timed_out_step_is_retried_then_fails() {
    let store = Arc::new(MemoryStore::new());
    let wf = published(&store, &linear(&[("a", "slow")])).await;
    let slow = Arc::new(MockExecutor::hanging("slow", Duration::from_secs(60)));
    let engine = engine(&store, default_registry().with("slow", slow.clone()), fast_config(1));

    let run = engine.start(&wf, json!({})).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.last_error.as_deref().unwrap().contains("timed out"));
    assert_eq!(slow.call_count(), 2);
}

#[tokio::test]
async fn fatal_error_is_not_retried() {
    let store = Arc::new(MemoryStore::new());
    let wf = published(&store, &linear(&[("a", "send_email")])).await;
    let email = Arc::new(MockExecutor::failing_fatal("email", "invalid recipient"));
    let engine = engine(&store, default_registry().with("send_email", email.clone()), fast_config(5));

    let run = engine.start(&wf, json!({})).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.last_error.as_deref(), Some("invalid recipient"));
    assert_eq!(email.call_count(), 1);
}

#[tokio::test]
async fn unregistered_step_type_fails_run() {
    let store = Arc::new(MemoryStore::new());
    let wf = published(&store, &linear(&[("a", "unknown_action")])).await;
    let engine = engine(&store, default_registry(), ExecutorConfig::default());

    let run = engine.start(&wf, json!({})).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.last_error.as_deref().unwrap().contains("unknown_action"));
    assert!(store.list_step_executions(run.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn action_reporting_a_branch_fails_run() {
    let store = Arc::new(MemoryStore::new());
    let wf = published(&store, &linear(&[("a", "confused"), ("b", "add_tag")])).await;
    let confused = Arc::new(MockExecutor::branching("confused", true));
    let tag = Arc::new(MockExecutor::succeeding("tag", json!({})));
    let engine = engine(
        &store,
        default_registry().with("confused", confused.clone()).with("add_tag", tag.clone()),
        fast_config(3),
    );

    let run = engine.start(&wf, json!({})).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(confused.call_count(), 1);
    assert_eq!(tag.call_count(), 0);
}

// ---------------------------------------------------------------------------
// Abort
// ---------------------------------------------------------------------------

#[tokio::test]
async fn aborted_pending_run_never_executes() {
    let store = Arc::new(MemoryStore::new());
    let wf = published(&store, &linear(&[("a", "send_email")])).await;
    let email = Arc::new(MockExecutor::succeeding("email", json!({})));
    let engine = engine(&store, default_registry().with("send_email", email.clone()), ExecutorConfig::default());

    let run = engine.create_run(&wf, json!({}), None).await.unwrap();
    engine.abort(run.id).await.unwrap();
    let run = engine.execute(run.id).await.unwrap();

    assert_eq!(run.status, RunStatus::Aborted);
    assert_eq!(email.call_count(), 0);
}

#[tokio::test]
async fn abort_during_step_prevents_next_step() {
    let store = Arc::new(MemoryStore::new());
    let wf = published(&store, &linear(&[("a", "aborting"), ("b", "add_tag")])).await;
    let aborting = Arc::new(AbortingExecutor { store: store.clone(), retryable: false });
    let tag = Arc::new(MockExecutor::succeeding("tag", json!({})));
    let engine = engine(
        &store,
        default_registry().with("aborting", aborting).with("add_tag", tag.clone()),
        ExecutorConfig::default(),
    );

    let run = engine.start(&wf, json!({})).await.unwrap();

    assert_eq!(run.status, RunStatus::Aborted);
    assert_eq!(tag.call_count(), 0);
    // Abort wins; the finished step is still recorded.
    assert_eq!(store.list_step_executions(run.id).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn abort_stops_pending_retries() {
    let store = Arc::new(MemoryStore::new());
    let wf = published(&store, &linear(&[("a", "aborting")])).await;
    let aborting = Arc::new(AbortingExecutor { store: store.clone(), retryable: true });
    let engine = engine(&store, default_registry().with("aborting", aborting), fast_config(5));

    let run = engine.start(&wf, json!({})).await.unwrap();

    assert_eq!(run.status, RunStatus::Aborted);
    assert_eq!(store.list_step_executions(run.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn abort_of_finished_run_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let wf = published(&store, &linear(&[])).await;
    let engine = engine(&store, default_registry(), ExecutorConfig::default());

    let run = engine.start(&wf, json!({})).await.unwrap();
    let err = engine.abort(run.id).await.unwrap_err();

    assert!(matches!(
        err,
        EngineError::RunFinished { status: RunStatus::Succeeded, .. }
    ));
}

// ---------------------------------------------------------------------------
// Versioning and lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pending_run_executes_the_version_it_pinned() {
    let store = Arc::new(MemoryStore::new());
    let wf = published(&store, &linear(&[("a", "v1_action")])).await;
    let v1 = Arc::new(MockExecutor::succeeding("v1", json!({})));
    let v2 = Arc::new(MockExecutor::succeeding("v2", json!({})));
    let engine = engine(
        &store,
        default_registry().with("v1_action", v1.clone()).with("v2_action", v2.clone()),
        ExecutorConfig::default(),
    );

    let run = engine.create_run(&wf, json!({}), None).await.unwrap();
    assert_eq!(run.workflow_version, 1);

    store
        .update_graph(wf.id, linear(&[("b", "v2_action")]).to_value().unwrap())
        .await
        .unwrap();
    Publisher::new(store.clone()).publish(wf.id).await.unwrap();

    let run = engine.execute(run.id).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!((v1.call_count(), v2.call_count()), (1, 0));
}

#[tokio::test]
async fn inactive_workflow_cannot_start_runs() {
    let store = Arc::new(MemoryStore::new());
    let wf = published(&store, &linear(&[])).await;
    let wf = store.deactivate_workflow(wf.id).await.unwrap();
    let engine = engine(&store, default_registry(), ExecutorConfig::default());

    let err = engine.create_run(&wf, json!({}), None).await.unwrap_err();
    assert!(matches!(err, EngineError::WorkflowInactive(id) if id == wf.id));
}

#[tokio::test]
async fn executing_a_finished_run_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let wf = published(&store, &linear(&[])).await;
    let engine = engine(&store, default_registry(), ExecutorConfig::default());

    let run = engine.start(&wf, json!({})).await.unwrap();
    assert!(matches!(
        engine.execute(run.id).await.unwrap_err(),
        EngineError::RunFinished { .. }
    ));
    assert!(matches!(
        engine.execute(Uuid::new_v4()).await.unwrap_err(),
        EngineError::RunNotFound(_)
    ));
}

#[tokio::test]
async fn run_from_stale_workflow_row_pins_the_current_version() {
    let store = Arc::new(MemoryStore::new());
    let stale = published(&store, &linear(&[("a", "v1_action")])).await;
    let v1 = Arc::new(MockExecutor::succeeding("v1", json!({})));
    let v2 = Arc::new(MockExecutor::succeeding("v2", json!({})));
    let engine = engine(
        &store,
        default_registry().with("v1_action", v1.clone()).with("v2_action", v2.clone()),
        ExecutorConfig::default(),
    );

    // Republished between matching the event and creating its run.
    store
        .update_graph(stale.id, linear(&[("b", "v2_action")]).to_value().unwrap())
        .await
        .unwrap();
    Publisher::new(store.clone()).publish(stale.id).await.unwrap();
    assert!(store.list_steps(stale.id, 1).await.unwrap().is_empty());

    let run = engine.start(&stale, json!({})).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.workflow_version, 2);
    assert_eq!((v1.call_count(), v2.call_count()), (0, 1));
    assert_eq!(store.list_step_executions(run.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn run_whose_pinned_steps_vanished_fails() {
    let store = Arc::new(MemoryStore::new());
    let wf = published(&store, &linear(&[("a", "send_email")])).await;
    let email = Arc::new(MockExecutor::succeeding("email", json!({})));
    let engine = engine(&store, default_registry().with("send_email", email.clone()), ExecutorConfig::default());

    let run = engine.create_run(&wf, json!({}), None).await.unwrap();
    assert_eq!(run.step_count, 1);
    assert_eq!(store.drop_steps(wf.id, 1).unwrap(), 1);

    let run = engine.execute(run.id).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.last_error.as_deref().unwrap().contains("expected 1"));
    assert_eq!(email.call_count(), 0);
}

#[tokio::test]
async fn persistence_failure_mid_run_surfaces_as_error() {
    let inner = Arc::new(MemoryStore::new());
    let wf = published(&inner, &linear(&[("a", "send_email")])).await;
    let store = Arc::new(BrokenWrites { inner: inner.clone() });
    let email = Arc::new(MockExecutor::succeeding("email", json!({})));
    let engine = RunEngine::new(
        store,
        default_registry().with("send_email", email.clone()),
        ExecutorConfig::default(),
    );

    let run = engine.create_run(&wf, json!({}), None).await.unwrap();
    let err = engine.execute(run.id).await.unwrap_err();

    assert!(matches!(err, EngineError::Database(DbError::Unavailable(_))));
    // Marking the run failed was refused too; it is left running.
    assert_eq!(inner.get_run(run.id).await.unwrap().status, RunStatus::Running);
}
