//! Event dispatch: match, create runs, execute in the background.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use db::models::RunRow;
use engine::trigger::entity_id;
use engine::{EngineError, Event, RunEngine, TriggerMatcher};

use crate::lane::{Lanes, RunResult};
use crate::QueueError;

/// A run that was created for an event and handed to a lane.
#[derive(Debug)]
pub struct DispatchedRun {
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub entity_id: Option<String>,
    result: oneshot::Receiver<RunResult>,
}

impl DispatchedRun {
    /// Wait for the run to reach a terminal state.
    pub async fn wait(self) -> Result<RunRow, QueueError> {
        match self.result.await {
            Ok(outcome) => Ok(outcome?),
            Err(_) => Err(QueueError::Dropped(self.run_id)),
        }
    }
}

pub struct Dispatcher {
    matcher: TriggerMatcher,
    engine: Arc<RunEngine>,
    lanes: Arc<Lanes>,
}

impl Dispatcher {
    pub fn new(engine: Arc<RunEngine>) -> Self {
        Self {
            matcher: TriggerMatcher::new(engine.store().clone()),
            lanes: Lanes::new(engine.clone()),
            engine,
        }
    }

    pub fn engine(&self) -> &Arc<RunEngine> {
        &self.engine
    }

    pub fn lanes(&self) -> &Arc<Lanes> {
        &self.lanes
    }

    /// Start one run per active workflow whose trigger matches `event`.
    ///
    /// Returns once every run exists in the store as `pending`; execution
    /// continues in the background.
    #[instrument(skip(self, event), fields(org = %event.organization_id, event_type = %event.event_type))]
    pub async fn dispatch(&self, event: &Event) -> Result<Vec<DispatchedRun>, EngineError> {
        let workflows = self.matcher.matches(event).await?;
        let mut dispatched = Vec::with_capacity(workflows.len());

        for workflow in workflows {
            let entity = entity_id(&workflow.trigger_config, &event.payload);
            let run = match self
                .engine
                .create_run(&workflow, event.payload.clone(), entity.clone())
                .await
            {
                Ok(run) => run,
                // Unpublished since it matched.
                Err(EngineError::WorkflowInactive(id)) => {
                    debug!(workflow_id = %id, "skipping workflow deactivated during dispatch");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let key = entity.clone().map(|e| (workflow.id, e));
            let result = self.lanes.submit(key, run.id);
            dispatched.push(DispatchedRun {
                run_id: run.id,
                workflow_id: workflow.id,
                entity_id: entity,
                result,
            });
        }

        info!(runs = dispatched.len(), "event dispatched");
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use db::models::{NewWorkflow, WorkflowRow};
    use db::{MemoryStore, RunStatus, Store};
    use engine::{default_registry, ExecutorConfig, GraphEdge, GraphNode, Publisher, WorkflowGraph};
    use executors::{ExecutorError, RunContext, StepExecutor, StepResult};

    use super::*;

    /// Sleeps while tracking how many invocations overlap.
    #[derive(Default)]
    struct Recorder {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        seen: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl StepExecutor for Recorder {
        async fn execute(&self, _config: &Value, ctx: &RunContext) -> Result<StepResult, ExecutorError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.seen.lock().unwrap().push(ctx.trigger["seq"].clone());
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(StepResult::success())
        }
    }

    async fn workflow(store: &Arc<MemoryStore>, org: Uuid, trigger_config: Value) -> WorkflowRow {
        let graph = WorkflowGraph::new(
            vec![
                GraphNode::trigger("t", "form_submitted", trigger_config),
                GraphNode::action("p", "record", json!({})),
            ],
            vec![GraphEdge::new("e1", "t", "p")],
        );
        let wf = store
            .create_workflow(NewWorkflow {
                organization_id: org,
                name: "record".into(),
                raw_graph: graph.to_value().unwrap(),
            })
            .await
            .unwrap();
        Publisher::new(store.clone()).publish(wf.id).await.unwrap();
        store.get_workflow(wf.id).await.unwrap()
    }

    fn dispatcher(store: &Arc<MemoryStore>, recorder: &Arc<Recorder>) -> Dispatcher {
        let mut registry = default_registry();
        registry.insert("record".into(), recorder.clone() as Arc<dyn StepExecutor>);
        let engine = RunEngine::new(store.clone(), registry, ExecutorConfig::default());
        Dispatcher::new(Arc::new(engine))
    }

    fn event(org: Uuid, payload: Value) -> Event {
        Event {
            organization_id: org,
            event_type: "form_submitted".into(),
            payload,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_run_per_matching_workflow() {
        let store = Arc::new(MemoryStore::new());
        let recorder = Arc::new(Recorder::default());
        let org = Uuid::new_v4();
        let a = workflow(&store, org, json!({})).await;
        let b = workflow(&store, org, json!({ "form": "signup" })).await;
        workflow(&store, org, json!({ "form": "survey" })).await;
        let dispatcher = dispatcher(&store, &recorder);

        let runs = dispatcher
            .dispatch(&event(org, json!({ "form": "signup", "entityId": "c-1" })))
            .await
            .unwrap();

        let mut ids: Vec<Uuid> = runs.iter().map(|r| r.workflow_id).collect();
        ids.sort();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(ids, expected);

        for run in runs {
            let pending = store.get_run(run.run_id).await.unwrap();
            assert_eq!(pending.entity_id.as_deref(), Some("c-1"));
            assert_eq!(run.wait().await.unwrap().status, RunStatus::Succeeded);
        }
    }

    #[tokio::test]
    async fn unmatched_event_starts_nothing() {
        let store = Arc::new(MemoryStore::new());
        let recorder = Arc::new(Recorder::default());
        let org = Uuid::new_v4();
        workflow(&store, org, json!({ "form": "signup" })).await;
        let dispatcher = dispatcher(&store, &recorder);

        let runs = dispatcher.dispatch(&event(org, json!({ "form": "other" }))).await.unwrap();
        assert!(runs.is_empty());
        let runs = dispatcher.dispatch(&event(Uuid::new_v4(), json!({ "form": "signup" }))).await.unwrap();
        assert!(runs.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn same_entity_runs_one_at_a_time_in_order() {
        let store = Arc::new(MemoryStore::new());
        let recorder = Arc::new(Recorder::default());
        let org = Uuid::new_v4();
        workflow(&store, org, json!({ "$entityKey": "contact.id" })).await;
        let dispatcher = dispatcher(&store, &recorder);

        let mut runs = Vec::new();
        for seq in 0..4 {
            let payload = json!({ "seq": seq, "contact": { "id": "c-42" } });
            runs.extend(dispatcher.dispatch(&event(org, payload)).await.unwrap());
        }
        assert_eq!(dispatcher.lanes().active(), 1);
        for run in runs {
            assert_eq!(run.entity_id.as_deref(), Some("c-42"));
            assert_eq!(run.wait().await.unwrap().status, RunStatus::Succeeded);
        }

        assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(*recorder.seen.lock().unwrap(), vec![json!(0), json!(1), json!(2), json!(3)]);
        tokio::task::yield_now().await;
        assert_eq!(dispatcher.lanes().active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn different_entities_run_concurrently() {
        let store = Arc::new(MemoryStore::new());
        let recorder = Arc::new(Recorder::default());
        let org = Uuid::new_v4();
        workflow(&store, org, json!({})).await;
        let dispatcher = dispatcher(&store, &recorder);

        let mut runs = Vec::new();
        for (seq, entity) in ["c-1", "c-2"].iter().enumerate() {
            let payload = json!({ "seq": seq, "entityId": entity });
            runs.extend(dispatcher.dispatch(&event(org, payload)).await.unwrap());
        }
        // No entity at all: bypasses lanes.
        runs.extend(dispatcher.dispatch(&event(org, json!({ "seq": 9 }))).await.unwrap());

        for run in runs {
            assert_eq!(run.wait().await.unwrap().status, RunStatus::Succeeded);
        }
        assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 3);
    }
}
