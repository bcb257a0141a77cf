//! Publication: validate, compile and atomically swap a workflow's chain.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use db::models::{PublishChain, WorkflowRow};
use db::{DbError, Store};

use crate::compile::compile;
use crate::models::{NodeKind, WorkflowGraph};
use crate::validate::validate;
use crate::{CompileError, PublishError};

/// Outcome of a successful publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishResult {
    pub workflow_id: Uuid,
    pub version: i32,
    pub step_count: usize,
    /// Edges the compiler left out because they would re-enter a step.
    pub dropped_edges: Vec<String>,
}

/// Serializes publishes per workflow and performs the swap through the store.
///
/// Publishes of different workflows never wait on each other.
pub struct Publisher {
    store: Arc<dyn Store>,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Publisher {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, workflow_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(workflow_id)
            .or_default()
            .clone()
    }

    /// Drop the per-workflow lock once nobody else holds or waits on it.
    async fn release(&self, workflow_id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        if locks.get(&workflow_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&workflow_id);
        }
    }

    /// Number of workflows with a publish lock currently allocated.
    pub async fn tracked_locks(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Compile the workflow's current raw graph and make it the active chain.
    ///
    /// # Errors
    /// Authoring errors abort before anything is written. A
    /// [`PublishError::Persist`] means the swap was rolled back and the
    /// workflow is still on its previous version.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn publish(&self, workflow_id: Uuid) -> Result<PublishResult, PublishError> {
        let lock = self.lock_for(workflow_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.publish_locked(workflow_id).await
        };
        self.release(workflow_id, lock).await;
        result
    }

    async fn publish_locked(&self, workflow_id: Uuid) -> Result<PublishResult, PublishError> {
        let workflow = self.store.get_workflow(workflow_id).await.map_err(|e| match e {
            DbError::NotFound => PublishError::NotFound(workflow_id),
            other => PublishError::Persist(other),
        })?;

        let graph = WorkflowGraph::from_value(&workflow.raw_graph).map_err(PublishError::MalformedGraph)?;
        let trigger = validate(&graph).inspect_err(|e| {
            warn!(reason = e.reason(), "workflow graph rejected: {e}");
        })?;
        let chain = compile(&graph, trigger)?;

        let NodeKind::Trigger { trigger_type, config } = &trigger.kind else {
            return Err(CompileError::NotATrigger(trigger.id.clone()).into());
        };

        let step_count = chain.steps.len();
        let updated = self
            .store
            .publish_chain(PublishChain {
                workflow_id,
                trigger_type: trigger_type.clone(),
                trigger_config: config.clone(),
                steps: chain.steps,
            })
            .await?;

        info!(
            version = updated.version,
            step_count,
            dropped_edges = chain.dropped_edges.len(),
            "workflow published"
        );

        Ok(PublishResult {
            workflow_id,
            version: updated.version,
            step_count,
            dropped_edges: chain.dropped_edges,
        })
    }

    /// Stop matching new events. Compiled steps and version are kept, and
    /// runs already in flight finish normally.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn unpublish(&self, workflow_id: Uuid) -> Result<WorkflowRow, PublishError> {
        let lock = self.lock_for(workflow_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.store.deactivate_workflow(workflow_id).await
        };
        self.release(workflow_id, lock).await;

        let row = result.map_err(|e| match e {
            DbError::NotFound => PublishError::NotFound(workflow_id),
            other => PublishError::Persist(other),
        })?;
        info!("workflow unpublished");
        Ok(row)
    }
}
