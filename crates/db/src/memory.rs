//! In-process [`Store`] implementation.
//!
//! Used by the test suites and by the binary when no `DATABASE_URL` is
//! configured. Publishes are applied to a copy of the state and swapped in
//! only when every mutation succeeded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{
    NewRun, NewWorkflow, PublishChain, RunRow, RunStatus, StepExecutionRow, StepRow, WorkflowRow,
};
use crate::{DbError, Store};

#[derive(Debug, Default, Clone)]
struct State {
    workflows: HashMap<Uuid, WorkflowRow>,
    steps: Vec<StepRow>,
    runs: HashMap<Uuid, RunRow>,
    executions: Vec<StepExecutionRow>,
}

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_next_publish: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next [`Store::publish_chain`] fail half-way through, after
    /// the superseded steps have been deleted from the working copy.
    pub fn fail_next_publish(&self) {
        self.fail_next_publish.store(true, Ordering::SeqCst);
    }

    /// Delete the stored steps of one version, bypassing publish. Lets tests
    /// simulate a chain lost out of band.
    pub fn drop_steps(&self, workflow_id: Uuid, version: i32) -> Result<usize, DbError> {
        let mut state = self.lock()?;
        let before = state.steps.len();
        state
            .steps
            .retain(|s| s.workflow_id != workflow_id || s.version != version);
        Ok(before - state.steps.len())
    }

    /// Every stored step of a workflow across all versions.
    pub fn all_steps(&self, workflow_id: Uuid) -> Result<Vec<StepRow>, DbError> {
        Ok(self
            .lock()?
            .steps
            .iter()
            .filter(|s| s.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, DbError> {
        self.state
            .lock()
            .map_err(|_| DbError::Unavailable("memory store lock poisoned".into()))
    }
}

fn sorted_newest_first<T>(mut rows: Vec<T>, key: impl Fn(&T) -> chrono::DateTime<Utc>) -> Vec<T> {
    rows.sort_by_key(|r| std::cmp::Reverse(key(r)));
    rows
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_workflow(&self, new: NewWorkflow) -> Result<WorkflowRow, DbError> {
        let now = Utc::now();
        let row = WorkflowRow {
            id: Uuid::new_v4(),
            organization_id: new.organization_id,
            name: new.name,
            trigger_type: None,
            trigger_config: Value::Null,
            is_active: false,
            version: 0,
            raw_graph: new.raw_graph,
            created_at: now,
            updated_at: now,
            published_at: None,
        };
        self.lock()?.workflows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        self.lock()?.workflows.get(&id).cloned().ok_or(DbError::NotFound)
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, DbError> {
        let rows = self.lock()?.workflows.values().cloned().collect();
        Ok(sorted_newest_first(rows, |w: &WorkflowRow| w.created_at))
    }

    async fn update_graph(&self, id: Uuid, raw_graph: Value) -> Result<WorkflowRow, DbError> {
        let mut state = self.lock()?;
        let row = state.workflows.get_mut(&id).ok_or(DbError::NotFound)?;
        row.raw_graph = raw_graph;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn deactivate_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        let mut state = self.lock()?;
        let row = state.workflows.get_mut(&id).ok_or(DbError::NotFound)?;
        row.is_active = false;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn list_active_workflows(
        &self,
        organization_id: Uuid,
        trigger_type: &str,
    ) -> Result<Vec<WorkflowRow>, DbError> {
        Ok(self
            .lock()?
            .workflows
            .values()
            .filter(|w| {
                w.is_active
                    && w.organization_id == organization_id
                    && w.trigger_type.as_deref() == Some(trigger_type)
            })
            .cloned()
            .collect())
    }

    async fn publish_chain(&self, chain: PublishChain) -> Result<WorkflowRow, DbError> {
        let mut state = self.lock()?;
        let mut working = state.clone();

        let version = working
            .workflows
            .get(&chain.workflow_id)
            .ok_or(DbError::NotFound)?
            .version
            + 1;

        let pinned: Vec<i32> = working
            .runs
            .values()
            .filter(|r| r.workflow_id == chain.workflow_id && !r.status.is_terminal())
            .map(|r| r.workflow_version)
            .collect();
        working
            .steps
            .retain(|s| s.workflow_id != chain.workflow_id || pinned.contains(&s.version));

        if self.fail_next_publish.swap(false, Ordering::SeqCst) {
            return Err(DbError::Unavailable("injected publish failure".into()));
        }

        working.steps.extend(
            chain
                .steps
                .into_iter()
                .map(|s| s.into_row(chain.workflow_id, version)),
        );

        let now = Utc::now();
        let row = working
            .workflows
            .get_mut(&chain.workflow_id)
            .ok_or(DbError::NotFound)?;
        row.is_active = true;
        row.version = version;
        row.trigger_type = Some(chain.trigger_type);
        row.trigger_config = chain.trigger_config;
        row.updated_at = now;
        row.published_at = Some(now);
        let updated = row.clone();

        *state = working;
        Ok(updated)
    }

    async fn list_steps(&self, workflow_id: Uuid, version: i32) -> Result<Vec<StepRow>, DbError> {
        let mut steps: Vec<StepRow> = self
            .lock()?
            .steps
            .iter()
            .filter(|s| s.workflow_id == workflow_id && s.version == version)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.position);
        Ok(steps)
    }

    async fn create_run(&self, new: NewRun) -> Result<RunRow, DbError> {
        let mut state = self.lock()?;
        let workflow = state.workflows.get(&new.workflow_id).ok_or(DbError::NotFound)?;
        if !workflow.is_active {
            return Err(DbError::Inactive(workflow.id));
        }
        let version = workflow.version;
        let step_count = state
            .steps
            .iter()
            .filter(|s| s.workflow_id == new.workflow_id && s.version == version)
            .count();

        let row = RunRow {
            id: Uuid::new_v4(),
            workflow_id: new.workflow_id,
            workflow_version: version,
            step_count: step_count as i32,
            entity_id: new.entity_id,
            context: new.trigger_context.clone(),
            trigger_context: new.trigger_context,
            current_step_id: None,
            status: RunStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            last_error: None,
        };
        state.runs.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_run(&self, id: Uuid) -> Result<RunRow, DbError> {
        self.lock()?.runs.get(&id).cloned().ok_or(DbError::NotFound)
    }

    async fn list_runs(&self, workflow_id: Uuid) -> Result<Vec<RunRow>, DbError> {
        let rows = self
            .lock()?
            .runs
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect();
        Ok(sorted_newest_first(rows, |r: &RunRow| r.started_at))
    }

    async fn transition_run(
        &self,
        id: Uuid,
        from: RunStatus,
        to: RunStatus,
        last_error: Option<String>,
    ) -> Result<RunRow, DbError> {
        if !from.can_transition_to(to) {
            return Err(DbError::InvalidTransition { from, to });
        }
        let mut state = self.lock()?;
        let run = state.runs.get_mut(&id).ok_or(DbError::NotFound)?;
        if run.status != from {
            return Err(DbError::Conflict {
                expected: from,
                actual: run.status,
            });
        }
        run.status = to;
        if to.is_terminal() {
            run.ended_at = Some(Utc::now());
        }
        if last_error.is_some() {
            run.last_error = last_error;
        }
        Ok(run.clone())
    }

    async fn update_run_progress(
        &self,
        id: Uuid,
        current_step_id: Option<Uuid>,
        context: Value,
    ) -> Result<(), DbError> {
        let mut state = self.lock()?;
        let run = state.runs.get_mut(&id).ok_or(DbError::NotFound)?;
        if run.status != RunStatus::Running {
            return Err(DbError::Conflict {
                expected: RunStatus::Running,
                actual: run.status,
            });
        }
        run.current_step_id = current_step_id;
        run.context = context;
        Ok(())
    }

    async fn record_step_execution(&self, execution: StepExecutionRow) -> Result<(), DbError> {
        self.lock()?.executions.push(execution);
        Ok(())
    }

    async fn list_step_executions(&self, run_id: Uuid) -> Result<Vec<StepExecutionRow>, DbError> {
        Ok(self
            .lock()?
            .executions
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect())
    }
}
