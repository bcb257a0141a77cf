//! [`Store`] implementation on top of the Postgres repository functions.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    NewRun, NewWorkflow, PublishChain, RunRow, RunStatus, StepExecutionRow, StepRow, WorkflowRow,
};
use crate::repository::{runs, steps, workflows};
use crate::{DbError, DbPool, Store};

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn current_status(&self, id: Uuid) -> Result<RunStatus, DbError> {
        Ok(runs::get_run(&self.pool, id).await?.status)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_workflow(&self, new: NewWorkflow) -> Result<WorkflowRow, DbError> {
        workflows::create_workflow(&self.pool, &new).await
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        workflows::get_workflow(&self.pool, id).await
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, DbError> {
        workflows::list_workflows(&self.pool).await
    }

    async fn update_graph(&self, id: Uuid, raw_graph: Value) -> Result<WorkflowRow, DbError> {
        workflows::update_graph(&self.pool, id, &raw_graph).await
    }

    async fn deactivate_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        workflows::deactivate_workflow(&self.pool, id).await
    }

    async fn list_active_workflows(
        &self,
        organization_id: Uuid,
        trigger_type: &str,
    ) -> Result<Vec<WorkflowRow>, DbError> {
        workflows::list_active_workflows(&self.pool, organization_id, trigger_type).await
    }

    async fn publish_chain(&self, chain: PublishChain) -> Result<WorkflowRow, DbError> {
        // Dropping `tx` on any early return rolls the whole unit back.
        let mut tx = self.pool.begin().await?;

        let current = workflows::lock_workflow(&mut *tx, chain.workflow_id).await?;
        let version = current.version + 1;

        let removed = steps::delete_superseded_steps(&mut *tx, chain.workflow_id).await?;
        for step in chain.steps {
            steps::insert_step(&mut *tx, &step.into_row(chain.workflow_id, version)).await?;
        }

        let updated = workflows::mark_published(
            &mut *tx,
            chain.workflow_id,
            version,
            &chain.trigger_type,
            &chain.trigger_config,
        )
        .await?;

        tx.commit().await?;
        debug!(workflow_id = %chain.workflow_id, version, removed, "step chain swapped");
        Ok(updated)
    }

    async fn list_steps(&self, workflow_id: Uuid, version: i32) -> Result<Vec<StepRow>, DbError> {
        steps::list_steps(&self.pool, workflow_id, version).await
    }

    async fn create_run(&self, new: NewRun) -> Result<RunRow, DbError> {
        // The share lock keeps a concurrent publish from pruning the version
        // between reading it and inserting the run that pins it.
        let mut tx = self.pool.begin().await?;

        let workflow = workflows::share_workflow(&mut *tx, new.workflow_id).await?;
        if !workflow.is_active {
            return Err(DbError::Inactive(workflow.id));
        }
        let step_count = steps::count_steps(&mut *tx, workflow.id, workflow.version).await?;
        let step_count = i32::try_from(step_count)
            .map_err(|_| DbError::Unavailable(format!("step count {step_count} out of range")))?;
        let run = runs::create_run(&mut *tx, &new, workflow.version, step_count).await?;

        tx.commit().await?;
        Ok(run)
    }

    async fn get_run(&self, id: Uuid) -> Result<RunRow, DbError> {
        runs::get_run(&self.pool, id).await
    }

    async fn list_runs(&self, workflow_id: Uuid) -> Result<Vec<RunRow>, DbError> {
        runs::list_runs(&self.pool, workflow_id).await
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
        match runs::transition_run(&self.pool, id, from, to, last_error.as_deref()).await? {
            Some(row) => Ok(row),
            None => Err(DbError::Conflict {
                expected: from,
                actual: self.current_status(id).await?,
            }),
        }
    }

    async fn update_run_progress(
        &self,
        id: Uuid,
        current_step_id: Option<Uuid>,
        context: Value,
    ) -> Result<(), DbError> {
        if runs::update_run_progress(&self.pool, id, current_step_id, &context).await? {
            Ok(())
        } else {
            Err(DbError::Conflict {
                expected: RunStatus::Running,
                actual: self.current_status(id).await?,
            })
        }
    }

    async fn record_step_execution(&self, execution: StepExecutionRow) -> Result<(), DbError> {
        runs::insert_step_execution(&self.pool, &execution).await
    }

    async fn list_step_executions(&self, run_id: Uuid) -> Result<Vec<StepExecutionRow>, DbError> {
        runs::list_step_executions(&self.pool, run_id).await
    }
}
