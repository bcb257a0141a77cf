//! The storage trait the engine, dispatcher and API are written against.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{
    NewRun, NewWorkflow, PublishChain, RunRow, RunStatus, StepExecutionRow, StepRow, WorkflowRow,
};
use crate::DbError;

/// Storage for workflows, compiled steps, runs and step executions.
///
/// Implementations must make [`Store::publish_chain`] all-or-nothing and
/// [`Store::transition_run`] a compare-and-set.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a draft (inactive, version 0) workflow.
    async fn create_workflow(&self, new: NewWorkflow) -> Result<WorkflowRow, DbError>;

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError>;

    /// All workflows, newest first.
    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, DbError>;

    /// Replace the authored graph. Compiled steps, version and activation are
    /// untouched until the next publish.
    async fn update_graph(&self, id: Uuid, raw_graph: Value) -> Result<WorkflowRow, DbError>;

    /// Mark a workflow inactive without touching its steps or version.
    async fn deactivate_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError>;

    /// Active workflows of an organization with the given trigger type.
    async fn list_active_workflows(
        &self,
        organization_id: Uuid,
        trigger_type: &str,
    ) -> Result<Vec<WorkflowRow>, DbError>;

    /// In one atomic unit: drop superseded steps that no unfinished run still
    /// pins, insert `chain.steps` under `version + 1`, set `is_active`, bump
    /// the version and refresh the trigger columns. Returns the updated row.
    async fn publish_chain(&self, chain: PublishChain) -> Result<WorkflowRow, DbError>;

    /// Steps of one compiled version, ordered by position.
    async fn list_steps(&self, workflow_id: Uuid, version: i32) -> Result<Vec<StepRow>, DbError>;

    /// Create a run in `pending` status, pinned to the workflow's current
    /// version and that version's step count.
    ///
    /// Reading the version and inserting the run are one atomic unit with
    /// respect to [`Store::publish_chain`], so the pinned steps are never
    /// pruned underneath a new run. Fails with [`DbError::Inactive`] for an
    /// unpublished workflow.
    async fn create_run(&self, new: NewRun) -> Result<RunRow, DbError>;

    async fn get_run(&self, id: Uuid) -> Result<RunRow, DbError>;

    /// Runs of a workflow, newest first.
    async fn list_runs(&self, workflow_id: Uuid) -> Result<Vec<RunRow>, DbError>;

    /// Move a run from `from` to `to` if and only if it is still in `from`.
    ///
    /// Fails with [`DbError::InvalidTransition`] for pairs outside the
    /// transition table and [`DbError::Conflict`] when the stored status is
    /// no longer `from`. Entering a terminal state stamps `ended_at`.
    async fn transition_run(
        &self,
        id: Uuid,
        from: RunStatus,
        to: RunStatus,
        last_error: Option<String>,
    ) -> Result<RunRow, DbError>;

    /// Persist the current step pointer and accumulated context of a
    /// running run. Fails with [`DbError::Conflict`] if the run is no longer
    /// running.
    async fn update_run_progress(
        &self,
        id: Uuid,
        current_step_id: Option<Uuid>,
        context: Value,
    ) -> Result<(), DbError>;

    /// Append one step attempt record.
    async fn record_step_execution(&self, execution: StepExecutionRow) -> Result<(), DbError>;

    /// Attempts of a run in the order they were recorded.
    async fn list_step_executions(&self, run_id: Uuid) -> Result<Vec<StepExecutionRow>, DbError>;
}
