//! Run execution engine.
//!
//! `RunEngine` interprets one run at a time against the step chain of the
//! workflow version the run pinned:
//! 1. Moves the run `pending -> running` and points it at the entry step.
//! 2. Before every step (and every retry) checks whether the run was aborted.
//! 3. Dispatches the step to the `StepExecutor` registered for its type,
//!    bounded by `step_timeout`, recording one step execution per attempt.
//! 4. Follows `next` for actions and `true`/`false` for conditions; a null
//!    pointer ends the run as `succeeded`.
//! 5. Retries `ExecutorError::Retryable` failures (and timeouts) with
//!    exponential back-off up to `max_retries`; exhaustion or a `Fatal`
//!    error ends the run as `failed` without advancing it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use db::models::{NewRun, RunRow, StepExecutionRow, StepRow, WorkflowRow};
use db::{DbError, ExecutionOutcome, RunStatus, Store};
use executors::{
    ConditionExecutor, ExecutorError, RunContext, StepExecutor, StepOutcome, StepResult,
    CONDITION_STEP_TYPE,
};

use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the engine.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of times a retryable step failure will be retried.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries.
    pub retry_base_delay: Duration,
    /// Upper bound for a single executor invocation.
    pub step_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            step_timeout: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// Executor registry
// ---------------------------------------------------------------------------

/// Maps `step_type` strings to executor implementations.
pub type ExecutorRegistry = HashMap<String, Arc<dyn StepExecutor>>;

/// A registry containing only the built-in condition executor.
pub fn default_registry() -> ExecutorRegistry {
    let mut registry: ExecutorRegistry = HashMap::new();
    registry.insert(CONDITION_STEP_TYPE.to_owned(), Arc::new(ConditionExecutor));
    registry
}

// ---------------------------------------------------------------------------
// Per-step verdicts
// ---------------------------------------------------------------------------

enum Verdict {
    /// Move on to `next` (or finish when `None`), merging `patch`.
    Advance { next: Option<Uuid>, patch: Value },
    /// End the run as failed with this message.
    Fail(String),
    /// The run was aborted externally between attempts.
    Aborted(RunRow),
}

// ---------------------------------------------------------------------------
// RunEngine
// ---------------------------------------------------------------------------

/// Interpreter for workflow runs.
///
/// Holds no per-run state: the current step pointer and accumulated context
/// live on the run record, so any number of runs may execute concurrently.
pub struct RunEngine {
    store: Arc<dyn Store>,
    registry: ExecutorRegistry,
    config: ExecutorConfig,
}

impl RunEngine {
    /// Create a new engine.
    pub fn new(store: Arc<dyn Store>, registry: ExecutorRegistry, config: ExecutorConfig) -> Self {
        Self { store, registry, config }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Create a `pending` run pinned to the workflow's current version.
    ///
    /// The store reads the version when it inserts the run, so a publish
    /// that lands after `workflow` was loaded is picked up rather than
    /// pinning a version whose steps are already gone.
    pub async fn create_run(
        &self,
        workflow: &WorkflowRow,
        trigger_context: Value,
        entity_id: Option<String>,
    ) -> Result<RunRow, EngineError> {
        let run = self
            .store
            .create_run(NewRun {
                workflow_id: workflow.id,
                entity_id,
                trigger_context,
            })
            .await
            .map_err(|e| match e {
                DbError::NotFound => EngineError::WorkflowNotFound(workflow.id),
                DbError::Inactive(id) => EngineError::WorkflowInactive(id),
                other => other.into(),
            })?;
        if run.workflow_version != workflow.version {
            debug!(
                loaded = workflow.version,
                pinned = run.workflow_version,
                "workflow republished since it was loaded"
            );
        }
        info!(run_id = %run.id, workflow_id = %workflow.id, version = run.workflow_version, "run created");
        Ok(run)
    }

    /// Create a run for `workflow` and drive it to a terminal state.
    pub async fn start(&self, workflow: &WorkflowRow, trigger_context: Value) -> Result<RunRow, EngineError> {
        let run = self.create_run(workflow, trigger_context, None).await?;
        self.execute(run.id).await
    }

    /// Mark a run aborted. A running run stops before its next step.
    pub async fn abort(&self, run_id: Uuid) -> Result<RunRow, EngineError> {
        loop {
            let run = self.load_run(run_id).await?;
            if run.status.is_terminal() {
                return Err(EngineError::RunFinished { run_id, status: run.status });
            }
            match self
                .store
                .transition_run(run_id, run.status, RunStatus::Aborted, None)
                .await
            {
                Ok(aborted) => {
                    info!(run_id = %run_id, "run aborted");
                    return Ok(aborted);
                }
                // Lost a race with pending -> running; look again.
                Err(DbError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Drive a `pending` run to a terminal state and return the final record.
    ///
    /// Step failures end the run as `failed` and are *not* returned as
    /// errors; `Err` is reserved for persistence problems and misuse.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn execute(&self, run_id: Uuid) -> Result<RunRow, EngineError> {
        let run = self.load_run(run_id).await?;
        match run.status {
            RunStatus::Pending => {}
            RunStatus::Running => return Err(EngineError::RunInProgress(run_id)),
            RunStatus::Aborted => {
                info!("run aborted before it started");
                return Ok(run);
            }
            status => return Err(EngineError::RunFinished { run_id, status }),
        }

        let run = match self
            .store
            .transition_run(run_id, RunStatus::Pending, RunStatus::Running, None)
            .await
        {
            Ok(run) => run,
            Err(DbError::Conflict { .. }) => return self.load_run(run_id).await,
            Err(e) => return Err(e.into()),
        };

        match self.drive(run).await {
            Ok(run) => Ok(run),
            Err(e) => {
                error!("run interrupted: {e}");
                if let Err(mark) = self
                    .store
                    .transition_run(run_id, RunStatus::Running, RunStatus::Failed, Some(e.to_string()))
                    .await
                {
                    error!("could not mark interrupted run failed: {mark}");
                }
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internal: the interpreter loop.
    // -----------------------------------------------------------------------

    async fn drive(&self, run: RunRow) -> Result<RunRow, EngineError> {
        let steps = self.store.list_steps(run.workflow_id, run.workflow_version).await?;
        if steps.len() != run.step_count as usize {
            let message = format!(
                "version {} has {} stored steps, expected {}",
                run.workflow_version,
                steps.len(),
                run.step_count
            );
            return self.finish(&run, RunStatus::Failed, Some(message)).await;
        }
        let Some(entry) = steps.first().map(|s| s.id) else {
            info!("empty step chain");
            return self.finish(&run, RunStatus::Succeeded, None).await;
        };
        let chain: HashMap<Uuid, StepRow> = steps.into_iter().map(|s| (s.id, s)).collect();

        let mut context = run.context.clone();
        let mut completed: HashSet<Uuid> = HashSet::new();
        let mut current = entry;
        if let Some(stopped) = self.progress(&run, current, &context).await? {
            return Ok(stopped);
        }

        loop {
            if let Some(aborted) = self.aborted(run.id).await? {
                info!(step_id = %current, "run aborted; not starting next step");
                return Ok(aborted);
            }

            let Some(step) = chain.get(&current) else {
                let message = format!("step {current} is not part of version {}", run.workflow_version);
                return self.finish(&run, RunStatus::Failed, Some(message)).await;
            };
            if !completed.insert(step.id) {
                let message = format!("step {} re-entered within one run", step.id);
                return self.finish(&run, RunStatus::Failed, Some(message)).await;
            }

            match self.run_step(&run, step, &context).await? {
                Verdict::Advance { next, patch } => {
                    merge_patch(&mut context, patch);
                    match next {
                        Some(next) => {
                            current = next;
                            if let Some(stopped) = self.progress(&run, current, &context).await? {
                                return Ok(stopped);
                            }
                        }
                        None => {
                            if let Some(stopped) = self.progress(&run, current, &context).await? {
                                return Ok(stopped);
                            }
                            return self.finish(&run, RunStatus::Succeeded, None).await;
                        }
                    }
                }
                Verdict::Fail(message) => {
                    return self.finish(&run, RunStatus::Failed, Some(message)).await;
                }
                Verdict::Aborted(run) => return Ok(run),
            }
        }
    }

    /// Execute one step, retrying as configured.
    async fn run_step(&self, run: &RunRow, step: &StepRow, context: &Value) -> Result<Verdict, EngineError> {
        let Some(executor) = self.registry.get(&step.step_type) else {
            return Ok(Verdict::Fail(format!(
                "no executor registered for step type '{}'",
                step.step_type
            )));
        };
        let is_condition = step.step_type == CONDITION_STEP_TYPE;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let ctx = RunContext {
                workflow_id: run.workflow_id,
                workflow_version: run.workflow_version,
                run_id: run.id,
                step_id: step.id,
                attempt,
                trigger: run.trigger_context.clone(),
                data: context.clone(),
            };

            let started_at = Utc::now();
            let result = match tokio::time::timeout(
                self.config.step_timeout,
                executor.execute(&step.config, &ctx),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ExecutorError::Retryable(format!(
                    "step timed out after {:?}",
                    self.config.step_timeout
                ))),
            };

            let (outcome, verdict) = match (result, is_condition) {
                (Ok(StepResult { outcome: StepOutcome::Success, context_patch }), false) => (
                    ExecutionOutcome::Success,
                    Ok(Verdict::Advance { next: step.next_step_id, patch: context_patch }),
                ),
                (Ok(StepResult { outcome: StepOutcome::Branch(taken), context_patch }), true) => (
                    if taken { ExecutionOutcome::BranchTrue } else { ExecutionOutcome::BranchFalse },
                    Ok(Verdict::Advance {
                        next: if taken { step.true_step_id } else { step.false_step_id },
                        patch: context_patch,
                    }),
                ),
                (Ok(StepResult { outcome, .. }), _) => (
                    ExecutionOutcome::Failure,
                    Err(ExecutorError::Fatal(format!(
                        "step type '{}' reported {outcome:?}",
                        step.step_type
                    ))),
                ),
                (Err(e), _) => (ExecutionOutcome::Failure, Err(e)),
            };

            self.store
                .record_step_execution(StepExecutionRow {
                    id: Uuid::new_v4(),
                    run_id: run.id,
                    step_id: step.id,
                    step_type: step.step_type.clone(),
                    attempt: attempt as i32,
                    outcome,
                    started_at,
                    ended_at: Utc::now(),
                    error_detail: verdict.as_ref().err().map(ToString::to_string),
                })
                .await?;

            let message = match verdict {
                Ok(advance) => return Ok(advance),
                Err(ExecutorError::Fatal(msg)) => return Ok(Verdict::Fail(msg)),
                Err(ExecutorError::Retryable(msg)) => msg,
            };

            if attempt > self.config.max_retries {
                return Ok(Verdict::Fail(format!(
                    "step {} ({}) failed after {attempt} attempts: {message}",
                    step.id, step.step_type
                )));
            }

            let delay = self
                .config
                .retry_base_delay
                .saturating_mul(2u32.saturating_pow(attempt - 1));
            warn!(
                step_id = %step.id,
                "retryable error (attempt {}/{}), retrying in {:?}: {}",
                attempt,
                self.config.max_retries + 1,
                delay,
                message
            );
            tokio::time::sleep(delay).await;

            if let Some(aborted) = self.aborted(run.id).await? {
                return Ok(Verdict::Aborted(aborted));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internal: run record bookkeeping.
    // -----------------------------------------------------------------------

    async fn load_run(&self, run_id: Uuid) -> Result<RunRow, EngineError> {
        self.store.get_run(run_id).await.map_err(|e| match e {
            DbError::NotFound => EngineError::RunNotFound(run_id),
            other => other.into(),
        })
    }

    async fn aborted(&self, run_id: Uuid) -> Result<Option<RunRow>, EngineError> {
        let run = self.load_run(run_id).await?;
        Ok((run.status == RunStatus::Aborted).then_some(run))
    }

    /// Persist pointer and context. Returns the run if it was stopped
    /// externally in the meantime.
    async fn progress(&self, run: &RunRow, current: Uuid, context: &Value) -> Result<Option<RunRow>, EngineError> {
        match self
            .store
            .update_run_progress(run.id, Some(current), context.clone())
            .await
        {
            Ok(()) => Ok(None),
            Err(DbError::Conflict { .. }) => Ok(Some(self.load_run(run.id).await?)),
            Err(e) => Err(e.into()),
        }
    }

    /// Move `running` to a terminal status. An abort that landed first wins.
    async fn finish(&self, run: &RunRow, status: RunStatus, last_error: Option<String>) -> Result<RunRow, EngineError> {
        match self
            .store
            .transition_run(run.id, RunStatus::Running, status, last_error.clone())
            .await
        {
            Ok(done) => {
                match &last_error {
                    Some(message) => warn!(status = %status, "run finished: {message}"),
                    None => info!(status = %status, "run finished"),
                }
                Ok(done)
            }
            Err(DbError::Conflict { .. }) => self.load_run(run.id).await,
            Err(e) => Err(e.into()),
        }
    }
}

/// Shallow-merge a step's context patch into the run context.
fn merge_patch(context: &mut Value, patch: Value) {
    match patch {
        Value::Null => {}
        Value::Object(entries) => {
            if !context.is_object() {
                *context = Value::Object(Default::default());
            }
            if let Value::Object(target) = context {
                target.extend(entries);
            }
        }
        other => warn!(patch = %other, "ignoring non-object context patch"),
    }
}

#[cfg(test)]
mod tests {
    use super::merge_patch;
    use serde_json::json;

    #[test]
    fn merge_patch_is_shallow_and_ignores_non_objects() {
        let mut ctx = json!({ "a": 1, "nested": { "x": 1 } });
        merge_patch(&mut ctx, json!({ "b": 2, "nested": { "y": 2 } }));
        assert_eq!(ctx, json!({ "a": 1, "b": 2, "nested": { "y": 2 } }));

        merge_patch(&mut ctx, json!(["ignored"]));
        merge_patch(&mut ctx, serde_json::Value::Null);
        assert_eq!(ctx["b"], 2);

        let mut scalar = json!("payload");
        merge_patch(&mut scalar, json!({ "k": true }));
        assert_eq!(scalar, json!({ "k": true }));
    }
}
