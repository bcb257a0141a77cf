//! The `StepExecutor` trait: the contract every action type must fulfil.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::condition::lookup_path;
use crate::ExecutorError;

/// Run-local state handed to an executor for one step attempt.
///
/// Defined here (in the executors crate) so both the engine and individual
/// executor implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub workflow_id: Uuid,
    /// Workflow version the run pinned when it started.
    pub workflow_version: i32,
    pub run_id: Uuid,
    pub step_id: Uuid,
    /// 1-based attempt number for this step within the run.
    pub attempt: u32,
    /// Snapshot of the event payload that started the run.
    pub trigger: Value,
    /// Accumulated context: the trigger payload plus every patch returned
    /// by previously successful steps.
    pub data: Value,
}

impl RunContext {
    /// Resolve a dotted path against the accumulated context, falling back
    /// to the raw trigger payload.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.data, path).or_else(|| lookup_path(&self.trigger, path))
    }
}

/// What a step reported back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StepOutcome {
    /// An action completed its side effect.
    Success,
    /// A condition evaluated to the given boolean.
    Branch(bool),
}

/// Successful result of an `execute` call.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub outcome: StepOutcome,
    /// JSON object shallow-merged into the run context. `Null` means no change.
    pub context_patch: Value,
}

impl StepResult {
    pub fn success() -> Self {
        Self {
            outcome: StepOutcome::Success,
            context_patch: Value::Null,
        }
    }

    pub fn branch(taken: bool) -> Self {
        Self {
            outcome: StepOutcome::Branch(taken),
            context_patch: Value::Null,
        }
    }

    pub fn with_patch(mut self, patch: Value) -> Self {
        self.context_patch = patch;
        self
    }
}

/// The core executor trait.
///
/// Implementations may block on network I/O; the engine bounds every call
/// with a timeout and treats an elapsed timeout as a retryable failure.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Execute one attempt of a step with the step's `config` (copied from
    /// the authored node) and the run's current context.
    async fn execute(&self, config: &Value, ctx: &RunContext) -> Result<StepResult, ExecutorError>;
}
