//! Executor-level error type.

use thiserror::Error;

/// Errors returned by a step executor's `execute` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable`: the step is attempted again with exponential back-off.
/// - `Fatal`: the run is immediately marked as failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// Transient failure; the engine should re-try the step.
    #[error("retryable step error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal step error: {0}")]
    Fatal(String),
}

impl ExecutorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}
