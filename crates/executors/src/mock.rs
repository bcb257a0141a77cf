//! `MockExecutor`: a test double for `StepExecutor`.
//!
//! Useful in unit and integration tests where a real action implementation
//! is either unavailable or irrelevant.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{ExecutorError, RunContext, StepExecutor, StepResult};

/// Behaviour injected into `MockExecutor` at construction time.
pub enum MockBehaviour {
    /// Succeed, returning the given context patch.
    Succeed(Value),
    /// Report a condition outcome.
    Branch(bool),
    /// Fail with a `Retryable` error on every call.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with a `Retryable` error for the first `failures` calls, then succeed.
    FlakyThenSucceed { failures: u32, message: String },
    /// Sleep for the given duration before succeeding (used to trip timeouts).
    Hang(Duration),
}

/// A mock executor that records every context it receives and returns a
/// programmer-specified result.
pub struct MockExecutor {
    /// Label used in test assertions.
    pub name: String,
    pub behaviour: MockBehaviour,
    /// Context data seen by this executor (in call order).
    pub calls: Arc<Mutex<Vec<Value>>>,
    failures_seen: AtomicU32,
}

impl MockExecutor {
    fn with(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            failures_seen: AtomicU32::new(0),
        }
    }

    /// Create a mock that always succeeds with the given context patch.
    pub fn succeeding(name: impl Into<String>, patch: Value) -> Self {
        Self::with(name, MockBehaviour::Succeed(patch))
    }

    /// Create a mock condition that always takes the given branch.
    pub fn branching(name: impl Into<String>, taken: bool) -> Self {
        Self::with(name, MockBehaviour::Branch(taken))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that fails `failures` times before succeeding.
    pub fn flaky(name: impl Into<String>, failures: u32) -> Self {
        Self::with(
            name,
            MockBehaviour::FlakyThenSucceed {
                failures,
                message: "transient failure".into(),
            },
        )
    }

    /// Create a mock that sleeps for `delay` on every call.
    pub fn hanging(name: impl Into<String>, delay: Duration) -> Self {
        Self::with(name, MockBehaviour::Hang(delay))
    }

    /// Number of times this executor has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl StepExecutor for MockExecutor {
    async fn execute(&self, _config: &Value, ctx: &RunContext) -> Result<StepResult, ExecutorError> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(ctx.data.clone());

        match &self.behaviour {
            MockBehaviour::Succeed(patch) => Ok(StepResult::success().with_patch(patch.clone())),
            MockBehaviour::Branch(taken) => Ok(StepResult::branch(*taken)),
            MockBehaviour::FailRetryable(msg) => Err(ExecutorError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(ExecutorError::Fatal(msg.clone())),
            MockBehaviour::FlakyThenSucceed { failures, message } => {
                let seen = self.failures_seen.fetch_add(1, Ordering::SeqCst);
                if seen < *failures {
                    Err(ExecutorError::Retryable(message.clone()))
                } else {
                    Ok(StepResult::success())
                }
            }
            MockBehaviour::Hang(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(StepResult::success())
            }
        }
    }
}
