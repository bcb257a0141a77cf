//! `executors` crate: the `StepExecutor` trait and built-in executors.
//!
//! Every action type the host application offers (send-email, add-tag,
//! call-webhook, …) implements [`StepExecutor`]. The engine crate looks
//! executors up by `step_type` and dispatches through this trait object.

pub mod condition;
pub mod error;
pub mod mock;
pub mod traits;

pub use condition::ConditionExecutor;
pub use error::ExecutorError;
pub use traits::{RunContext, StepExecutor, StepOutcome, StepResult};

/// Step type under which condition steps are compiled and dispatched.
pub const CONDITION_STEP_TYPE: &str = "condition";
