//! `engine` crate: graph models, validation, compilation, publication,
//! trigger matching and the run execution engine.

pub mod compile;
pub mod error;
pub mod executor;
pub mod models;
pub mod publish;
pub mod trigger;
pub mod validate;

pub use compile::{compile, CompiledChain};
pub use error::{CompileError, EngineError, PublishError, ValidationError};
pub use executor::{default_registry, ExecutorConfig, ExecutorRegistry, RunEngine};
pub use models::{BranchLabel, Event, GraphEdge, GraphNode, NodeKind, WorkflowGraph};
pub use publish::{PublishResult, Publisher};
pub use trigger::TriggerMatcher;
pub use validate::validate;

#[cfg(test)]
mod executor_tests;
