//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use db::{DbError, RunStatus};

use crate::models::BranchLabel;

/// Authoring errors found by the graph validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    #[error("workflow graph has no trigger node")]
    NoTrigger,

    #[error("workflow graph has {0} trigger nodes; exactly one is allowed")]
    MultipleTriggers(usize),

    /// An edge references a node ID that doesn't exist in the graph.
    #[error("edge '{edge_id}' references unknown node '{node_id}'")]
    DanglingEdge { edge_id: String, node_id: String },

    /// A node has more than one outgoing edge for the same branch.
    #[error("node '{node_id}' has more than one outgoing '{branch}' edge")]
    DuplicateBranch { node_id: String, branch: BranchLabel },

    /// Condition edges must be `true`/`false`; every other edge `default`.
    #[error("edge '{edge_id}' from node '{node_id}' cannot carry branch label '{branch}'")]
    InvalidBranchLabel {
        edge_id: String,
        node_id: String,
        branch: BranchLabel,
    },
}

impl ValidationError {
    /// Stable reason code surfaced to publish callers.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::DuplicateNodeId(_) => "DuplicateNodeId",
            Self::NoTrigger => "NoTrigger",
            Self::MultipleTriggers(_) => "MultipleTriggers",
            Self::DanglingEdge { .. } => "DanglingEdge",
            Self::DuplicateBranch { .. } => "DuplicateBranch",
            Self::InvalidBranchLabel { .. } => "InvalidBranchLabel",
        }
    }
}

/// Errors from the graph compiler. Unreachable for validated graphs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("node '{0}' is not a trigger node")]
    NotATrigger(String),

    #[error("edge targets unknown node '{0}'")]
    UnknownNode(String),

    #[error("trigger node '{0}' reached as a step")]
    TriggerAsStep(String),
}

/// Errors surfaced by the publication manager.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("workflow {0} not found")]
    NotFound(Uuid),

    #[error("stored graph is malformed: {0}")]
    MalformedGraph(#[source] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("compilation failed: {0}")]
    Compile(#[from] CompileError),

    /// The atomic swap failed; the workflow is still on its last good version.
    #[error("failed to persist compiled steps: {0}")]
    Persist(#[source] DbError),
}

impl PublishError {
    /// Stable reason code surfaced to publish callers.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::MalformedGraph(_) => "MalformedGraph",
            Self::Invalid(e) => e.reason(),
            Self::Compile(_) => "CompileFailure",
            Self::Persist(_) => "PersistFailure",
        }
    }

    pub fn is_authoring_error(&self) -> bool {
        matches!(self, Self::MalformedGraph(_) | Self::Invalid(_) | Self::Compile(_))
    }
}

impl From<DbError> for PublishError {
    fn from(err: DbError) -> Self {
        Self::Persist(err)
    }
}

/// Errors produced while matching events and driving runs.
///
/// Step failures are *not* errors at this level: they end the run as
/// `failed` and are reported through the returned run record.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("workflow {0} is not active")]
    WorkflowInactive(Uuid),

    #[error("run {run_id} is already {status}")]
    RunFinished { run_id: Uuid, status: RunStatus },

    #[error("run {0} is already being executed")]
    RunInProgress(Uuid),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] DbError),
}
