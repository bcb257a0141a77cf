//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what an authored workflow graph
//! looks like in memory. They are serialised to/from the JSONB `raw_graph`
//! column of the `workflows` table.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// GraphNode
// ---------------------------------------------------------------------------

/// What a node does, with its kind-specific data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum NodeKind {
    /// The single entry node. Decides which events start a run.
    Trigger {
        trigger_type: String,
        #[serde(default)]
        config: Value,
    },
    /// A side-effecting step dispatched to the executor registered for
    /// `step_type`.
    Action {
        step_type: String,
        #[serde(default)]
        config: Value,
    },
    /// A two-way branch; its executor reports a boolean.
    Condition {
        #[serde(default)]
        config: Value,
    },
}

/// One vertex in the authored graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Author-assigned, stable across edits (referenced by edges).
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl GraphNode {
    pub fn trigger(id: impl Into<String>, trigger_type: impl Into<String>, config: Value) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Trigger {
                trigger_type: trigger_type.into(),
                config,
            },
        }
    }

    pub fn action(id: impl Into<String>, step_type: impl Into<String>, config: Value) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Action {
                step_type: step_type.into(),
                config,
            },
        }
    }

    pub fn condition(id: impl Into<String>, config: Value) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Condition { config },
        }
    }

    pub fn is_trigger(&self) -> bool {
        matches!(self.kind, NodeKind::Trigger { .. })
    }

    pub fn is_condition(&self) -> bool {
        matches!(self.kind, NodeKind::Condition { .. })
    }
}

// ---------------------------------------------------------------------------
// GraphEdge
// ---------------------------------------------------------------------------

/// Which successor pointer an edge populates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchLabel {
    #[default]
    Default,
    True,
    False,
}

impl std::fmt::Display for BranchLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
        }
    }
}

/// Directed edge from one node to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub branch: BranchLabel,
}

impl GraphEdge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            branch: BranchLabel::Default,
        }
    }

    pub fn on(mut self, branch: BranchLabel) -> Self {
        self.branch = branch;
        self
    }
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

/// The authored graph of a workflow, as stored in `raw_graph`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

impl WorkflowGraph {
    pub fn new(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Self {
        Self { nodes, edges }
    }

    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A business event offered to the trigger matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub organization_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}
