//! Graph validation: run this before compiling a workflow.
//!
//! Rules enforced, in order:
//! 1. Node IDs must be unique within the graph.
//! 2. There must be exactly one trigger node.
//! 3. Every edge must reference existing node IDs (both ends).
//! 4. A condition node has at most one `true` and one `false` outgoing edge;
//!    every other node has at most one (`default`) outgoing edge.
//!
//! Connectivity is *not* required: nodes unreachable from the trigger are
//! legal and simply left out by the compiler.

use std::collections::HashSet;

use crate::models::{BranchLabel, GraphNode, WorkflowGraph};
use crate::ValidationError;

/// Validate the authored graph and return its trigger node.
///
/// # Errors
/// - [`ValidationError::DuplicateNodeId`] if two nodes share an ID.
/// - [`ValidationError::NoTrigger`] / [`ValidationError::MultipleTriggers`]
///   unless exactly one trigger node exists.
/// - [`ValidationError::DanglingEdge`] if an edge references a missing node.
/// - [`ValidationError::InvalidBranchLabel`] / [`ValidationError::DuplicateBranch`]
///   for malformed outgoing edges.
pub fn validate(graph: &WorkflowGraph) -> Result<&GraphNode, ValidationError> {
    // -----------------------------------------------------------------------
    // 1. Ensure node IDs are unique
    // -----------------------------------------------------------------------
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &graph.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(ValidationError::DuplicateNodeId(node.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Exactly one trigger
    // -----------------------------------------------------------------------
    let triggers: Vec<&GraphNode> = graph.nodes.iter().filter(|n| n.is_trigger()).collect();
    let trigger = match triggers.as_slice() {
        [] => return Err(ValidationError::NoTrigger),
        [single] => *single,
        many => return Err(ValidationError::MultipleTriggers(many.len())),
    };

    // -----------------------------------------------------------------------
    // 3. Validate edge endpoints
    // -----------------------------------------------------------------------
    for edge in &graph.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !seen_ids.contains(endpoint.as_str()) {
                return Err(ValidationError::DanglingEdge {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // 4. Outgoing edge shape per node kind
    // -----------------------------------------------------------------------
    let conditions: HashSet<&str> = graph
        .nodes
        .iter()
        .filter(|n| n.is_condition())
        .map(|n| n.id.as_str())
        .collect();

    let mut used: HashSet<(&str, BranchLabel)> = HashSet::new();
    for edge in &graph.edges {
        let is_condition = conditions.contains(edge.source.as_str());
        let label_fits = match edge.branch {
            BranchLabel::Default => !is_condition,
            BranchLabel::True | BranchLabel::False => is_condition,
        };
        if !label_fits {
            return Err(ValidationError::InvalidBranchLabel {
                edge_id: edge.id.clone(),
                node_id: edge.source.clone(),
                branch: edge.branch,
            });
        }
        if !used.insert((edge.source.as_str(), edge.branch)) {
            return Err(ValidationError::DuplicateBranch {
                node_id: edge.source.clone(),
                branch: edge.branch,
            });
        }
    }

    Ok(trigger)
}
