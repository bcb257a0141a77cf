//! Graph compilation: authored node graph to a persisted step chain.
//!
//! 1. Breadth-first traversal from the trigger's successor over an explicit
//!    queue, with a visited set keyed by node id. Each newly visited node
//!    becomes one step; `position` is the visitation sequence.
//! 2. A second pass wires `next` / `true` / `false` pointers from the edges.
//!    An edge that would close a loop among the compiled steps (including any
//!    edge pointing back at the trigger) is dropped and reported, so the
//!    chain is loop-free by construction.
//!
//! Nodes the traversal never reaches are excluded; they only live on in the
//! workflow's raw graph.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use db::models::NewStep;
use executors::CONDITION_STEP_TYPE;

use crate::models::{BranchLabel, GraphEdge, GraphNode, NodeKind, WorkflowGraph};
use crate::CompileError;

/// Output of [`compile`].
#[derive(Debug, Clone, Default)]
pub struct CompiledChain {
    /// Steps in visitation order; the first one is the entry step.
    pub steps: Vec<NewStep>,
    /// Ids of edges left out because they would re-enter an earlier step.
    pub dropped_edges: Vec<String>,
}

impl CompiledChain {
    pub fn entry(&self) -> Option<&NewStep> {
        self.steps.first()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Successor slots of one step in the arena, as arena indices.
#[derive(Debug, Default, Clone, Copy)]
struct Slots {
    next: Option<usize>,
    on_true: Option<usize>,
    on_false: Option<usize>,
}

impl Slots {
    fn successors(&self) -> impl Iterator<Item = usize> {
        [self.next, self.on_true, self.on_false].into_iter().flatten()
    }
}

/// Compile a validated graph, starting at `trigger`.
///
/// # Errors
/// Only for graphs that skipped validation: a non-trigger start node, an
/// edge to an unknown node, or a second trigger reachable as a step.
pub fn compile(graph: &WorkflowGraph, trigger: &GraphNode) -> Result<CompiledChain, CompileError> {
    if !trigger.is_trigger() {
        return Err(CompileError::NotATrigger(trigger.id.clone()));
    }

    let nodes: HashMap<&str, &GraphNode> = graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let mut outgoing: HashMap<&str, Vec<&GraphEdge>> = HashMap::new();
    for edge in &graph.edges {
        outgoing.entry(edge.source.as_str()).or_default().push(edge);
    }

    let Some(first) = outgoing.get(trigger.id.as_str()).and_then(|edges| edges.first()) else {
        return Ok(CompiledChain::default());
    };

    // ------------------------------------------------------------------
    // Pass 1: visit reachable nodes into an arena.
    // ------------------------------------------------------------------
    let mut arena: Vec<&GraphNode> = Vec::new();
    let mut index_of: HashMap<&str, usize> = HashMap::new();
    let mut visited: HashSet<&str> = HashSet::from([trigger.id.as_str()]);
    let mut queue: VecDeque<&str> = VecDeque::new();

    visited.insert(first.target.as_str());
    queue.push_back(first.target.as_str());

    while let Some(node_id) = queue.pop_front() {
        let node = *nodes
            .get(node_id)
            .ok_or_else(|| CompileError::UnknownNode(node_id.to_owned()))?;
        if node.is_trigger() {
            return Err(CompileError::TriggerAsStep(node.id.clone()));
        }

        index_of.insert(node_id, arena.len());
        arena.push(node);

        for &edge in outgoing.get(node_id).into_iter().flatten() {
            if visited.insert(edge.target.as_str()) {
                queue.push_back(edge.target.as_str());
            }
        }
    }

    // ------------------------------------------------------------------
    // Pass 2: wire pointers, dropping edges that would close a loop.
    // ------------------------------------------------------------------
    let mut slots = vec![Slots::default(); arena.len()];
    let mut dropped_edges = Vec::new();

    for (from, node) in arena.iter().enumerate() {
        for &edge in outgoing.get(node.id.as_str()).into_iter().flatten() {
            let to = match index_of.get(edge.target.as_str()) {
                Some(&to) if !reaches(&slots, to, from) => to,
                _ => {
                    warn!(
                        edge_id = %edge.id,
                        source = %edge.source,
                        target = %edge.target,
                        "dropping edge that re-enters an earlier step"
                    );
                    dropped_edges.push(edge.id.clone());
                    continue;
                }
            };
            let slot = &mut slots[from];
            match edge.branch {
                BranchLabel::Default => slot.next = Some(to),
                BranchLabel::True => slot.on_true = Some(to),
                BranchLabel::False => slot.on_false = Some(to),
            }
        }
    }

    // ------------------------------------------------------------------
    // Materialise steps with system-generated ids.
    // ------------------------------------------------------------------
    let ids: Vec<Uuid> = arena.iter().map(|_| Uuid::new_v4()).collect();
    let steps = arena
        .iter()
        .zip(&slots)
        .enumerate()
        .map(|(position, (node, slot))| {
            let (step_type, config) = step_shape(node);
            NewStep {
                id: ids[position],
                position: position as i32,
                step_type,
                config,
                next_step_id: slot.next.map(|i| ids[i]),
                true_step_id: slot.on_true.map(|i| ids[i]),
                false_step_id: slot.on_false.map(|i| ids[i]),
                source_node_id: node.id.clone(),
            }
        })
        .collect();

    Ok(CompiledChain { steps, dropped_edges })
}

fn step_shape(node: &GraphNode) -> (String, Value) {
    match &node.kind {
        NodeKind::Action { step_type, config } => (step_type.clone(), config.clone()),
        NodeKind::Condition { config } => (CONDITION_STEP_TYPE.to_owned(), config.clone()),
        // Rejected during traversal.
        NodeKind::Trigger { trigger_type, config } => (trigger_type.clone(), config.clone()),
    }
}

/// Whether `target` is reachable from `start` over the pointers wired so far.
fn reaches(slots: &[Slots], start: usize, target: usize) -> bool {
    let mut stack = vec![start];
    let mut seen = vec![false; slots.len()];
    while let Some(current) = stack.pop() {
        if current == target {
            return true;
        }
        if std::mem::replace(&mut seen[current], true) {
            continue;
        }
        stack.extend(slots[current].successors());
    }
    false
}
