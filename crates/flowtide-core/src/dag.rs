//! DAG planning: cycle detection and parallel wave computation.
//!
//! Uses `petgraph` to model the workflow's edges as a directed graph.
//! Topological sort rejects cycles, and depth-based grouping produces
//! execution waves: wave N holds every node whose longest dependency
//! chain has length N, so all members of a wave can run concurrently.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use petgraph::Direction;
use thiserror::Error;

use crate::workflow::Workflow;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Planner failures. A cycle is fatal for the whole run: no executor is
/// ever invoked.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("workflow graph contains a cycle involving node '{0}'")]
    CycleDetected(String),
}

// ---------------------------------------------------------------------------
// Wave computation
// ---------------------------------------------------------------------------

/// Group the workflow's node IDs into parallel execution waves.
///
/// Edges whose endpoints are not nodes of the workflow are ignored; a
/// node no edge points at lands in the first wave. Wave-internal order is
/// unspecified.
pub fn build_execution_plan(workflow: &Workflow) -> Result<Vec<Vec<String>>, PlanError> {
    if workflow.nodes.is_empty() {
        return Ok(vec![]);
    }

    let id_to_idx: HashMap<&str, usize> = workflow
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut graph = DiGraph::<&str, ()>::new();
    let node_indices: Vec<_> = workflow
        .nodes
        .iter()
        .map(|n| graph.add_node(n.id.as_str()))
        .collect();

    for edge in &workflow.edges {
        let (Some(&from), Some(&to)) = (
            id_to_idx.get(edge.from.as_str()),
            id_to_idx.get(edge.to.as_str()),
        ) else {
            // unknown endpoints contribute no dependency
            continue;
        };
        graph.add_edge(node_indices[from], node_indices[to], ());
    }

    // Topological sort -- detects cycles
    let sorted = toposort(&graph, None).map_err(|cycle| {
        PlanError::CycleDetected(graph[cycle.node_id()].to_string())
    })?;

    // Compute depth for each node: max predecessor depth + 1, roots at 0
    let mut depths: HashMap<&str, usize> = HashMap::new();
    for &node_idx in &sorted {
        let depth = graph
            .neighbors_directed(node_idx, Direction::Incoming)
            .map(|pred| depths.get(graph[pred]).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(graph[node_idx], depth);
    }

    // Group by depth into waves
    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut waves: Vec<Vec<String>> = vec![vec![]; max_depth + 1];
    for node in &workflow.nodes {
        waves[depths[node.id.as_str()]].push(node.id.clone());
    }

    Ok(waves)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
