//! The in-memory workflow: node instances wired to definitions, plus the
//! conversion from the persisted document form.
//!
//! A `Workflow` is what the executor consumes: every node entry carries
//! its definition by reference, its raw (possibly templated) input, and
//! the edges carry optional branch conditions.

use std::collections::HashSet;
use std::sync::Arc;

use flowtide_types::document::{
    DEFAULT_SOURCE_HANDLE, DocumentEdge, DocumentNode, WorkflowDocument,
};
use serde_json::{Value, json};
use thiserror::Error;

use crate::definition::NodeDefinition;
use crate::registry::NodeRegistry;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Structural problems with a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    #[error("node ID must not be empty")]
    EmptyNodeId,

    /// A document node references a type the registry does not know.
    #[error("unknown node type '{0}'")]
    UnknownType(String),
}

// ---------------------------------------------------------------------------
// Workflow model
// ---------------------------------------------------------------------------

/// One node instance within a workflow.
#[derive(Debug, Clone)]
pub struct WorkflowNode {
    /// Unique within the workflow; referenced by edges.
    pub id: String,
    pub type_id: String,
    /// Shared definition; many workflows may reference the same one.
    pub node: Arc<NodeDefinition>,
    /// Raw input, may contain `{{ }}` templates resolved at launch.
    pub input: Value,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, node: Arc<NodeDefinition>, input: Value) -> Self {
        let type_id = node.type_id.clone();
        Self {
            id: id.into(),
            type_id,
            node,
            input,
        }
    }
}

/// A directed edge. An edge with a `condition` is only followed when the
/// source node's result names it via `next_node_id`; unconditioned edges
/// are always followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub condition: Option<String>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// A complete workflow: a DAG of node instances.
#[derive(Debug, Clone)]
pub struct Workflow {
    /// Documentary; execution order is derived from the edges.
    pub entry_node_id: String,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<Edge>,
}

impl Workflow {
    pub fn new(
        entry_node_id: impl Into<String>,
        nodes: Vec<WorkflowNode>,
        edges: Vec<Edge>,
    ) -> Self {
        Self {
            entry_node_id: entry_node_id.into(),
            nodes,
            edges,
        }
    }

    /// Build the in-memory form from a persisted document, resolving node
    /// types through the registry.
    ///
    /// `config` becomes the node's raw input; a `sourceHandle` other than
    /// the default becomes the edge's branch condition. The entry node is
    /// derived as the first node without incoming edges.
    pub fn from_document(
        document: &WorkflowDocument,
        registry: &NodeRegistry,
    ) -> Result<Self, WorkflowError> {
        let nodes = document
            .nodes
            .iter()
            .map(|doc_node| {
                let definition = registry
                    .definition(&doc_node.type_id)
                    .ok_or_else(|| WorkflowError::UnknownType(doc_node.type_id.clone()))?;
                let input = if doc_node.config.is_null() {
                    json!({})
                } else {
                    doc_node.config.clone()
                };
                Ok(WorkflowNode::new(&doc_node.id, definition, input))
            })
            .collect::<Result<Vec<_>, WorkflowError>>()?;

        let edges: Vec<Edge> = document
            .edges
            .iter()
            .map(|doc_edge| Edge {
                from: doc_edge.source.clone(),
                to: doc_edge.target.clone(),
                condition: branch_condition(&doc_edge.source_handle),
            })
            .collect();

        let targets: HashSet<&str> = edges.iter().map(|e| e.to.as_str()).collect();
        let entry_node_id = nodes
            .iter()
            .find(|n| !targets.contains(n.id.as_str()))
            .or_else(|| nodes.first())
            .map(|n| n.id.clone())
            .unwrap_or_default();

        let workflow = Self::new(entry_node_id, nodes, edges);
        validate_workflow(&workflow)?;
        Ok(workflow)
    }

    /// Render the persisted document form of this workflow.
    ///
    /// Positions are not tracked in memory and are omitted; edge IDs are
    /// regenerated.
    pub fn to_document(&self, name: impl Into<String>, description: Option<String>) -> WorkflowDocument {
        WorkflowDocument {
            name: name.into(),
            description,
            nodes: self
                .nodes
                .iter()
                .map(|node| DocumentNode {
                    id: node.id.clone(),
                    type_id: node.type_id.clone(),
                    position: None,
                    config: node.input.clone(),
                })
                .collect(),
            edges: self
                .edges
                .iter()
                .enumerate()
                .map(|(idx, edge)| DocumentEdge {
                    id: format!("e{idx}"),
                    source: edge.from.clone(),
                    source_handle: edge
                        .condition
                        .clone()
                        .unwrap_or_else(|| DEFAULT_SOURCE_HANDLE.to_string()),
                    target: edge.to.clone(),
                    target_handle: "input".to_string(),
                })
                .collect(),
        }
    }
}

fn branch_condition(source_handle: &str) -> Option<String> {
    if source_handle.is_empty() || source_handle == DEFAULT_SOURCE_HANDLE {
        None
    } else {
        Some(source_handle.to_string())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints before execution.
///
/// Node IDs must be non-empty and unique. Edges naming unknown endpoints
/// are tolerated (the planner ignores them).
pub fn validate_workflow(workflow: &Workflow) -> Result<(), WorkflowError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for node in &workflow.nodes {
        if node.id.is_empty() {
            return Err(WorkflowError::EmptyNodeId);
        }
        if !seen.insert(node.id.as_str()) {
            return Err(WorkflowError::DuplicateNodeId(node.id.clone()));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
