//! Node domain types: categories, capabilities, statuses, and results.
//!
//! These types describe what a node *is* (metadata) and what happened when
//! it ran (status, result). The executable side of a node -- its schemas
//! and executor -- lives in `flowtide-core`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::FieldDescriptor;

// ---------------------------------------------------------------------------
// NodeCategory
// ---------------------------------------------------------------------------

/// Coarse grouping of node types, used for palette organisation.
///
/// Purely informational -- the engine never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Action,
    Logic,
    Integration,
    Transform,
}

impl std::fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeCategory::Action => write!(f, "action"),
            NodeCategory::Logic => write!(f, "logic"),
            NodeCategory::Integration => write!(f, "integration"),
            NodeCategory::Transform => write!(f, "transform"),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeCapabilities
// ---------------------------------------------------------------------------

/// Advisory capability flags declared by a node type.
///
/// The engine does not enforce any of these; they are surfaced to tooling
/// so it can decide which affordances to offer for a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeCapabilities {
    pub supports_enrichment: bool,
    pub supports_bulk_actions: bool,
    pub supports_approval: bool,
    pub supports_rerun: bool,
    pub supports_cancel: bool,
}

// ---------------------------------------------------------------------------
// NodeStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a node within a workflow run.
///
/// Moves monotonically through `Idle -> Running -> (Success | Error |
/// Skipped)`; `Skipped` may also follow directly from `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Idle,
    Running,
    Success,
    Error,
    Skipped,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Idle => write!(f, "idle"),
            NodeStatus::Running => write!(f, "running"),
            NodeStatus::Success => write!(f, "success"),
            NodeStatus::Error => write!(f, "error"),
            NodeStatus::Skipped => write!(f, "skipped"),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeExecutionResult
// ---------------------------------------------------------------------------

/// The outcome of a single node execution.
///
/// `success == true` implies `output` conforms to the node's output schema;
/// `success == false` implies `error` carries a human-readable message.
/// The remaining fields are optional envelopes the engine forwards without
/// interpreting: `next_node_id` selects a conditional branch,
/// `needs_approval` and `notification` are surfaced to observers as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Chosen branch for conditional nodes; edges whose `condition` does
    /// not match are skip-propagated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_node_id: Option<String>,
    /// Opaque approval metadata, surfaced upward but not acted on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_approval: Option<Value>,
    /// Opaque notification envelope, forwarded to observer hooks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<Value>,
}

impl NodeExecutionResult {
    /// A successful result carrying the given output.
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            next_node_id: None,
            needs_approval: None,
            notification: None,
        }
    }

    /// A failed result with a human-readable error message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            next_node_id: None,
            needs_approval: None,
            notification: None,
        }
    }

    /// Attach a conditional branch selection.
    pub fn with_next_node(mut self, next_node_id: impl Into<String>) -> Self {
        self.next_node_id = Some(next_node_id.into());
        self
    }

    /// Attach opaque approval metadata.
    pub fn with_needs_approval(mut self, payload: Value) -> Self {
        self.needs_approval = Some(payload);
        self
    }

    /// Attach an opaque notification envelope.
    pub fn with_notification(mut self, envelope: Value) -> Self {
        self.notification = Some(envelope);
        self
    }
}

// ---------------------------------------------------------------------------
// NodeMetadata
// ---------------------------------------------------------------------------

/// Executor-free description of a node type.
///
/// This is what the registry hands to tooling (palette, docs, editors):
/// everything from the definition except the executor itself, with the
/// schemas flattened to introspection descriptors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Unique type identifier, e.g. `"http.request"`.
    pub type_id: String,
    pub name: String,
    pub description: String,
    pub category: NodeCategory,
    /// Rough duration estimate in seconds, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_secs: Option<u64>,
    #[serde(default)]
    pub capabilities: NodeCapabilities,
    /// Ordered field descriptors of the input schema.
    pub input_fields: Vec<FieldDescriptor>,
    /// Ordered field descriptors of the output schema.
    pub output_fields: Vec<FieldDescriptor>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
