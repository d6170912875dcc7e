//! Workflow document interchange format.
//!
//! The JSON shape persisted by tooling (editors, storage, import/export):
//!
//! ```json
//! {
//!   "name": "my-flow",
//!   "description": "optional",
//!   "nodes": [ { "id": "a", "type": "http.request", "position": {"x": 0, "y": 0}, "config": {} } ],
//!   "edges": [ { "id": "e1", "source": "a", "sourceHandle": "output",
//!                "target": "b", "targetHandle": "input" } ]
//! }
//! ```
//!
//! The engine consumes the in-memory form (`flowtide-core`'s `Workflow`);
//! the conversion between the two also lives in `flowtide-core`, because
//! it resolves node types through the registry. This module is only the
//! byte-faithful serde surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A persisted workflow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<DocumentNode>,
    #[serde(default)]
    pub edges: Vec<DocumentEdge>,
}

/// A node as persisted: type reference plus raw configuration.
///
/// `config` is the raw (possibly templated) input map; it becomes the
/// in-memory node's `input` during conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentNode {
    pub id: String,
    #[serde(rename = "type")]
    pub type_id: String,
    /// Canvas coordinates, opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default)]
    pub config: Value,
}

/// Canvas position of a node in the visual editor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// An edge as persisted, with handle-level endpoints.
///
/// `source_handle` doubles as the branch label: a handle other than the
/// default `"output"` becomes the in-memory edge's `condition`.
/// `target_handle` drives field-level plumbing in the editor and is not
/// interpreted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEdge {
    pub id: String,
    pub source: String,
    pub source_handle: String,
    pub target: String,
    pub target_handle: String,
}

/// The handle name that marks an unconditioned (always-followed) edge.
pub const DEFAULT_SOURCE_HANDLE: &str = "output";

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
