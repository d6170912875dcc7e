//! Execution context: the per-run variable store and its resolvers.
//!
//! `ExecutionContext` holds the live variable map that flows through a
//! workflow run. It supports dot/bracket path resolution, `$`-rooted
//! JSONPath-style queries, `{{ expr }}` template interpolation, and the
//! dual-storage merge of node outputs. `NodeContext` is the per-node view
//! handed to executors: a snapshot of the variables at launch plus a live
//! resolver bound to this context.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Path segments
// ---------------------------------------------------------------------------

/// One step of a resolution path: `a.b[0]` parses to
/// `[Key("a"), Key("b"), Index(0)]`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Key(String),
    Index(usize),
    Wildcard,
}

/// Parse a dot/bracket path into segments.
///
/// Accepts `a.b.c`, `a[0].b`, `[0].b`, `['key']`, `["key"]`, and `[*]`.
/// Returns `None` on malformed input (unclosed bracket, empty key).
fn parse_path(path: &str) -> Option<Vec<PathSegment>> {
    let mut segments = Vec::new();
    let bytes = path.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            b'.' => {
                pos += 1;
                if pos >= bytes.len() {
                    return None;
                }
            }
            b'[' => {
                let close = path[pos..].find(']')? + pos;
                let inner = path[pos + 1..close].trim();
                if inner == "*" {
                    segments.push(PathSegment::Wildcard);
                } else if (inner.starts_with('\'') && inner.ends_with('\'') && inner.len() >= 2)
                    || (inner.starts_with('"') && inner.ends_with('"') && inner.len() >= 2)
                {
                    segments.push(PathSegment::Key(inner[1..inner.len() - 1].to_string()));
                } else {
                    segments.push(PathSegment::Index(inner.parse().ok()?));
                }
                pos = close + 1;
            }
            _ => {
                let rest = &path[pos..];
                let end = rest
                    .find(['.', '['])
                    .unwrap_or(rest.len());
                if end == 0 {
                    return None;
                }
                segments.push(PathSegment::Key(rest[..end].to_string()));
                pos += end;
            }
        }
    }

    Some(segments)
}

/// Walk a single path (no wildcards) through a value.
///
/// Traversal through null or a missing key yields `None` -- the absent
/// value, distinct from an actual stored `Value::Null`.
fn walk_one(start: &Value, segments: &[PathSegment]) -> Option<Value> {
    let mut current = start;
    for segment in segments {
        current = match segment {
            PathSegment::Key(key) => current.get(key.as_str())?,
            PathSegment::Index(idx) => current.as_array()?.get(*idx)?,
            PathSegment::Wildcard => return None,
        };
    }
    Some(current.clone())
}

/// Walk a path that may contain wildcards, collecting every match.
fn walk_many(current: &Value, segments: &[PathSegment], out: &mut Vec<Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(current.clone());
        return;
    };

    match head {
        PathSegment::Key(key) => {
            if let Some(next) = current.get(key.as_str()) {
                walk_many(next, rest, out);
            }
        }
        PathSegment::Index(idx) => {
            if let Some(next) = current.as_array().and_then(|a| a.get(*idx)) {
                walk_many(next, rest, out);
            }
        }
        PathSegment::Wildcard => match current {
            Value::Array(items) => {
                for item in items {
                    walk_many(item, rest, out);
                }
            }
            Value::Object(map) => {
                for value in map.values() {
                    walk_many(value, rest, out);
                }
            }
            _ => {}
        },
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Per-run variable store with templating and output merging.
///
/// Cloning is cheap: clones share the same live variable map. A run's
/// context is created at workflow start and discarded at the end.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    variables: Arc<DashMap<String, Value>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context pre-populated with initial variables.
    pub fn with_variables(initial: impl IntoIterator<Item = (String, Value)>) -> Self {
        let ctx = Self::new();
        ctx.merge_variables(initial);
        ctx
    }

    // -----------------------------------------------------------------------
    // Variable store
    // -----------------------------------------------------------------------

    pub fn set_variable(&self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    pub fn get_variable(&self, key: &str) -> Option<Value> {
        self.variables.get(key).map(|v| v.clone())
    }

    pub fn has_variable(&self, key: &str) -> bool {
        self.variables.contains_key(key)
    }

    /// Remove a variable; returns whether it existed.
    pub fn delete_variable(&self, key: &str) -> bool {
        self.variables.remove(key).is_some()
    }

    pub fn clear_variables(&self) {
        self.variables.clear();
    }

    pub fn merge_variables(&self, entries: impl IntoIterator<Item = (String, Value)>) {
        for (key, value) in entries {
            self.variables.insert(key, value);
        }
    }

    /// A point-in-time copy of the full variable map.
    pub fn variables_snapshot(&self) -> HashMap<String, Value> {
        self.variables
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn variables_as_value(&self) -> Value {
        let mut map = Map::new();
        for entry in self.variables.iter() {
            map.insert(entry.key().clone(), entry.value().clone());
        }
        Value::Object(map)
    }

    // -----------------------------------------------------------------------
    // Path resolution
    // -----------------------------------------------------------------------

    /// Resolve a dot/bracket path against the variable map.
    ///
    /// The empty path returns the whole map as an object. Missing keys,
    /// out-of-range indexes, and traversal through null all yield `None`.
    pub fn resolve_nested_path(&self, path: &str) -> Option<Value> {
        if path.is_empty() {
            return Some(self.variables_as_value());
        }

        let segments = parse_path(path)?;
        match segments.split_first() {
            None => Some(self.variables_as_value()),
            Some((PathSegment::Key(key), rest)) => {
                let root = self.variables.get(key.as_str()).map(|v| v.clone())?;
                walk_one(&root, rest)
            }
            // A leading index only resolves when the current node is a
            // list; the root of the store is a map, so it never does.
            Some((PathSegment::Index(_) | PathSegment::Wildcard, _)) => None,
        }
    }

    /// Evaluate a `$`-rooted JSONPath-style expression.
    ///
    /// Supports dot keys, bracket keys (`['key']`), numeric indexes, and
    /// the `[*]` / `.*` wildcard. A singleton result list unwraps to the
    /// scalar; multiple matches return an array. Any parse or traversal
    /// error yields `None`.
    pub fn evaluate_json_path(&self, path: &str) -> Option<Value> {
        let rest = path.strip_prefix('$')?;
        let root = self.variables_as_value();
        if rest.is_empty() {
            return Some(root);
        }

        let segments = parse_path(rest)?;
        let mut matches = Vec::new();
        walk_many(&root, &segments, &mut matches);

        match matches.len() {
            0 => None,
            1 => Some(matches.remove(0)),
            _ => Some(Value::Array(matches)),
        }
    }

    fn resolve_expression(&self, expr: &str) -> Option<Value> {
        if expr.starts_with('$') {
            self.evaluate_json_path(expr)
        } else {
            self.resolve_nested_path(expr)
        }
    }

    // -----------------------------------------------------------------------
    // Template interpolation
    // -----------------------------------------------------------------------

    /// Interpolate `{{ expr }}` references in a template value.
    ///
    /// Non-string templates are returned verbatim. A template that is
    /// exactly one `{{ expr }}` resolves to the raw value, preserving its
    /// type; mixed templates substitute each reference with its string
    /// coercion.
    pub fn interpolate(&self, template: &Value) -> Value {
        let Some(text) = template.as_str() else {
            return template.clone();
        };

        if let Some(expr) = single_expression(text) {
            return self.resolve_expression(expr).unwrap_or(Value::Null);
        }

        let mut result = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find("{{") {
            let Some(close) = rest[open + 2..].find("}}") else {
                break;
            };
            let close = open + 2 + close;
            result.push_str(&rest[..open]);
            let expr = rest[open + 2..close].trim();
            result.push_str(&coerce_to_string(self.resolve_expression(expr)));
            rest = &rest[close + 2..];
        }
        result.push_str(rest);
        Value::String(result)
    }

    /// Structurally interpolate every string leaf of a value.
    pub fn interpolate_object(&self, value: &Value) -> Value {
        match value {
            Value::String(_) => self.interpolate(value),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.interpolate_object(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.interpolate_object(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Node output merging
    // -----------------------------------------------------------------------

    /// Store a node's output under its ID, and shallow-merge object
    /// outputs into the top level.
    ///
    /// After this call, both `{{ node_id.field }}` and the bare
    /// `{{ field }}` resolve to the same value downstream. The id-keyed
    /// copy is authoritative; top-level keys are last-writer-wins.
    pub fn store_node_output(&self, node_id: &str, output: Value) {
        if let Value::Object(map) = &output {
            for (key, value) in map {
                self.variables.insert(key.clone(), value.clone());
            }
        }
        self.variables.insert(node_id.to_string(), output);
    }

    pub fn get_node_output(&self, node_id: &str) -> Option<Value> {
        self.get_variable(node_id)
    }

    // -----------------------------------------------------------------------
    // Node-context derivation
    // -----------------------------------------------------------------------

    /// Derive the per-node view handed to an executor.
    ///
    /// `variables` is a snapshot taken now; the returned context's
    /// `resolve_nested_path` stays bound to this live store, so the two
    /// intentionally diverge once later nodes write their outputs.
    pub fn to_node_context(
        &self,
        user_id: impl Into<String>,
        workflow_execution_id: impl Into<String>,
    ) -> NodeContext {
        self.to_node_context_with(user_id, workflow_execution_id, NodeContextOptions::default())
    }

    pub fn to_node_context_with(
        &self,
        user_id: impl Into<String>,
        workflow_execution_id: impl Into<String>,
        options: NodeContextOptions,
    ) -> NodeContext {
        NodeContext {
            user_id: user_id.into(),
            campaign_id: options.campaign_id,
            workflow_execution_id: workflow_execution_id.into(),
            variables: self.variables_snapshot(),
            credentials: options.credentials,
            services: options.services,
            live: self.clone(),
        }
    }
}

/// If `text` is exactly one `{{ expr }}` with no surrounding characters,
/// return the inner expression.
fn single_expression(text: &str) -> Option<&str> {
    let inner = text.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

/// Coerce a resolved value to its template substitution string.
fn coerce_to_string(value: Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| coerce_to_string(Some(item)))
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => serde_json::to_string(&other).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// NodeContext
// ---------------------------------------------------------------------------

/// Optional extras attached when deriving a `NodeContext`.
#[derive(Debug, Clone, Default)]
pub struct NodeContextOptions {
    pub campaign_id: Option<String>,
    /// Opaque credentials bag; never inspected by the engine.
    pub credentials: Option<Value>,
    /// Opaque services bag; never inspected by the engine.
    pub services: Option<Value>,
}

/// The per-node execution view passed to an executor.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub user_id: String,
    pub campaign_id: Option<String>,
    pub workflow_execution_id: String,
    /// Variable snapshot taken when this context was derived.
    pub variables: HashMap<String, Value>,
    pub credentials: Option<Value>,
    pub services: Option<Value>,
    live: ExecutionContext,
}

impl NodeContext {
    /// Resolve a path against the *live* execution context -- unlike the
    /// `variables` snapshot, this sees writes made after derivation.
    pub fn resolve_nested_path(&self, path: &str) -> Option<Value> {
        self.live.resolve_nested_path(path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
