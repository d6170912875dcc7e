//! Node registry: the index from type identifier to definition.
//!
//! Purely in-memory. Registration happens at startup; lookups afterwards
//! are read-mostly and lock-free via `DashMap`.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use flowtide_types::node::{NodeCategory, NodeMetadata};
use serde_json::Value;
use thiserror::Error;

use crate::definition::{NodeDefinition, NodeExecutor};
use crate::schema::SchemaError;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A definition with this type identifier is already registered.
    #[error("node type '{0}' is already registered")]
    DuplicateType(String),

    /// No definition is registered under this type identifier.
    #[error("unknown node type '{0}'")]
    UnknownType(String),

    /// Schema validation failed for the given type.
    #[error("validation failed for node type '{type_id}': {source}")]
    Validation {
        type_id: String,
        #[source]
        source: SchemaError,
    },
}

// ---------------------------------------------------------------------------
// NodeRegistry
// ---------------------------------------------------------------------------

/// Index of node definitions keyed by `type_id`.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    definitions: DashMap<String, Arc<NodeDefinition>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register a definition. Fails if the type identifier is taken.
    ///
    /// Returns `&self` so registrations can be chained.
    pub fn register(&self, definition: NodeDefinition) -> Result<&Self, RegistryError> {
        let type_id = definition.type_id.clone();
        match self.definitions.entry(type_id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateType(type_id)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(definition));
                Ok(self)
            }
        }
    }

    /// Register definitions in order.
    ///
    /// Not atomic: definitions before the first duplicate stay registered,
    /// and the duplicate halts the batch.
    pub fn register_all(
        &self,
        definitions: impl IntoIterator<Item = NodeDefinition>,
    ) -> Result<&Self, RegistryError> {
        for definition in definitions {
            self.register(definition)?;
        }
        Ok(self)
    }

    /// Remove a definition; returns whether it existed.
    pub fn unregister(&self, type_id: &str) -> bool {
        self.definitions.remove(type_id).is_some()
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn has(&self, type_id: &str) -> bool {
        self.definitions.contains_key(type_id)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn definition(&self, type_id: &str) -> Option<Arc<NodeDefinition>> {
        self.definitions.get(type_id).map(|d| Arc::clone(d.value()))
    }

    /// The executor-free view of a registered type.
    pub fn metadata(&self, type_id: &str) -> Option<NodeMetadata> {
        self.definitions.get(type_id).map(|d| d.metadata())
    }

    /// Only the executor of a registered type.
    pub fn executor(&self, type_id: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.definitions.get(type_id).map(|d| d.executor())
    }

    pub fn all_definitions(&self) -> Vec<Arc<NodeDefinition>> {
        self.definitions
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    pub fn all_metadata(&self) -> Vec<NodeMetadata> {
        self.definitions.iter().map(|e| e.metadata()).collect()
    }

    pub fn by_category(&self, category: NodeCategory) -> Vec<Arc<NodeDefinition>> {
        self.definitions
            .iter()
            .filter(|e| e.category == category)
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    pub fn metadata_by_category(&self, category: NodeCategory) -> Vec<NodeMetadata> {
        self.definitions
            .iter()
            .filter(|e| e.category == category)
            .map(|e| e.metadata())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Validation delegation
    // -----------------------------------------------------------------------

    /// Validate a value against a registered type's input schema.
    pub fn validate_input(&self, type_id: &str, input: &Value) -> Result<Value, RegistryError> {
        let definition = self
            .definition(type_id)
            .ok_or_else(|| RegistryError::UnknownType(type_id.to_string()))?;
        definition
            .input_schema
            .validate(input)
            .map_err(|source| RegistryError::Validation {
                type_id: type_id.to_string(),
                source,
            })
    }

    /// Validate a value against a registered type's output schema.
    pub fn validate_output(&self, type_id: &str, output: &Value) -> Result<Value, RegistryError> {
        let definition = self
            .definition(type_id)
            .ok_or_else(|| RegistryError::UnknownType(type_id.to_string()))?;
        definition
            .output_schema
            .validate(output)
            .map_err(|source| RegistryError::Validation {
                type_id: type_id.to_string(),
                source,
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::FnExecutor;
    use crate::schema::{FieldSpec, Schema};
    use flowtide_types::node::NodeExecutionResult;
    use serde_json::json;

    fn definition(type_id: &str, category: NodeCategory) -> NodeDefinition {
        NodeDefinition::new(
            type_id,
            type_id,
            "test node",
            category,
            Schema::object(vec![FieldSpec::string("value")]),
            Schema::any(),
            FnExecutor::shared(|input, _ctx| async move {
                Ok(NodeExecutionResult::success(input))
            }),
        )
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    #[test]
    fn test_register_and_lookup() {
        let registry = NodeRegistry::new();
        registry.register(definition("a", NodeCategory::Action)).unwrap();

        assert!(registry.has("a"));
        assert_eq!(registry.len(), 1);
        assert!(registry.definition("a").is_some());
        assert!(registry.definition("b").is_none());
    }

    #[test]
    fn test_register_duplicate_fails() {
        let registry = NodeRegistry::new();
        registry.register(definition("a", NodeCategory::Action)).unwrap();
        let err = registry
            .register(definition("a", NodeCategory::Logic))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateType(t) if t == "a"));
    }

    #[test]
    fn test_register_chaining() {
        let registry = NodeRegistry::new();
        registry
            .register(definition("a", NodeCategory::Action))
            .unwrap()
            .register(definition("b", NodeCategory::Logic))
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_all_halts_on_first_duplicate() {
        let registry = NodeRegistry::new();
        let err = registry
            .register_all(vec![
                definition("a", NodeCategory::Action),
                definition("b", NodeCategory::Action),
                definition("a", NodeCategory::Action),
                definition("c", NodeCategory::Action),
            ])
            .unwrap_err();

        assert!(matches!(err, RegistryError::DuplicateType(_)));
        // earlier registrations stick, later ones never happen
        assert!(registry.has("a"));
        assert!(registry.has("b"));
        assert!(!registry.has("c"));
    }

    #[test]
    fn test_unregister_roundtrip() {
        let registry = NodeRegistry::new();
        registry.register(definition("a", NodeCategory::Action)).unwrap();
        assert!(registry.unregister("a"));
        assert!(!registry.has("a"));
        assert!(!registry.unregister("a"));
    }

    // -----------------------------------------------------------------------
    // Metadata and category queries
    // -----------------------------------------------------------------------

    #[test]
    fn test_metadata_and_executor_accessors() {
        let registry = NodeRegistry::new();
        registry.register(definition("a", NodeCategory::Transform)).unwrap();

        let meta = registry.metadata("a").unwrap();
        assert_eq!(meta.type_id, "a");
        assert_eq!(meta.category, NodeCategory::Transform);
        assert!(registry.executor("a").is_some());
        assert!(registry.metadata("missing").is_none());
    }

    #[test]
    fn test_by_category_filters() {
        let registry = NodeRegistry::new();
        registry
            .register_all(vec![
                definition("a1", NodeCategory::Action),
                definition("a2", NodeCategory::Action),
                definition("l1", NodeCategory::Logic),
            ])
            .unwrap();

        assert_eq!(registry.by_category(NodeCategory::Action).len(), 2);
        assert_eq!(registry.metadata_by_category(NodeCategory::Logic).len(), 1);
        assert!(registry.by_category(NodeCategory::Integration).is_empty());
        assert_eq!(registry.all_definitions().len(), 3);
        assert_eq!(registry.all_metadata().len(), 3);
    }

    // -----------------------------------------------------------------------
    // Validation delegation
    // -----------------------------------------------------------------------

    #[test]
    fn test_validate_input_delegates_to_schema() {
        let registry = NodeRegistry::new();
        registry.register(definition("a", NodeCategory::Action)).unwrap();

        let ok = registry.validate_input("a", &json!({ "value": "x" })).unwrap();
        assert_eq!(ok["value"], json!("x"));

        let err = registry.validate_input("a", &json!({})).unwrap_err();
        assert!(matches!(err, RegistryError::Validation { .. }));
    }

    #[test]
    fn test_validate_unknown_type() {
        let registry = NodeRegistry::new();
        let err = registry.validate_input("ghost", &json!({})).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownType(t) if t == "ghost"));

        let err = registry.validate_output("ghost", &json!({})).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownType(_)));
    }

    #[test]
    fn test_validate_output_accepts_any_schema() {
        let registry = NodeRegistry::new();
        registry.register(definition("a", NodeCategory::Action)).unwrap();
        let ok = registry.validate_output("a", &json!([1, 2])).unwrap();
        assert_eq!(ok, json!([1, 2]));
    }
}
