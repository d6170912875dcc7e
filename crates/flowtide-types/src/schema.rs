//! Schema introspection descriptors.
//!
//! A `FieldDescriptor` tree is the executor-free view of a node schema:
//! enough for an editor to render a form or a docs generator to list the
//! fields, without access to the validation logic itself. Descriptors are
//! derived once at schema construction time in `flowtide-core`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// FieldType
// ---------------------------------------------------------------------------

/// The declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Enum,
    Array,
    Object,
    Unknown,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Number => write!(f, "number"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Enum => write!(f, "enum"),
            FieldType::Array => write!(f, "array"),
            FieldType::Object => write!(f, "object"),
            FieldType::Unknown => write!(f, "unknown"),
        }
    }
}

// ---------------------------------------------------------------------------
// FieldDescriptor
// ---------------------------------------------------------------------------

/// One introspected schema field.
///
/// For `Array` fields whose elements are objects, `children` describes the
/// element's fields; for nested `Object` fields it describes the inner
/// fields. Order matches the schema's declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// False when the field is marked optional or nullable, or has a default.
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Allowed values for `Enum` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FieldDescriptor>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
