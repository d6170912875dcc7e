//! Declarative value schemas: validation, defaults, and introspection.
//!
//! A `Schema` describes the shape of a node's input or output. It does two
//! jobs: `validate` normalizes a value (applying defaults, rejecting type
//! mismatches), and `fields` exposes the ordered `FieldDescriptor` tree for
//! tooling. Descriptors are derived at construction time, so introspection
//! never touches the validation path.

use flowtide_types::schema::{FieldDescriptor, FieldType};
use serde_json::{Map, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Validation failures. Distinct from executor failures: a schema error
/// means the node never ran.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The top-level value was not an object.
    #[error("expected an object, got {found}")]
    ExpectedObject { found: &'static str },

    /// A required field was absent (and had no default).
    #[error("missing required field '{name}'")]
    MissingField { name: String },

    /// A field was present but of the wrong type.
    #[error("field '{name}' expected {expected}, got {found}")]
    InvalidType {
        name: String,
        expected: FieldType,
        found: &'static str,
    },

    /// An enum field held a value outside its allowed set.
    #[error("field '{name}' value '{value}' is not one of [{allowed}]")]
    InvalidEnumValue {
        name: String,
        value: String,
        allowed: String,
    },
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// FieldSpec
// ---------------------------------------------------------------------------

/// One declared field of an object schema.
///
/// Built through the typed constructors (`FieldSpec::string`, ...) and
/// refined with the chainable setters. A field is treated as optional when
/// it is marked optional, marked nullable, or carries a default.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    name: String,
    field_type: FieldType,
    optional: bool,
    nullable: bool,
    description: Option<String>,
    default: Option<Value>,
    enum_values: Option<Vec<String>>,
    children: Option<Vec<FieldSpec>>,
}

impl FieldSpec {
    fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            optional: false,
            nullable: false,
            description: None,
            default: None,
            enum_values: None,
            children: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn enumeration(
        name: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut spec = Self::new(name, FieldType::Enum);
        spec.enum_values = Some(values.into_iter().map(Into::into).collect());
        spec
    }

    /// An array field. Pass element fields when the elements are objects;
    /// pass an empty vec for arrays of scalars.
    pub fn array(name: impl Into<String>, element_fields: Vec<FieldSpec>) -> Self {
        let mut spec = Self::new(name, FieldType::Array);
        if !element_fields.is_empty() {
            spec.children = Some(element_fields);
        }
        spec
    }

    pub fn object(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        let mut spec = Self::new(name, FieldType::Object);
        spec.children = Some(fields);
        spec
    }

    /// A field accepting any value.
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Unknown)
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    fn is_required(&self) -> bool {
        !self.optional && !self.nullable && self.default.is_none()
    }

    fn descriptor(&self) -> FieldDescriptor {
        FieldDescriptor {
            name: self.name.clone(),
            field_type: self.field_type,
            required: self.is_required(),
            description: self.description.clone(),
            default_value: self.default.clone(),
            enum_values: self.enum_values.clone(),
            children: self
                .children
                .as_ref()
                .map(|specs| specs.iter().map(FieldSpec::descriptor).collect()),
        }
    }

    /// Validate one present, non-null value against this field.
    fn check_value(&self, value: &Value) -> Result<Value, SchemaError> {
        let mismatch = || SchemaError::InvalidType {
            name: self.name.clone(),
            expected: self.field_type,
            found: type_name(value),
        };

        match self.field_type {
            FieldType::String => {
                if !value.is_string() {
                    return Err(mismatch());
                }
                Ok(value.clone())
            }
            FieldType::Number => {
                if !value.is_number() {
                    return Err(mismatch());
                }
                Ok(value.clone())
            }
            FieldType::Boolean => {
                if !value.is_boolean() {
                    return Err(mismatch());
                }
                Ok(value.clone())
            }
            FieldType::Enum => {
                let text = value.as_str().ok_or_else(mismatch)?;
                let allowed = self.enum_values.as_deref().unwrap_or(&[]);
                if !allowed.iter().any(|v| v == text) {
                    return Err(SchemaError::InvalidEnumValue {
                        name: self.name.clone(),
                        value: text.to_string(),
                        allowed: allowed.join(", "),
                    });
                }
                Ok(value.clone())
            }
            FieldType::Array => {
                let items = value.as_array().ok_or_else(mismatch)?;
                match &self.children {
                    None => Ok(value.clone()),
                    Some(element_fields) => {
                        let mut checked = Vec::with_capacity(items.len());
                        for item in items {
                            checked.push(validate_fields(
                                element_fields,
                                item.as_object().ok_or_else(|| SchemaError::InvalidType {
                                    name: self.name.clone(),
                                    expected: FieldType::Object,
                                    found: type_name(item),
                                })?,
                            )?);
                        }
                        Ok(Value::Array(checked))
                    }
                }
            }
            FieldType::Object => {
                let map = value.as_object().ok_or_else(mismatch)?;
                match &self.children {
                    None => Ok(value.clone()),
                    Some(inner) => validate_fields(inner, map),
                }
            }
            FieldType::Unknown => Ok(value.clone()),
        }
    }
}

/// Validate an object against a field list: defaults applied, required
/// fields enforced, unrecognized keys passed through untouched.
fn validate_fields(specs: &[FieldSpec], input: &Map<String, Value>) -> Result<Value, SchemaError> {
    let mut output = input.clone();

    for spec in specs {
        match input.get(&spec.name) {
            None | Some(Value::Null) => {
                if let Some(default) = &spec.default {
                    output.insert(spec.name.clone(), default.clone());
                } else if spec.nullable && matches!(input.get(&spec.name), Some(Value::Null)) {
                    // explicit null on a nullable field is preserved
                } else if spec.is_required() {
                    return Err(SchemaError::MissingField {
                        name: spec.name.clone(),
                    });
                } else {
                    // optional and absent: strip an explicit null, keep nothing
                    output.remove(&spec.name);
                }
            }
            Some(value) => {
                output.insert(spec.name.clone(), spec.check_value(value)?);
            }
        }
    }

    Ok(Value::Object(output))
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// A node input or output shape.
///
/// `Schema::object` validates structured maps field-by-field;
/// `Schema::any` accepts every value verbatim (and introspects to an
/// empty field list), for nodes whose payload is intentionally opaque.
#[derive(Debug, Clone)]
pub struct Schema {
    kind: SchemaKind,
    descriptors: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone)]
enum SchemaKind {
    Object { fields: Vec<FieldSpec> },
    Any,
}

impl Schema {
    /// An object schema with the given declared fields.
    pub fn object(fields: Vec<FieldSpec>) -> Self {
        let descriptors = fields.iter().map(FieldSpec::descriptor).collect();
        Self {
            kind: SchemaKind::Object { fields },
            descriptors,
        }
    }

    /// An empty object schema: accepts `{}` (or any object) unchanged.
    pub fn empty_object() -> Self {
        Self::object(Vec::new())
    }

    /// A passthrough schema accepting any value.
    pub fn any() -> Self {
        Self {
            kind: SchemaKind::Any,
            descriptors: Vec::new(),
        }
    }

    /// Validate and normalize a value.
    ///
    /// Normalization applies declared defaults and strips optional fields
    /// that arrived as `null` without a default.
    pub fn validate(&self, value: &Value) -> Result<Value, SchemaError> {
        match &self.kind {
            SchemaKind::Any => Ok(value.clone()),
            SchemaKind::Object { fields } => {
                let map = value.as_object().ok_or(SchemaError::ExpectedObject {
                    found: type_name(value),
                })?;
                validate_fields(fields, map)
            }
        }
    }

    /// Ordered field descriptors. Empty for passthrough schemas.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.descriptors
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
