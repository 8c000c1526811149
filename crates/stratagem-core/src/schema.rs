//! # Output schemas
//!
//! A [`SchemaDescriptor`] is the contract handed to the provider as its
//! response schema. After decoding, the same descriptor is checked against
//! the value so that parseable-but-misshapen output fails before it reaches
//! a caller.
//!
//! ## Example
//!
//! ```rust
//! use stratagem_core::schema::SchemaDescriptor;
//! use serde_json::json;
//!
//! let schema = SchemaDescriptor::object()
//!     .field("headline", SchemaDescriptor::String)
//!     .optional("score", SchemaDescriptor::Number);
//!
//! assert!(schema.validate(&json!({ "headline": "Grow faster" })).is_ok());
//! assert!(schema.validate(&json!({ "score": 3 })).is_err());
//! ```

use serde_json::{json, Map, Value};

/// Structural description of the output an agent expects.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaDescriptor {
    String,
    Number,
    Integer,
    Boolean,
    Array(Box<SchemaDescriptor>),
    Object(Vec<SchemaField>),
}

/// Named member of an object schema.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaField {
    pub name: String,
    pub schema: SchemaDescriptor,
    pub required: bool,
}

/// First structural mismatch found while validating a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{path}: {message}")]
pub struct SchemaViolation {
    /// JSON path of the offending node, rooted at `$`.
    pub path: String,
    pub message: String,
}

impl SchemaDescriptor {
    /// Empty object schema, extended with [`field`](Self::field).
    pub fn object() -> Self {
        Self::Object(Vec::new())
    }

    pub fn array_of(items: SchemaDescriptor) -> Self {
        Self::Array(Box::new(items))
    }

    /// Add a required field. No-op on non-object schemas.
    pub fn field(self, name: impl Into<String>, schema: SchemaDescriptor) -> Self {
        self.with_field(name.into(), schema, true)
    }

    /// Add an optional field. No-op on non-object schemas.
    pub fn optional(self, name: impl Into<String>, schema: SchemaDescriptor) -> Self {
        self.with_field(name.into(), schema, false)
    }

    fn with_field(self, name: String, schema: SchemaDescriptor, required: bool) -> Self {
        match self {
            Self::Object(mut fields) => {
                fields.push(SchemaField {
                    name,
                    schema,
                    required,
                });
                Self::Object(fields)
            }
            other => other,
        }
    }

    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    /// Render the provider-facing response schema (OpenAPI subset, upper-case types).
    pub fn to_provider_schema(&self) -> Value {
        match self {
            Self::String => json!({ "type": "STRING" }),
            Self::Number => json!({ "type": "NUMBER" }),
            Self::Integer => json!({ "type": "INTEGER" }),
            Self::Boolean => json!({ "type": "BOOLEAN" }),
            Self::Array(items) => json!({
                "type": "ARRAY",
                "items": items.to_provider_schema(),
            }),
            Self::Object(fields) => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for field in fields {
                    properties.insert(field.name.clone(), field.schema.to_provider_schema());
                    if field.required {
                        required.push(Value::String(field.name.clone()));
                    }
                }
                json!({
                    "type": "OBJECT",
                    "properties": properties,
                    "required": required,
                })
            }
        }
    }

    /// Check `value` against this schema. Unknown object members are allowed.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaViolation> {
        validate_value(value, self, "$")
    }
}

fn validate_value(
    value: &Value,
    schema: &SchemaDescriptor,
    path: &str,
) -> Result<(), SchemaViolation> {
    let matches = match schema {
        SchemaDescriptor::String => value.is_string(),
        SchemaDescriptor::Number => value.is_number(),
        SchemaDescriptor::Integer => value.is_i64() || value.is_u64(),
        SchemaDescriptor::Boolean => value.is_boolean(),
        SchemaDescriptor::Array(_) => value.is_array(),
        SchemaDescriptor::Object(_) => value.is_object(),
    };

    if !matches {
        return Err(SchemaViolation {
            path: path.to_string(),
            message: format!(
                "expected {}, found {}",
                schema.type_name(),
                json_type_name(value)
            ),
        });
    }

    match (schema, value) {
        (SchemaDescriptor::Array(items), Value::Array(elements)) => {
            for (index, element) in elements.iter().enumerate() {
                validate_value(element, items, &format!("{path}[{index}]"))?;
            }
        }
        (SchemaDescriptor::Object(fields), Value::Object(members)) => {
            for field in fields {
                let field_path = format!("{path}.{}", field.name);
                match members.get(&field.name) {
                    Some(Value::Null) | None if field.required => {
                        return Err(SchemaViolation {
                            path: field_path,
                            message: String::from("required field is missing"),
                        });
                    }
                    Some(Value::Null) | None => {}
                    Some(member) => validate_value(member, &field.schema, &field_path)?,
                }
            }
        }
        _ => {}
    }

    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
