//! Declared argument contracts for registered tools.
//!
//! A schema lists the fields a tool understands, whether each is required,
//! and the JSON type it must have. Fields not listed pass through untouched;
//! the argument payload stays opaque beyond what the tool declares.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// JSON type a declared field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// A JSON string.
    String,
    /// A JSON number without a fractional part.
    Integer,
    /// Any JSON number.
    Number,
    /// `true` or `false`.
    Boolean,
    /// A JSON array.
    Array,
    /// A JSON object.
    Object,
    /// A string, or an array whose elements are all strings.
    StringOrArray,
    /// Anything except `null`.
    Any,
}

impl FieldType {
    /// Whether `value` has this type.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::StringOrArray => match value {
                Value::String(_) => true,
                Value::Array(items) => items.iter().all(Value::is_string),
                _ => false,
            },
            Self::Any => !value.is_null(),
        }
    }

    /// Lowercase type name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::StringOrArray => "string or array of strings",
            Self::Any => "any",
        }
    }

    fn json_schema(self) -> Value {
        match self {
            Self::StringOrArray => json!({
                "anyOf": [
                    {"type": "string"},
                    {"type": "array", "items": {"type": "string"}},
                ]
            }),
            Self::Any => json!({}),
            other => json!({"type": other.as_str()}),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Expected type.
    pub field_type: FieldType,
    /// Whether the field must be present.
    pub required: bool,
}

/// Why an argument payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    /// The payload is not a JSON object.
    #[error("arguments must be a JSON object, got {found}")]
    NotAnObject {
        /// JSON type that was supplied.
        found: &'static str,
    },
    /// A required field is absent (or `null`).
    #[error("missing required field '{0}'")]
    MissingField(String),
    /// A field has the wrong JSON type.
    #[error("field '{field}' must be {expected}, got {found}")]
    WrongType {
        /// Field name.
        field: String,
        /// Declared type.
        expected: FieldType,
        /// JSON type that was supplied.
        found: &'static str,
    },
}

/// The argument contract of a tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentSchema {
    fields: BTreeMap<String, FieldSpec>,
}

impl ArgumentSchema {
    /// An empty schema that accepts any object.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a required field.
    #[must_use]
    pub fn required(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                field_type,
                required: true,
            },
        );
        self
    }

    /// Declare an optional field.
    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                field_type,
                required: false,
            },
        );
        self
    }

    /// Look up a declared field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    /// Check `arguments` against the declared fields.
    ///
    /// Fields are checked in name order, so the reported violation is
    /// stable for a given payload.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaViolation`] found.
    pub fn validate(&self, arguments: &Value) -> Result<(), SchemaViolation> {
        let Some(object) = arguments.as_object() else {
            return Err(SchemaViolation::NotAnObject {
                found: json_type(arguments),
            });
        };

        for (name, spec) in &self.fields {
            match object.get(name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(SchemaViolation::MissingField(name.clone()));
                    }
                },
                Some(value) => {
                    if !spec.field_type.matches(value) {
                        return Err(SchemaViolation::WrongType {
                            field: name.clone(),
                            expected: spec.field_type,
                            found: json_type(value),
                        });
                    }
                },
            }
        }
        Ok(())
    }

    /// Render as a JSON Schema object for the model-facing tool list.
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, spec)| (name.clone(), spec.field_type.json_schema()))
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
