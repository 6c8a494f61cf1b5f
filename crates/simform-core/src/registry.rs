#![forbid(unsafe_code)]

//! Named field types.
//!
//! Schemas refer to field types by name. The registry starts with the global
//! names every application shares (`Float`, `OptionalInteger`, ...) and grows
//! with parameterised types a schema declares in its `types` section, such as
//! an enum with its allowed values or a file field with a name filter.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::field_type::{ComputeSource, EnumEntry, FieldType, FilePattern};
use crate::schema::SchemaError;

/// Lookup table from type name to [`FieldType`].
#[derive(Debug, Clone)]
pub struct FieldTypeRegistry {
    types: HashMap<String, FieldType>,
}

impl Default for FieldTypeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FieldTypeRegistry {
    /// A registry holding only the global type names.
    #[must_use]
    pub fn builtin() -> Self {
        let globals = [
            ("String", FieldType::String { required: true }),
            ("OptionalString", FieldType::String { required: false }),
            ("Text", FieldType::String { required: false }),
            ("Float", FieldType::Float { required: true }),
            ("OptionalFloat", FieldType::Float { required: false }),
            ("Integer", FieldType::Integer { required: true }),
            ("OptionalInteger", FieldType::Integer { required: false }),
            ("Boolean", FieldType::Boolean { required: true }),
            ("OptionalBoolean", FieldType::Boolean { required: false }),
            (
                "File",
                FieldType::File {
                    required: true,
                    pattern: None,
                },
            ),
            (
                "OptionalFile",
                FieldType::File {
                    required: false,
                    pattern: None,
                },
            ),
        ];
        Self {
            types: globals
                .into_iter()
                .map(|(name, ty)| (name.to_string(), ty))
                .collect(),
        }
    }

    /// Look up a type by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldType> {
        self.types.get(name)
    }

    /// Number of registered names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Register a type under a name, replacing any previous definition.
    pub fn insert(&mut self, name: impl Into<String>, ty: FieldType) {
        self.types.insert(name.into(), ty);
    }

    /// Register a parameterised type built from a `base` kind and its config.
    ///
    /// Supported bases are `Enum` (`allowedValues: [[value, label], ...]`),
    /// `File` (optional `pattern`) and `StatefulComputeEnum` (`computeMethod`
    /// and `resultName`). All accept `isRequired` (default `true`).
    pub fn register_partial(
        &mut self,
        name: &str,
        base: &str,
        config: &Map<String, Value>,
    ) -> Result<(), SchemaError> {
        let required = match config.get("isRequired") {
            None => true,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(SchemaError::BadTypeConfig {
                    type_name: name.to_string(),
                    reason: format!("isRequired must be a boolean, got {other}"),
                });
            }
        };

        let ty = match base {
            "Enum" => FieldType::Enum {
                required,
                allowed: parse_allowed_values(name, config.get("allowedValues"))?,
            },
            "File" => {
                let pattern = match config.get("pattern") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(p)) => Some(FilePattern::new(p).map_err(|e| {
                        SchemaError::BadTypeConfig {
                            type_name: name.to_string(),
                            reason: format!("invalid file pattern: {e}"),
                        }
                    })?),
                    Some(other) => {
                        return Err(SchemaError::BadTypeConfig {
                            type_name: name.to_string(),
                            reason: format!("pattern must be a string, got {other}"),
                        });
                    }
                };
                FieldType::File { required, pattern }
            }
            "StatefulComputeEnum" => FieldType::StatefulComputeEnum {
                required,
                source: ComputeSource {
                    method: required_string(name, config, "computeMethod")?,
                    result_name: required_string(name, config, "resultName")?,
                },
            },
            other => {
                return Err(SchemaError::UnknownBase {
                    type_name: name.to_string(),
                    base: other.to_string(),
                });
            }
        };

        tracing::trace!(type_name = name, base, "registered partial field type");
        self.insert(name, ty);
        Ok(())
    }
}

fn parse_allowed_values(name: &str, raw: Option<&Value>) -> Result<Vec<EnumEntry>, SchemaError> {
    let bad = |reason: String| SchemaError::BadTypeConfig {
        type_name: name.to_string(),
        reason,
    };
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let Value::Array(items) = raw else {
        return Err(bad(format!("allowedValues must be a list, got {raw}")));
    };

    items
        .iter()
        .map(|item| match item.as_array().map(Vec::as_slice) {
            Some([value, label]) => {
                let value = scalar_text(value)
                    .ok_or_else(|| bad(format!("enum value must be a scalar, got {value}")))?;
                let label = scalar_text(label)
                    .ok_or_else(|| bad(format!("enum label must be a scalar, got {label}")))?;
                Ok(EnumEntry::new(value, label))
            }
            _ => Err(bad(format!(
                "allowedValues entries must be [value, label], got {item}"
            ))),
        })
        .collect()
}

fn required_string(name: &str, config: &Map<String, Value>, key: &str) -> Result<String, SchemaError> {
    match config.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        other => Err(SchemaError::BadTypeConfig {
            type_name: name.to_string(),
            reason: format!(
                "{key} must be a non-empty string, got {}",
                other.map_or_else(|| "nothing".to_string(), Value::to_string)
            ),
        }),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    crate::field_type::value_text(value).map(|t| t.into_owned())
}
