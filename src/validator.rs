//! Strict validation of parsed LLM output against a [`SchemaDefinition`].
//!
//! Rules are applied in a fixed order and the first violation is returned:
//!
//! 0. the root value must be a JSON object
//! 1. no keys beyond the declared fields (unless the schema allows them)
//! 2. every required field is present
//! 3. every present declared field has a conforming type
//!
//! Rules 2 and 3 walk fields in declaration order, so the reported
//! violation is deterministic.

use crate::schema::{FieldType, SchemaDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Which validation rule was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationRule {
    RootNotObject,
    ExtraField,
    MissingRequired,
    TypeMismatch,
}

impl fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValidationRule::RootNotObject => "root-not-object",
            ValidationRule::ExtraField => "extra-field",
            ValidationRule::MissingRequired => "missing-required",
            ValidationRule::TypeMismatch => "type-mismatch",
        })
    }
}

/// The first schema violation found in a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("schema '{schema_id}' validation failed ({rule}): {detail}")]
pub struct ValidationError {
    pub schema_id: String,
    pub rule: ValidationRule,
    /// Offending field, if the rule concerns one.
    pub field: Option<String>,
    pub detail: String,
}

/// A structured value proven to conform to a schema.
///
/// Only [`validate`] constructs this type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedValue {
    schema_id: String,
    schema_version: String,
    fields: Map<String, Value>,
}

impl ValidatedValue {
    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Clone the fields back into a plain JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

/// Validate `value` against `schema`.
///
/// # Errors
///
/// Returns the first [`ValidationError`] found, in rule order.
pub fn validate(value: &Value, schema: &SchemaDefinition) -> Result<ValidatedValue, ValidationError> {
    let violation = |rule, field: Option<&str>, detail: String| ValidationError {
        schema_id: schema.id.clone(),
        rule,
        field: field.map(str::to_string),
        detail,
    };

    let object = match value {
        Value::Object(map) => map,
        other => {
            return Err(violation(
                ValidationRule::RootNotObject,
                None,
                format!("expected a JSON object, got {}", FieldType::name_of(other)),
            ))
        }
    };

    if !schema.additional_properties {
        if let Some(extra) = object.keys().find(|k| schema.field(k).is_none()) {
            return Err(violation(
                ValidationRule::ExtraField,
                Some(extra.as_str()),
                format!("property '{}' is not declared by the schema", extra),
            ));
        }
    }

    if let Some(missing) = schema
        .required_fields()
        .find(|f| !object.contains_key(&f.name))
    {
        return Err(violation(
            ValidationRule::MissingRequired,
            Some(missing.name.as_str()),
            format!("required property '{}' is missing", missing.name),
        ));
    }

    for spec in &schema.fields {
        if let Some(v) = object.get(&spec.name) {
            if !spec.accepts(v) {
                return Err(violation(
                    ValidationRule::TypeMismatch,
                    Some(spec.name.as_str()),
                    format!(
                        "property '{}' should be {}, got {}",
                        spec.name,
                        spec.type_label(),
                        FieldType::name_of(v)
                    ),
                ));
            }
        }
    }

    Ok(ValidatedValue {
        schema_id: schema.id.clone(),
        schema_version: schema.version.clone(),
        fields: object.clone(),
    })
}
