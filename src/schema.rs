//! Schema definitions consumed by the registry, prompt builder, and validator.
//!
//! Schema files are a subset of JSON Schema: a top-level object type with
//! `$id`, `version`, `title`, ordered `properties`, `required`, and
//! `additionalProperties`. Property order in the file is the declaration
//! order used for prompts and for validation tie-breaks.
//!
//! ```
//! use schema_extract::schema::{FieldSpec, FieldType, SchemaDefinition};
//!
//! let w2 = SchemaDefinition::new("w2", "1.0")
//!     .with_field(FieldSpec::required("employer_name", FieldType::String))
//!     .with_field(FieldSpec::required("wages", FieldType::Number))
//!     .with_field(FieldSpec::optional("control_number", FieldType::String));
//! assert_eq!(w2.required_fields().count(), 2);
//! assert!(!w2.additional_properties);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Why a schema document could not be turned into a [`SchemaDefinition`].
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("cannot read schema source: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON schema: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "yaml")]
    #[error("malformed YAML schema: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("schema declares no `$id` and has no fallback identifier")]
    MissingId,

    #[error("schema '{0}' must have top-level type \"object\"")]
    RootNotObject(String),

    #[error("property '{name}': {source}")]
    InvalidProperty {
        name: String,
        source: serde_json::Error,
    },

    #[error("property '{name}': unknown type '{keyword}'")]
    UnknownType { name: String, keyword: String },

    #[error("required field '{0}' is not declared in properties")]
    UndeclaredRequired(String),

    #[error("unsupported schema file extension")]
    UnsupportedFormat,

    #[error("no schema files found")]
    NoSchemas,
}

/// A JSON type a field value may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
}

impl FieldType {
    /// Parse a JSON Schema type keyword.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            "null" => Some(Self::Null),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Null => "null",
        }
    }

    /// JSON Schema type semantics: `integer` accepts any number without a
    /// fractional part, `number` accepts every number.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => match value {
                Value::Number(n) => {
                    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
                }
                _ => false,
            },
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Null => value.is_null(),
        }
    }

    /// JSON type name of an arbitrary value, for error messages.
    pub fn name_of(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One declared field of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Allowed types. Empty means any JSON value is accepted.
    pub types: Vec<FieldType>,
    pub required: bool,
    pub description: Option<String>,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            types: vec![ty],
            required: true,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, ty)
        }
    }

    /// Also accept `null` for this field.
    pub fn nullable(mut self) -> Self {
        if !self.types.contains(&FieldType::Null) {
            self.types.push(FieldType::Null);
        }
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn accepts(&self, value: &Value) -> bool {
        self.types.is_empty() || self.types.iter().any(|t| t.matches(value))
    }

    /// Human-readable type list, e.g. `string | null`.
    pub fn type_label(&self) -> String {
        if self.types.is_empty() {
            return "any".to_string();
        }
        self.types
            .iter()
            .map(FieldType::keyword)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// An immutable, versioned document schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub id: String,
    pub version: String,
    pub title: Option<String>,
    /// Fields in declaration order.
    pub fields: Vec<FieldSpec>,
    /// When `false`, keys not declared in `fields` are rejected.
    pub additional_properties: bool,
    /// Classification hints (`x-keywords` in schema files).
    pub keywords: Vec<String>,
}

impl SchemaDefinition {
    /// Create an empty schema that rejects additional properties.
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            title: None,
            fields: Vec::new(),
            additional_properties: false,
            keywords: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_additional_properties(mut self, allowed: bool) -> Self {
        self.additional_properties = allowed;
        self
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }

    /// Deserialize a JSON Schema document.
    ///
    /// `fallback_id` is used when the document carries no `$id` (typically
    /// the file stem).
    pub fn from_json_str(source: &str, fallback_id: Option<&str>) -> Result<Self, SchemaError> {
        let raw: RawSchema = serde_json::from_str(source)?;
        raw.into_definition(fallback_id)
    }

    /// Deserialize a YAML rendition of the same document shape.
    #[cfg(feature = "yaml")]
    pub fn from_yaml_str(source: &str, fallback_id: Option<&str>) -> Result<Self, SchemaError> {
        let raw: RawSchema = serde_yaml::from_str(source)?;
        raw.into_definition(fallback_id)
    }
}

// --- On-disk shape ---

#[derive(Deserialize)]
struct RawSchema {
    #[serde(rename = "$id")]
    id: Option<String>,
    title: Option<String>,
    version: Option<RawVersion>,
    #[serde(rename = "type")]
    kind: Option<TypeDecl>,
    #[serde(default)]
    properties: serde_json::Map<String, Value>,
    #[serde(default)]
    required: Vec<String>,
    #[serde(rename = "additionalProperties", default = "default_additional")]
    additional_properties: bool,
    #[serde(rename = "x-keywords", default)]
    keywords: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawVersion {
    Text(String),
    Number(serde_json::Number),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TypeDecl {
    One(String),
    Many(Vec<String>),
}

impl TypeDecl {
    fn keywords(&self) -> Vec<&str> {
        match self {
            TypeDecl::One(k) => vec![k.as_str()],
            TypeDecl::Many(ks) => ks.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Deserialize)]
struct RawProperty {
    #[serde(rename = "type")]
    kind: Option<TypeDecl>,
    description: Option<String>,
}

// JSON Schema's own default for additionalProperties.
fn default_additional() -> bool {
    true
}

impl RawSchema {
    fn into_definition(self, fallback_id: Option<&str>) -> Result<SchemaDefinition, SchemaError> {
        let id = match (self.id, fallback_id) {
            (Some(id), _) if !id.trim().is_empty() => id,
            (_, Some(fallback)) => fallback.to_string(),
            _ => return Err(SchemaError::MissingId),
        };

        if let Some(ref kind) = self.kind {
            if kind.keywords() != ["object"] {
                return Err(SchemaError::RootNotObject(id));
            }
        }

        let version = match self.version {
            Some(RawVersion::Text(v)) => v,
            Some(RawVersion::Number(n)) => n.to_string(),
            None => "unversioned".to_string(),
        };

        let mut fields = Vec::with_capacity(self.properties.len());
        for (name, prop) in self.properties {
            let prop: RawProperty = match serde_json::from_value(prop) {
                Ok(prop) => prop,
                Err(source) => return Err(SchemaError::InvalidProperty { name, source }),
            };
            let types = match prop.kind {
                Some(decl) => decl
                    .keywords()
                    .into_iter()
                    .map(|k| {
                        FieldType::from_keyword(k).ok_or_else(|| SchemaError::UnknownType {
                            name: name.clone(),
                            keyword: k.to_string(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                None => Vec::new(),
            };
            fields.push(FieldSpec {
                required: self.required.contains(&name),
                name,
                types,
                description: prop.description,
            });
        }

        if let Some(missing) = self
            .required
            .iter()
            .find(|r| !fields.iter().any(|f| &f.name == *r))
        {
            return Err(SchemaError::UndeclaredRequired(missing.clone()));
        }

        Ok(SchemaDefinition {
            id,
            version,
            title: self.title,
            fields,
            additional_properties: self.additional_properties,
            keywords: self.keywords,
        })
    }
}
