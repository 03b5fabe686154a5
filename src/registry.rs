//! Process-wide, read-only mapping from schema identifier to definition.
//!
//! Built once at startup (typically from a directory of schema files) and
//! shared as `Arc<SchemaRegistry>`. No method takes `&mut self`, so
//! concurrent pipeline runs read it without coordination.

use crate::error::{PipelineError, Result};
use crate::schema::{SchemaDefinition, SchemaError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Immutable schema registry.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Arc<SchemaDefinition>>,
}

impl SchemaRegistry {
    /// Load every schema file in `dir`.
    ///
    /// Files are read in sorted path order. `*.json` files are always
    /// considered; `*.yaml` / `*.yml` files too when the `yaml` feature is
    /// enabled. Other files are ignored.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::RegistryLoad`] if the directory cannot be read, a
    ///   file is malformed, or no schema files are found.
    /// - [`PipelineError::DuplicateSchema`] if two files declare the same id.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::RegistryLoad {
            path: dir.to_path_buf(),
            source: e.into(),
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && schema_format(p).is_some())
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(PipelineError::RegistryLoad {
                path: dir.to_path_buf(),
                source: SchemaError::NoSchemas,
            });
        }

        let mut registry = Self::default();
        let mut origins: BTreeMap<String, PathBuf> = BTreeMap::new();

        for path in paths {
            let definition = read_schema_file(&path)?;
            if let Some(first) = origins.get(&definition.id) {
                return Err(PipelineError::DuplicateSchema {
                    id: definition.id.clone(),
                    first: first.display().to_string(),
                    second: path.display().to_string(),
                });
            }
            tracing::debug!(schema_id = %definition.id, version = %definition.version, path = %path.display(), "schema loaded");
            origins.insert(definition.id.clone(), path);
            registry
                .schemas
                .insert(definition.id.clone(), Arc::new(definition));
        }

        tracing::info!(count = registry.len(), dir = %dir.display(), "schema registry ready");
        Ok(registry)
    }

    /// Build a registry from in-memory definitions.
    ///
    /// # Errors
    ///
    /// [`PipelineError::DuplicateSchema`] if two definitions share an id.
    pub fn from_definitions(definitions: impl IntoIterator<Item = SchemaDefinition>) -> Result<Self> {
        let mut registry = Self::default();
        for definition in definitions {
            if registry.schemas.contains_key(&definition.id) {
                return Err(PipelineError::DuplicateSchema {
                    id: definition.id.clone(),
                    first: format!("definition '{}'", definition.id),
                    second: format!("definition '{}'", definition.id),
                });
            }
            registry
                .schemas
                .insert(definition.id.clone(), Arc::new(definition));
        }
        Ok(registry)
    }

    /// Fetch a schema by identifier.
    ///
    /// # Errors
    ///
    /// [`PipelineError::UnknownSchema`] if the id is not registered.
    pub fn lookup(&self, id: &str) -> Result<Arc<SchemaDefinition>> {
        self.schemas
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownSchema(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.schemas.contains_key(id)
    }

    /// Registered identifiers in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SchemaDefinition> {
        self.schemas.values().map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchemaFormat {
    Json,
    #[cfg(feature = "yaml")]
    Yaml,
}

fn schema_format(path: &Path) -> Option<SchemaFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Some(SchemaFormat::Json),
        #[cfg(feature = "yaml")]
        Some("yaml") | Some("yml") => Some(SchemaFormat::Yaml),
        _ => None,
    }
}

fn read_schema_file(path: &Path) -> Result<SchemaDefinition> {
    let load_err = |source: SchemaError| PipelineError::RegistryLoad {
        path: path.to_path_buf(),
        source,
    };

    let source = std::fs::read_to_string(path).map_err(|e| load_err(e.into()))?;
    let stem = path.file_stem().and_then(|s| s.to_str());

    let parsed = match schema_format(path) {
        Some(SchemaFormat::Json) => SchemaDefinition::from_json_str(&source, stem),
        #[cfg(feature = "yaml")]
        Some(SchemaFormat::Yaml) => SchemaDefinition::from_yaml_str(&source, stem),
        None => Err(SchemaError::UnsupportedFormat),
    };
    parsed.map_err(load_err)
}
