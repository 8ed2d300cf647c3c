//! Store configuration: lid prefix and the relationship schema, read from TOML.
//!
//! ```toml
//! lid_prefix = "@lid"
//!
//! [types.post.relationships.comments]
//! kind = "has-many"
//! type = "comment"
//! inverse = "post"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tether_kernel::{DEFAULT_LID_PREFIX, RelationshipDefinition, Schema, TypeDefinition};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read file: {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid toml at {path}: {source}")]
    ParseToml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default = "default_lid_prefix")]
    pub lid_prefix: String,
    #[serde(default)]
    pub types: BTreeMap<String, TypeDefinition>,
}

fn default_lid_prefix() -> String {
    DEFAULT_LID_PREFIX.to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lid_prefix: default_lid_prefix(),
            types: BTreeMap::new(),
        }
    }
}

impl StoreConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text, "<inline>")
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: display.clone(),
            source,
        })?;
        Self::parse(&text, &display)
    }

    fn parse(text: &str, path: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::ParseToml {
            path: path.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Declare one relationship field. Types mentioned on either side are
    /// declared as well.
    pub fn with_relationship(
        mut self,
        owner_type: &str,
        name: &str,
        definition: RelationshipDefinition,
    ) -> Self {
        self.types
            .entry(definition.related_type.clone())
            .or_default();
        self.types
            .entry(owner_type.to_string())
            .or_default()
            .relationships
            .insert(name.to_string(), definition);
        self
    }

    /// Every relationship must point at a declared type. Inverse problems
    /// are not errors here: the schema degrades them to implicit tracking.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lid_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("lid_prefix must not be empty".to_string()));
        }
        for (owner_type, definition) in &self.types {
            for (name, field) in &definition.relationships {
                if !self.types.contains_key(&field.related_type) {
                    return Err(ConfigError::Invalid(format!(
                        "{owner_type}.{name} relates to undeclared type `{}`",
                        field.related_type
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn schema(&self) -> Schema {
        Schema::new(&self.types)
    }
}
