//! Schema loader for declarative schema files
//!
//! A schema file is a JSON document:
//!
//! ```json
//! {
//!   "name": "users",
//!   "additionalProperties": "reject",
//!   "fields": {
//!     "firstname": "string",
//!     "username": { "type": "string", "index": { "unique": true } }
//!   }
//! }
//! ```
//!
//! Loading yields a `SchemaBuilder` so callers can still bind computed
//! field functions before building.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use super::builder::SchemaBuilder;
use super::errors::{SchemaError, SchemaResult};
use super::types::AdditionalProperties;

/// On-disk shape of a schema file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SchemaFile {
    pub name: String,

    #[serde(default)]
    pub additional_properties: AdditionalProperties,

    pub fields: Value,
}

impl SchemaFile {
    /// Reads and parses a schema file
    pub fn load(path: &Path) -> SchemaResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SchemaError::invalid(path.display().to_string(), format!("failed to read file: {}", e))
        })?;
        Self::parse(&content)
            .map_err(|e| SchemaError::invalid(path.display().to_string(), e.to_string()))
    }

    /// Parses schema file content
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Turns the file into a builder
    pub fn into_builder(self) -> SchemaBuilder {
        SchemaBuilder::new(self.name)
            .definition(self.fields)
            .additional_properties(self.additional_properties)
    }
}
