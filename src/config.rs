//! Engine configuration
//!
//! A JSON file read once at startup:
//!
//! ```json
//! {
//!   "data_dir": "./data",
//!   "collection": "users",
//!   "backend": "file",
//!   "schema": "./users.schema.json"
//! }
//! ```
//!
//! Only `data_dir` and `collection` are required. The typed configs of
//! the individual components are derived from it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapter::FileAdapterConfig;
use crate::blob::{LocalBlobConfig, DEFAULT_CHUNK_SIZE};
use crate::resource::{ResourceConfig, DEFAULT_PAGE_SIZE};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {reason}")]
    Read { path: String, reason: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Storage backend records are kept in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    File,
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root directory for the file backend and local blobs
    pub data_dir: PathBuf,

    /// Collection name, also the table name on postgres
    pub collection: String,

    /// Blob directory (default: `<data_dir>/blobs`)
    #[serde(default)]
    pub blob_dir: Option<PathBuf>,

    #[serde(default)]
    pub backend: Backend,

    /// Connection string, required by the postgres backend
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// fsync the record log after every write (default: true)
    #[serde(default = "default_sync_writes")]
    pub sync_writes: bool,

    #[serde(default = "default_page_size")]
    pub default_page_size: u64,

    #[serde(default = "default_blob_chunk_size")]
    pub blob_chunk_size: usize,

    /// Path to a schema file; records are schemaless when absent
    #[serde(default)]
    pub schema: Option<PathBuf>,
}

fn default_max_connections() -> u32 {
    5
}
fn default_sync_writes() -> bool {
    true
}
fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}
fn default_blob_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl EngineConfig {
    /// Minimal config for the file backend
    pub fn new(data_dir: impl Into<PathBuf>, collection: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            collection: collection.into(),
            blob_dir: None,
            backend: Backend::default(),
            database_url: None,
            max_connections: default_max_connections(),
            sync_writes: default_sync_writes(),
            default_page_size: default_page_size(),
            blob_chunk_size: default_blob_chunk_size(),
            schema: None,
        }
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config = Self::parse(&content)?;

        // relative paths in the file are relative to the file
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(config.rebase(base))
    }

    /// Parse and validate config content
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| ConfigError::Invalid(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn rebase(mut self, base: &Path) -> Self {
        let join = |p: PathBuf| if p.is_relative() { base.join(p) } else { p };
        self.data_dir = join(self.data_dir);
        self.blob_dir = self.blob_dir.map(join);
        self.schema = self.schema.map(join);
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.collection.is_empty() {
            return Err(ConfigError::Invalid("collection must not be empty".into()));
        }
        if self.default_page_size == 0 {
            return Err(ConfigError::Invalid("default_page_size must be > 0".into()));
        }
        if self.blob_chunk_size == 0 {
            return Err(ConfigError::Invalid("blob_chunk_size must be > 0".into()));
        }
        if self.backend == Backend::Postgres {
            if self.database_url.is_none() {
                return Err(ConfigError::Invalid(
                    "database_url is required when backend is 'postgres'".into(),
                ));
            }
            if self.max_connections == 0 {
                return Err(ConfigError::Invalid("max_connections must be > 0".into()));
            }
        }
        Ok(())
    }

    pub fn blob_path(&self) -> PathBuf {
        self.blob_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("blobs"))
    }

    pub fn resource_config(&self) -> ResourceConfig {
        ResourceConfig {
            default_page_size: self.default_page_size,
        }
    }

    pub fn file_adapter_config(&self) -> FileAdapterConfig {
        FileAdapterConfig::new(&self.data_dir, &self.collection).sync_writes(self.sync_writes)
    }

    pub fn local_blob_config(&self) -> LocalBlobConfig {
        let mut config = LocalBlobConfig::new(self.blob_path());
        config.chunk_size = self.blob_chunk_size;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::parse(r#"{ "data_dir": "/srv/data", "collection": "users" }"#)
            .unwrap();
        assert_eq!(config.backend, Backend::File);
        assert!(config.sync_writes);
        assert_eq!(config.default_page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.blob_path(), PathBuf::from("/srv/data/blobs"));
        assert_eq!(config.resource_config(), ResourceConfig::default());
    }

    #[test]
    fn test_postgres_requires_url() {
        let err = EngineConfig::parse(
            r#"{ "data_dir": "d", "collection": "users", "backend": "postgres" }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("database_url"));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(EngineConfig::parse(
            r#"{ "data_dir": "d", "collection": "users", "backend": "mongo" }"#
        )
        .is_err());
    }

    #[test]
    fn test_zero_page_size_rejected() {
        assert!(EngineConfig::parse(
            r#"{ "data_dir": "d", "collection": "users", "default_page_size": 0 }"#
        )
        .is_err());
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("aerostore.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{ "data_dir": "data", "collection": "users", "schema": "users.json" }}"#
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, dir.path().join("data"));
        assert_eq!(config.schema, Some(dir.path().join("users.json")));
    }

    #[test]
    fn test_missing_file() {
        let err = EngineConfig::load(Path::new("/nonexistent/aerostore.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
