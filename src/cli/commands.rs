//! CLI command implementations
//!
//! Every command loads the config, boots the resource and runs to
//! completion. Command functions return the `data` of the response;
//! `run_command` prints it.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::adapter::{FileAdapter, MemoryAdapter, PostgresAdapter, StorageAdapter};
use crate::blob::{BlobStore, LocalBlobStore, PgBlobStore};
use crate::config::{Backend, EngineConfig};
use crate::context::Context;
use crate::error::ResourceError;
use crate::filter::Filter;
use crate::record::Document;
use crate::resource::{FindOptions, Resource};
use crate::schema::{AdditionalProperties, Schema, SchemaFile};

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};
use super::io::{read_request, write_response};

/// Request read by `find`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FindRequest {
    pub query: Document,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

impl FindRequest {
    fn options(&self) -> FindOptions {
        FindOptions {
            page: self.page,
            page_size: self.page_size,
            skip_computation: false,
        }
    }
}

/// A booted resource, plus the file log when that is the backend
struct Store {
    resource: Resource,
    log: Option<Arc<FileAdapter>>,
}

/// Parse args and run the command
pub async fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    run_command(cli.command).await
}

/// Run the command and print its response
pub async fn run_command(cmd: Command) -> CliResult<()> {
    let data = match cmd {
        Command::Init { config } => init(&EngineConfig::load(&config)?).await?,
        Command::Create { config } => {
            let config = EngineConfig::load(&config)?;
            create(&config, read_request()?).await?
        }
        Command::Get { config, id } => get(&EngineConfig::load(&config)?, &id).await?,
        Command::Find { config } => {
            let config = EngineConfig::load(&config)?;
            find(&config, read_request()?).await?
        }
        Command::Count { config } => count(&EngineConfig::load(&config)?).await?,
        Command::Drop { config } => drop_all(&EngineConfig::load(&config)?).await?,
        Command::Compact { config } => compact(&EngineConfig::load(&config)?).await?,
    };
    write_response(data)
}

/// Prepare storage for the configured collection
pub async fn init(config: &EngineConfig) -> CliResult<Value> {
    if config.backend == Backend::File && is_initialized(config) {
        return Err(CliError::already_initialized());
    }
    let store = boot(config, true).await?;
    Ok(json!({
        "initialized": true,
        "backend": store.resource.adapter().backend(),
        "collection": config.collection,
    }))
}

pub async fn create(config: &EngineConfig, request: Value) -> CliResult<Value> {
    let input = match request {
        Value::Object(doc) => doc,
        _ => return Err(CliError::io_error("Expected a JSON object")),
    };
    let store = boot(config, false).await?;
    let record = store.resource.create(input, &Context::new()).await?;
    Ok(serde_json::to_value(record)?)
}

pub async fn get(config: &EngineConfig, id: &str) -> CliResult<Value> {
    let store = boot(config, false).await?;
    let record = store
        .resource
        .get(id)
        .await?
        .ok_or_else(|| ResourceError::not_found(format!("record '{}'", id)))?;
    Ok(serde_json::to_value(record)?)
}

pub async fn find(config: &EngineConfig, request: Value) -> CliResult<Value> {
    let request: FindRequest = serde_json::from_value(request)?;
    let store = boot(config, false).await?;
    let result = store
        .resource
        .find(
            Filter::from(request.query.clone()),
            &request.options(),
            &Context::new(),
        )
        .await?;
    Ok(serde_json::to_value(result)?)
}

pub async fn count(config: &EngineConfig) -> CliResult<Value> {
    let store = boot(config, false).await?;
    let count = store.resource.count(Filter::new(), &Context::new()).await?;
    Ok(json!({ "count": count }))
}

pub async fn drop_all(config: &EngineConfig) -> CliResult<Value> {
    let store = boot(config, false).await?;
    let removed = store.resource.drop().await?;
    Ok(json!({ "removed": removed }))
}

pub async fn compact(config: &EngineConfig) -> CliResult<Value> {
    let store = boot(config, false).await?;
    let log = store.log.ok_or_else(|| {
        CliError::config_error("compact is only supported by the file backend")
    })?;
    let report = log.compact().await.map_err(ResourceError::from)?;
    Ok(json!({
        "records": report.records,
        "bytes_before": report.bytes_before,
        "bytes_after": report.bytes_after,
    }))
}

fn is_initialized(config: &EngineConfig) -> bool {
    config.file_adapter_config().log_path().exists()
}

fn load_schema(config: &EngineConfig) -> CliResult<Arc<Schema>> {
    let schema = match &config.schema {
        Some(path) => SchemaFile::load(path)
            .map_err(ResourceError::from)?
            .into_builder()
            .build(),
        None => Schema::builder(config.collection.as_str())
            .additional_properties(AdditionalProperties::Allow)
            .build(),
    };
    Ok(Arc::new(schema.map_err(ResourceError::from)?))
}

/// Opens adapter, blob store and resource for `config`
///
/// Unless `initializing`, the file backend must already have a log.
async fn boot(config: &EngineConfig, initializing: bool) -> CliResult<Store> {
    let schema = load_schema(config)?;

    let (adapter, blobs, log): (Arc<dyn StorageAdapter>, Arc<dyn BlobStore>, Option<Arc<FileAdapter>>) =
        match config.backend {
            Backend::File => {
                if !initializing && !is_initialized(config) {
                    return Err(CliError::not_initialized());
                }
                let log = Arc::new(
                    FileAdapter::open(config.file_adapter_config())
                        .await
                        .map_err(|e| CliError::boot_failed(format!("Record log open failed: {}", e)))?,
                );
                (log.clone() as Arc<dyn StorageAdapter>, local_blobs(config).await?, Some(log))
            }
            Backend::Memory => (
                Arc::new(MemoryAdapter::new()) as Arc<dyn StorageAdapter>,
                local_blobs(config).await?,
                None,
            ),
            Backend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| CliError::config_error("database_url is required"))?;
                let adapter = PostgresAdapter::connect(url, config.max_connections, &config.collection)
                    .await
                    .map_err(|e| CliError::boot_failed(format!("Database open failed: {}", e)))?;
                let blobs = PgBlobStore::with_pool(
                    adapter.pool().clone(),
                    &format!("{}_blobs", config.collection),
                )
                .await
                .map_err(|e| CliError::boot_failed(format!("Blob store open failed: {}", e)))?
                .with_chunk_size(config.blob_chunk_size);
                (
                    Arc::new(adapter) as Arc<dyn StorageAdapter>,
                    Arc::new(blobs) as Arc<dyn BlobStore>,
                    None,
                )
            }
        };

    let resource = Resource::open(schema, adapter, blobs, config.resource_config()).await?;
    Ok(Store { resource, log })
}

async fn local_blobs(config: &EngineConfig) -> CliResult<Arc<dyn BlobStore>> {
    let store = LocalBlobStore::open(config.local_blob_config())
        .await
        .map_err(|e| CliError::boot_failed(format!("Blob store open failed: {}", e)))?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_config(dir: &TempDir) -> EngineConfig {
        let mut config = EngineConfig::new(dir.path(), "users");
        config.sync_writes = false;
        config
    }

    #[tokio::test]
    async fn test_commands_require_init() {
        let dir = TempDir::new().unwrap();
        let err = count(&file_config(&dir)).await.unwrap_err();
        assert_eq!(err.code_str(), "CLI_NOT_INITIALIZED");
    }

    #[tokio::test]
    async fn test_init_twice_fails() {
        let dir = TempDir::new().unwrap();
        let config = file_config(&dir);
        assert_eq!(init(&config).await.unwrap()["initialized"], true);
        let err = init(&config).await.unwrap_err();
        assert_eq!(err.code_str(), "CLI_ALREADY_INITIALIZED");
    }

    #[tokio::test]
    async fn test_create_find_and_compact() {
        let dir = TempDir::new().unwrap();
        let config = file_config(&dir);
        init(&config).await.unwrap();

        for name in ["ada", "grace", "edsger"] {
            create(&config, json!({ "name": name })).await.unwrap();
        }
        let created = create(&config, json!({ "name": "barbara" })).await.unwrap();
        let id = created["_id"].as_str().unwrap().to_string();

        let found = find(&config, json!({ "query": { "name": "grace" } })).await.unwrap();
        assert_eq!(found["records"].as_array().unwrap().len(), 1);

        let page = find(&config, json!({ "page": 2, "page_size": 3 })).await.unwrap();
        assert_eq!(page["records"].as_array().unwrap().len(), 1);
        assert_eq!(page["meta"]["totalPages"], 2);

        assert_eq!(get(&config, &id).await.unwrap()["name"], "barbara");
        assert_eq!(count(&config).await.unwrap()["count"], 4);

        let report = compact(&config).await.unwrap();
        assert_eq!(report["records"], 4);

        assert_eq!(drop_all(&config).await.unwrap()["removed"], 4);
        assert_eq!(count(&config).await.unwrap()["count"], 0);
    }

    #[tokio::test]
    async fn test_get_missing_record() {
        let dir = TempDir::new().unwrap();
        let config = file_config(&dir);
        init(&config).await.unwrap();
        let err = get(&config, "missing").await.unwrap_err();
        assert_eq!(err.code_str(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_compact_needs_file_backend() {
        let dir = TempDir::new().unwrap();
        let mut config = file_config(&dir);
        config.backend = Backend::Memory;
        let err = compact(&config).await.unwrap_err();
        assert_eq!(err.code_str(), "CLI_CONFIG_ERROR");
    }

    #[tokio::test]
    async fn test_find_rejects_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let config = file_config(&dir);
        init(&config).await.unwrap();
        assert!(find(&config, json!({ "filter": {} })).await.is_err());
    }
}
