//! Shared helpers for the integration suites

#![allow(dead_code)]

use std::sync::Arc;

use aerostore::adapter::{FileAdapter, FileAdapterConfig};
use aerostore::blob::{LocalBlobConfig, LocalBlobStore};
use aerostore::{Document, MemoryAdapter, Resource, ResourceConfig, Schema, StorageAdapter};
use serde_json::{json, Value};
use tempfile::TempDir;

/// Unwraps a JSON object literal into a document
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

/// `{firstname: string, username: {type: string, index: {unique: true}}}`
pub fn people_schema() -> Schema {
    Schema::from_definition(
        "people",
        json!({
            "firstname": "string",
            "username": { "type": "string", "index": { "unique": true } }
        }),
    )
    .unwrap()
}

pub async fn blobs(dir: &TempDir) -> Arc<LocalBlobStore> {
    Arc::new(
        LocalBlobStore::open(LocalBlobConfig::new(dir.path().join("blobs")))
            .await
            .unwrap(),
    )
}

pub async fn memory_resource(schema: Schema, dir: &TempDir) -> Resource {
    Arc::new(schema)
        .resource(
            Arc::new(MemoryAdapter::new()),
            blobs(dir).await,
            ResourceConfig::default(),
        )
        .await
        .unwrap()
}

pub async fn file_adapter(dir: &TempDir, collection: &str) -> Arc<FileAdapter> {
    let config = FileAdapterConfig::new(dir.path().join("data"), collection).sync_writes(false);
    Arc::new(FileAdapter::open(config).await.unwrap())
}

pub async fn file_resource(schema: Schema, dir: &TempDir) -> Resource {
    let adapter: Arc<dyn StorageAdapter> = file_adapter(dir, schema.name()).await;
    Arc::new(schema)
        .resource(adapter, blobs(dir).await, ResourceConfig::default())
        .await
        .unwrap()
}
