//! aerostore - schema-driven record store
//!
//! A `Schema` declares fields, constraints and lifecycle hooks. A
//! `Resource` binds it to a `StorageAdapter` for records and a
//! `BlobStore` for attachment content, and runs every operation through
//! validation and hooks.
//!
//! ```ignore
//! let schema = Arc::new(Schema::from_definition("users", json!({
//!     "username": { "type": "string", "required": true, "index": { "unique": true } },
//! }))?);
//! let users = schema
//!     .resource(Arc::new(MemoryAdapter::new()), blobs, ResourceConfig::default())
//!     .await?;
//! let ada = users.create(doc, &Context::new()).await?;
//! ```

pub mod adapter;
pub mod blob;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod observability;
pub mod pagination;
pub mod record;
pub mod resource;
pub mod schema;

pub use adapter::{AdapterError, FileAdapter, MemoryAdapter, PostgresAdapter, QueryWindow, StorageAdapter};
pub use blob::{BlobError, BlobSource, BlobStore, ByteStream, LocalBlobStore, PgBlobStore};
pub use config::EngineConfig;
pub use context::Context;
pub use error::{ResourceError, ResourceResult};
pub use filter::Filter;
pub use pagination::{PageMeta, PageRequest};
pub use record::{Attachment, Document, Record};
pub use resource::{FindOptions, RecordSet, Resource, ResourceConfig};
pub use schema::{Event, FieldDef, FieldType, HookPayload, Phase, Schema, SchemaError};
