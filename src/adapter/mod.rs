//! Storage adapter subsystem
//!
//! `StorageAdapter` is the contract a backend implements to hold the
//! records of one collection. Resources depend only on this trait.
//!
//! Contract highlights:
//! - `insert` assigns `_id` (UUID v4) and starts with no attachments
//! - `insert` and `update` reject unique-index collisions with
//!   `AdapterError::UniqueConstraint`; the check and the write are atomic
//!   with respect to other writers on the same adapter
//! - `query` and `stream_query` return records in adapter-native order,
//!   which is stable between calls
//! - `stream_query` produces records lazily and never reads ahead of the
//!   consumer
//!
//! Reference backends:
//! - `MemoryAdapter`: process-local, nothing persisted
//! - `FileAdapter`: append-only checksummed log on local disk
//! - `PostgresAdapter`: JSONB table with native unique indexes

mod collection;
mod errors;
mod file;
mod frame;
mod memory;
mod postgres;

pub use errors::{AdapterError, AdapterResult};
pub use file::{CompactionReport, FileAdapter, FileAdapterConfig};
pub use memory::MemoryAdapter;
pub use postgres::PostgresAdapter;
pub(crate) use postgres::is_sql_identifier;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::filter::Filter;
use crate::record::{Document, Record};

/// Lazy sequence of records
pub type RecordStream<'a> = BoxStream<'a, AdapterResult<Record>>;

/// Slice of a query result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryWindow {
    /// Matching records to pass over first
    pub skip: u64,
    /// Maximum number of records to return, unbounded when `None`
    pub limit: Option<u64>,
}

impl QueryWindow {
    /// Every matching record
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(skip: u64, limit: u64) -> Self {
        Self {
            skip,
            limit: Some(limit),
        }
    }
}

/// Backend holding the records of one collection
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Backend name for diagnostics
    fn backend(&self) -> &'static str;

    /// Stores a new record built from `fields`, assigning its `_id`
    async fn insert(&self, fields: Document) -> AdapterResult<Record>;

    /// Looks up a record by `_id`
    async fn find_by_id(&self, id: &str) -> AdapterResult<Option<Record>>;

    /// Records matching `filter`, restricted to `window`
    async fn query(&self, filter: &Filter, window: QueryWindow) -> AdapterResult<Vec<Record>>;

    /// Number of records matching `filter`
    async fn count(&self, filter: &Filter) -> AdapterResult<u64>;

    /// Replaces the stored record with the same `_id`
    ///
    /// Fails with `AdapterError::NotFound` if no such record exists.
    async fn update(&self, record: &Record) -> AdapterResult<()>;

    /// Deletes a record; returns whether it existed
    async fn delete(&self, id: &str) -> AdapterResult<bool>;

    /// Deletes every record matching `filter`; returns how many went
    async fn delete_all(&self, filter: &Filter) -> AdapterResult<u64>;

    /// Enforces uniqueness of `field` from now on
    ///
    /// Idempotent. Fails with `AdapterError::UniqueConstraint` when stored
    /// records already collide on `field`.
    async fn ensure_unique_index(&self, field: &str) -> AdapterResult<()>;

    /// Streams the records matching `filter`, one per poll
    fn stream_query(&self, filter: Filter) -> RecordStream<'_>;
}

/// Fresh record identifier
pub(crate) fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
