//! Process-local adapter
//!
//! Nothing is persisted. Useful for tests and for resources whose data
//! is rebuilt on every start.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::RwLock;

use super::collection::Collection;
use super::errors::{AdapterError, AdapterResult};
use super::{new_record_id, QueryWindow, RecordStream, StorageAdapter};
use crate::filter::Filter;
use crate::record::{Document, Record};

/// In-memory storage adapter
#[derive(Default)]
pub struct MemoryAdapter {
    collection: RwLock<Collection>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, fields: Document) -> AdapterResult<Record> {
        let record = Record::new(new_record_id(), fields);
        self.collection.write().await.put(record.clone())?;
        Ok(record)
    }

    async fn find_by_id(&self, id: &str) -> AdapterResult<Option<Record>> {
        Ok(self.collection.read().await.get(id).cloned())
    }

    async fn query(&self, filter: &Filter, window: QueryWindow) -> AdapterResult<Vec<Record>> {
        Ok(self.collection.read().await.query(filter, window))
    }

    async fn count(&self, filter: &Filter) -> AdapterResult<u64> {
        Ok(self.collection.read().await.count(filter))
    }

    async fn update(&self, record: &Record) -> AdapterResult<()> {
        let mut collection = self.collection.write().await;
        if !collection.contains(&record.id) {
            return Err(AdapterError::NotFound(record.id.clone()));
        }
        collection.put(record.clone())
    }

    async fn delete(&self, id: &str) -> AdapterResult<bool> {
        Ok(self.collection.write().await.remove(id).is_some())
    }

    async fn delete_all(&self, filter: &Filter) -> AdapterResult<u64> {
        let mut collection = self.collection.write().await;
        let ids = collection.matching_ids(filter);
        for id in &ids {
            collection.remove(id);
        }
        Ok(ids.len() as u64)
    }

    async fn ensure_unique_index(&self, field: &str) -> AdapterResult<()> {
        self.collection.write().await.ensure_unique(field)
    }

    fn stream_query(&self, filter: Filter) -> RecordStream<'_> {
        stream::unfold((filter, None::<u64>), move |(filter, after)| async move {
            let next = self.collection.read().await.next_after(&filter, after);
            next.map(|(seq, record)| (Ok(record), (filter, Some(seq))))
        })
        .boxed()
    }
}
