//! Resource operations
//!
//! A `Resource` binds one schema to one storage adapter and one blob
//! store. It is the only write path for its collection: every write is
//! validated first and wrapped in the schema's hooks.
//!
//! Hook order per operation:
//!
//! | operation        | hooks                                                             |
//! |------------------|-------------------------------------------------------------------|
//! | create           | validate, create before, save before, write, save after, create after |
//! | merge_one        | update before, validate, save before, write, save after, update after |
//! | find, find_one   | find before, query, find after                                    |
//! | count, each      | find before                                                       |
//! | remove_one       | remove before, delete, remove after                               |
//! | attach, delete_attachment | save before, write, save after                           |
//!
//! Computed fields are resolved last, on the copy handed to the caller.
//!
//! Validation runs before the `create` and `save` before hooks, and what
//! those hooks change is stored without being validated again. Hooks are
//! trusted code; a record they rewrite is only as valid as they keep it.
//!
//! Operations that read a record, change it and write it back
//! (`merge_one`, `attach`, `delete_attachment`, `remove_one`) hold a
//! per-id lock for the whole cycle, so overlapping calls on one record
//! apply one after the other.

use std::future::Future;
use std::sync::Arc;

use futures_util::TryStreamExt;

use super::locks::KeyedMutex;
use super::options::{FindOptions, RecordSet, ResourceConfig};
use crate::adapter::{QueryWindow, StorageAdapter};
use crate::blob::{BlobError, BlobSource, BlobStore, ByteStream};
use crate::context::Context;
use crate::error::{ResourceError, ResourceResult};
use crate::filter::Filter;
use crate::record::{is_reserved_key, Attachment, Document, Record};
use crate::schema::{unexpected_payload, Event, HookPayload, Phase, Schema};

/// Data access object for one collection
pub struct Resource {
    schema: Arc<Schema>,
    adapter: Arc<dyn StorageAdapter>,
    blobs: Arc<dyn BlobStore>,
    config: ResourceConfig,
    upserts: KeyedMutex,
    writes: KeyedMutex,
}

/// Rebuilds a record from a hook payload, keeping engine managed keys
fn rebuild(stored: &Record, mut doc: Document) -> Record {
    doc.retain(|key, _| !is_reserved_key(key));
    Record {
        id: stored.id.clone(),
        attachments: stored.attachments.clone(),
        fields: doc,
    }
}

impl Resource {
    /// Binds a schema to its collaborators
    ///
    /// Declares a unique index on the adapter for every unique field.
    pub async fn open(
        schema: Arc<Schema>,
        adapter: Arc<dyn StorageAdapter>,
        blobs: Arc<dyn BlobStore>,
        config: ResourceConfig,
    ) -> ResourceResult<Self> {
        for field in schema.unique_fields() {
            adapter.ensure_unique_index(&field).await?;
        }

        tracing::info!(
            resource = %schema.name(),
            backend = adapter.backend(),
            blobs = blobs.backend(),
            "resource opened"
        );

        Ok(Self {
            schema,
            adapter,
            blobs,
            config,
            upserts: KeyedMutex::new(),
            writes: KeyedMutex::new(),
        })
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    fn present(&self, mut record: Record, skip_computation: bool) -> Record {
        if !skip_computation {
            self.schema.resolve_computed(&mut record);
        }
        record
    }

    async fn record_hooks(
        &self,
        event: Event,
        phase: Phase,
        record: Document,
        ctx: &Context,
    ) -> ResourceResult<Document> {
        let mut payload = HookPayload::Record { record };
        self.schema.hooks().run(event, phase, &mut payload, ctx).await?;
        match payload {
            HookPayload::Record { record } => Ok(record),
            other => Err(unexpected_payload(event, &other)),
        }
    }

    async fn find_before(&self, query: Filter, ctx: &Context) -> ResourceResult<Filter> {
        let mut payload = HookPayload::Query { query };
        self.schema
            .hooks()
            .run(Event::Find, Phase::Before, &mut payload, ctx)
            .await?;
        match payload {
            HookPayload::Query { query } => Ok(query),
            other => Err(unexpected_payload(Event::Find, &other)),
        }
    }

    async fn find_after(&self, records: Vec<Record>, ctx: &Context) -> ResourceResult<Vec<Record>> {
        let mut payload = HookPayload::Records { records };
        self.schema
            .hooks()
            .run(Event::Find, Phase::After, &mut payload, ctx)
            .await?;
        match payload {
            HookPayload::Records { records } => Ok(records),
            other => Err(unexpected_payload(Event::Find, &other)),
        }
    }

    /// Persists an existing record wrapped in save hooks
    async fn save_existing(&self, record: Record, ctx: &Context) -> ResourceResult<Record> {
        let doc = self
            .record_hooks(Event::Save, Phase::Before, record.to_document(), ctx)
            .await?;
        let mut stored = rebuild(&record, doc);
        self.schema.strip_unstored(&mut stored.fields);

        self.adapter.update(&stored).await?;

        let doc = self
            .record_hooks(Event::Save, Phase::After, stored.to_document(), ctx)
            .await?;
        Ok(rebuild(&stored, doc))
    }

    async fn require(&self, id: &str) -> ResourceResult<Record> {
        self.adapter
            .find_by_id(id)
            .await?
            .ok_or_else(|| ResourceError::not_found(format!("record '{}'", id)))
    }

    /// First record matching a possibly hook-rewritten query
    async fn locate(&self, query: &Filter) -> ResourceResult<Option<Record>> {
        Ok(self
            .adapter
            .query(query, QueryWindow::new(0, 1))
            .await?
            .into_iter()
            .next())
    }

    /// Deletes blobs no record references any more
    ///
    /// Runs after the record write has succeeded, so failures are logged
    /// rather than returned.
    async fn delete_blobs(&self, ids: impl IntoIterator<Item = String>) {
        for id in ids {
            match self.blobs.delete(&id).await {
                Ok(()) => {}
                Err(BlobError::NotFound(_)) => {
                    tracing::warn!(resource = %self.name(), blob = %id, "attachment blob already gone");
                }
                Err(e) => {
                    tracing::warn!(
                        resource = %self.name(),
                        blob = %id,
                        error = %e,
                        "failed to delete attachment blob"
                    );
                }
            }
        }
    }

    /// Validates and stores a new record
    pub async fn create(&self, input: Document, ctx: &Context) -> ResourceResult<Record> {
        let mut doc = input;
        self.schema.strip_unstored(&mut doc);
        self.schema.apply_defaults(&mut doc);

        let doc = self.schema.validate_with_hooks(doc, ctx).await?;
        let doc = self
            .record_hooks(Event::Create, Phase::Before, doc, ctx)
            .await?;
        let mut doc = self.record_hooks(Event::Save, Phase::Before, doc, ctx).await?;
        self.schema.strip_unstored(&mut doc);

        let stored = self.adapter.insert(doc).await?;
        tracing::debug!(
            resource = %self.name(),
            request_id = %ctx.request_id,
            id = %stored.id,
            "record created"
        );

        let doc = self
            .record_hooks(Event::Save, Phase::After, stored.to_document(), ctx)
            .await?;
        let doc = self
            .record_hooks(Event::Create, Phase::After, doc, ctx)
            .await?;
        Ok(self.present(rebuild(&stored, doc), false))
    }

    /// Looks a record up by id; no hooks run
    pub async fn get(&self, id: &str) -> ResourceResult<Option<Record>> {
        let record = self.adapter.find_by_id(id).await?;
        Ok(record.map(|r| self.present(r, false)))
    }

    /// Records matching `query`, optionally paginated
    pub async fn find(
        &self,
        query: Filter,
        options: &FindOptions,
        ctx: &Context,
    ) -> ResourceResult<RecordSet> {
        let page = options.page_request(self.config.default_page_size)?;
        let query = self.find_before(query, ctx).await?;

        let (records, meta) = match page {
            Some(page) => {
                let total = self.adapter.count(&query).await?;
                let records = self.adapter.query(&query, page.window()).await?;
                (records, Some(page.meta(total)))
            }
            None => (self.adapter.query(&query, QueryWindow::all()).await?, None),
        };

        tracing::debug!(
            resource = %self.name(),
            request_id = %ctx.request_id,
            matched = records.len(),
            "find"
        );

        let records = self.find_after(records, ctx).await?;
        Ok(RecordSet {
            records: records
                .into_iter()
                .map(|r| self.present(r, options.skip_computation))
                .collect(),
            meta,
        })
    }

    /// First record matching `query`
    pub async fn find_one(
        &self,
        query: Filter,
        options: &FindOptions,
        ctx: &Context,
    ) -> ResourceResult<Option<Record>> {
        let query = self.find_before(query, ctx).await?;
        let records = self.adapter.query(&query, QueryWindow::new(0, 1)).await?;
        let records = self.find_after(records, ctx).await?;
        Ok(records
            .into_iter()
            .next()
            .map(|r| self.present(r, options.skip_computation)))
    }

    /// Number of records matching `query`
    pub async fn count(&self, query: Filter, ctx: &Context) -> ResourceResult<u64> {
        let query = self.find_before(query, ctx).await?;
        Ok(self.adapter.count(&query).await?)
    }

    /// Shallow-merges `patch` into a stored record
    ///
    /// A `null` in the patch removes the field. The merged record is
    /// validated before anything is written. The target is the first
    /// record matching the query as left by the `update` before hooks.
    pub async fn merge_one(&self, id: &str, patch: Document, ctx: &Context) -> ResourceResult<Record> {
        let mut payload = HookPayload::Update {
            query: Filter::by_id(id),
            operations: patch,
        };
        self.schema
            .hooks()
            .run(Event::Update, Phase::Before, &mut payload, ctx)
            .await?;
        let (query, mut operations) = match payload {
            HookPayload::Update { query, operations } => (query, operations),
            other => return Err(unexpected_payload(Event::Update, &other)),
        };
        self.schema.strip_unstored(&mut operations);

        let target = self
            .locate(&query)
            .await?
            .ok_or_else(|| ResourceError::not_found(format!("record '{}'", id)))?;
        let _guard = self.writes.lock(target.id.clone()).await;
        let existing = self.require(&target.id).await?;

        let mut merged = existing.fields.clone();
        for (key, value) in &operations {
            if value.is_null() {
                merged.remove(key);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }
        let merged = self.schema.validate_with_hooks(merged, ctx).await?;

        let record = self
            .save_existing(rebuild(&existing, merged), ctx)
            .await?;
        tracing::debug!(
            resource = %self.name(),
            request_id = %ctx.request_id,
            id = %record.id,
            "record merged"
        );

        let mut payload = HookPayload::Update { query, operations };
        self.schema
            .hooks()
            .run(Event::Update, Phase::After, &mut payload, ctx)
            .await?;

        Ok(self.present(record, false))
    }

    /// Merges `data` into the record matching `query`, or creates it
    ///
    /// Calls with the same query are serialized, so concurrent callers
    /// cannot both take the create branch.
    pub async fn upsert_one(
        &self,
        query: Filter,
        data: Document,
        ctx: &Context,
    ) -> ResourceResult<Record> {
        let _guard = self.upserts.lock(query.fingerprint()).await;

        let existing = self
            .find_one(query, &FindOptions::new().skip_computation(), ctx)
            .await?;
        match existing {
            Some(record) => self.merge_one(&record.id, data, ctx).await,
            None => self.create(data, ctx).await,
        }
    }

    /// Removes a record and its attachment blobs
    pub async fn remove_one(&self, id: &str, ctx: &Context) -> ResourceResult<()> {
        let mut payload = HookPayload::Remove {
            query: Filter::by_id(id),
            options: Document::new(),
            removed_count: None,
        };
        self.schema
            .hooks()
            .run(Event::Remove, Phase::Before, &mut payload, ctx)
            .await?;
        let (query, options) = match payload {
            HookPayload::Remove { query, options, .. } => (query, options),
            other => return Err(unexpected_payload(Event::Remove, &other)),
        };

        let mut removed_count = 0;
        if let Some(target) = self.locate(&query).await? {
            let _guard = self.writes.lock(target.id.clone()).await;
            // attachments may have changed while waiting for the lock
            if let Some(record) = self.adapter.find_by_id(&target.id).await? {
                if self.adapter.delete(&record.id).await? {
                    removed_count = 1;
                    self.delete_blobs(record.attachments.into_iter().map(|a| a.id))
                        .await;
                }
            }
        }

        tracing::debug!(
            resource = %self.name(),
            request_id = %ctx.request_id,
            removed_count,
            "remove"
        );

        let mut payload = HookPayload::Remove {
            query,
            options,
            removed_count: Some(removed_count),
        };
        self.schema
            .hooks()
            .run(Event::Remove, Phase::After, &mut payload, ctx)
            .await
    }

    /// Feeds every matching record to `callback`, one at a time
    ///
    /// The next record is only fetched once the callback has finished
    /// with the previous one. Returns the number of records delivered.
    pub async fn each<F, Fut>(&self, query: Filter, mut callback: F, ctx: &Context) -> ResourceResult<u64>
    where
        F: FnMut(Record) -> Fut + Send,
        Fut: Future<Output = ResourceResult<()>> + Send,
    {
        let query = self.find_before(query, ctx).await?;
        let mut stream = self.adapter.stream_query(query);

        let mut delivered = 0u64;
        while let Some(record) = stream.try_next().await? {
            callback(self.present(record, false)).await?;
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Removes every record of the collection and their attachment blobs
    pub async fn drop(&self) -> ResourceResult<u64> {
        let mut blob_ids = Vec::new();
        {
            let mut stream = self.adapter.stream_query(Filter::new());
            while let Some(record) = stream.try_next().await? {
                blob_ids.extend(record.attachments.into_iter().map(|a| a.id));
            }
        }

        let removed = self.adapter.delete_all(&Filter::new()).await?;
        self.delete_blobs(blob_ids).await;

        tracing::info!(resource = %self.name(), removed, "collection dropped");
        Ok(removed)
    }

    /// Stores `source` as a blob and appends it to the record's attachments
    ///
    /// The blob is stored before the record is touched; if persisting the
    /// record fails the blob is deleted again.
    pub async fn attach(
        &self,
        id: &str,
        name: impl Into<String>,
        source: impl Into<BlobSource>,
        ctx: &Context,
    ) -> ResourceResult<Record> {
        let _guard = self.writes.lock(id.to_string()).await;
        let mut record = self.require(id).await?;
        let blob = self.blobs.put(source.into()).await?;

        record.attachments.push(Attachment {
            id: blob.id.clone(),
            name: name.into(),
            file: blob.locator.clone(),
        });

        match self.save_existing(record, ctx).await {
            Ok(record) => {
                tracing::debug!(
                    resource = %self.name(),
                    request_id = %ctx.request_id,
                    id = %record.id,
                    blob = %blob.id,
                    size = blob.size,
                    "attachment added"
                );
                Ok(self.present(record, false))
            }
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&blob.id).await {
                    tracing::warn!(
                        resource = %self.name(),
                        blob = %blob.id,
                        error = %cleanup,
                        "failed to remove orphaned blob"
                    );
                }
                Err(e)
            }
        }
    }

    /// Streams the content of an attachment
    pub async fn read_attachment(&self, attachment_id: &str) -> ResourceResult<ByteStream> {
        Ok(self.blobs.get(attachment_id).await?)
    }

    /// Drops an attachment from a record and deletes its blob
    pub async fn delete_attachment(
        &self,
        id: &str,
        attachment_id: &str,
        ctx: &Context,
    ) -> ResourceResult<Record> {
        let _guard = self.writes.lock(id.to_string()).await;
        let mut record = self.require(id).await?;
        let position = record
            .attachments
            .iter()
            .position(|a| a.id == attachment_id)
            .ok_or_else(|| ResourceError::not_found(format!("attachment '{}'", attachment_id)))?;
        let attachment = record.attachments.remove(position);

        let record = self.save_existing(record, ctx).await?;
        self.delete_blobs([attachment.id]).await;

        Ok(self.present(record, false))
    }
}

impl Schema {
    /// Builds a resource on this schema
    pub async fn resource(
        self: Arc<Self>,
        adapter: Arc<dyn StorageAdapter>,
        blobs: Arc<dyn BlobStore>,
        config: ResourceConfig,
    ) -> ResourceResult<Resource> {
        Resource::open(self, adapter, blobs, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::blob::{LocalBlobConfig, LocalBlobStore};
    use crate::schema::FieldDef;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    async fn users(dir: &TempDir) -> Resource {
        let schema = Schema::builder("users")
            .field("username", FieldDef::string().required().unique())
            .field("age", FieldDef::integer().min(0.0))
            .field("role", FieldDef::string().default_value("member"))
            .computed("label", |r: &Record| {
                json!(format!("@{}", r.get("username").and_then(Value::as_str).unwrap_or("")))
            })
            .build()
            .unwrap();
        let blobs = LocalBlobStore::open(LocalBlobConfig::new(dir.path())).await.unwrap();
        Arc::new(schema)
            .resource(
                Arc::new(MemoryAdapter::new()),
                Arc::new(blobs),
                ResourceConfig::default(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_applies_defaults_and_computes() {
        let dir = TempDir::new().unwrap();
        let users = users(&dir).await;
        let ctx = Context::new();

        let record = users
            .create(doc(json!({ "username": "ada", "label": "ignored" })), &ctx)
            .await
            .unwrap();
        assert_eq!(record.get("role"), Some(&json!("member")));
        assert_eq!(record.get("label"), Some(&json!("@ada")));

        let stored = users.adapter().find_by_id(&record.id).await.unwrap().unwrap();
        assert!(stored.get("label").is_none());
    }

    #[tokio::test]
    async fn test_invalid_create_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let users = users(&dir).await;
        let ctx = Context::new();

        let err = users.create(doc(json!({ "age": -1 })), &ctx).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(err.field_errors().len(), 2);
        assert_eq!(users.count(Filter::new(), &ctx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_merge_removes_null_fields() {
        let dir = TempDir::new().unwrap();
        let users = users(&dir).await;
        let ctx = Context::new();

        let record = users
            .create(doc(json!({ "username": "ada", "age": 36 })), &ctx)
            .await
            .unwrap();
        let merged = users
            .merge_one(&record.id, doc(json!({ "age": null, "role": "admin" })), &ctx)
            .await
            .unwrap();
        assert!(merged.get("age").is_none());
        assert_eq!(merged.get("role"), Some(&json!("admin")));
        assert_eq!(merged.id, record.id);
    }

    #[tokio::test]
    async fn test_merge_missing_record() {
        let dir = TempDir::new().unwrap();
        let users = users(&dir).await;
        let err = users
            .merge_one("missing", Document::new(), &Context::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_upsert_creates_then_merges() {
        let dir = TempDir::new().unwrap();
        let users = users(&dir).await;
        let ctx = Context::new();
        let query = Filter::new().eq("username", "ada");

        let first = users
            .upsert_one(query.clone(), doc(json!({ "username": "ada", "age": 1 })), &ctx)
            .await
            .unwrap();
        let second = users
            .upsert_one(query, doc(json!({ "age": 2 })), &ctx)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.get("age"), Some(&json!(2)));
        assert_eq!(users.count(Filter::new(), &ctx).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_each_counts_delivered_records() {
        let dir = TempDir::new().unwrap();
        let users = users(&dir).await;
        let ctx = Context::new();
        for name in ["a", "b", "c"] {
            users.create(doc(json!({ "username": name })), &ctx).await.unwrap();
        }

        let mut seen = Vec::new();
        let delivered = users
            .each(
                Filter::new(),
                |record| {
                    seen.push(record.get("label").cloned());
                    async { Ok(()) }
                },
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(delivered, 3);
        assert_eq!(seen, vec![Some(json!("@a")), Some(json!("@b")), Some(json!("@c"))]);
    }

    #[tokio::test]
    async fn test_remove_missing_record_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let users = users(&dir).await;
        users.remove_one("missing", &Context::new()).await.unwrap();
    }
}
