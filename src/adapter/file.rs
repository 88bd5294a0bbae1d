//! Local durable file adapter
//!
//! Each collection lives in `<data_dir>/<collection>/records.log`, an
//! append-only log of checksummed frames (see `frame`). The log is
//! replayed into memory on open: the latest put of an id wins and delete
//! frames act as tombstones. A checksum failure or a truncated frame
//! aborts the open with `AdapterError::Corruption`. An append that fails
//! part way is cut back to the last complete frame.
//!
//! Writes are serialized by one lock. The unique check, the append and
//! the in-memory apply all happen while it is held, so no two writers
//! can both pass the check for the same value.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use super::collection::Collection;
use super::errors::{AdapterError, AdapterResult};
use super::frame::Frame;
use super::{new_record_id, QueryWindow, RecordStream, StorageAdapter};
use crate::filter::Filter;
use crate::record::{Document, Record};

const LOG_FILE: &str = "records.log";
const COMPACT_FILE: &str = "records.log.compact";

/// Configuration of a file adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAdapterConfig {
    /// Root data directory
    pub data_dir: PathBuf,
    /// Collection name, used as the directory name
    pub collection: String,
    /// fsync after every append
    pub sync_writes: bool,
}

impl FileAdapterConfig {
    pub fn new(data_dir: impl Into<PathBuf>, collection: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            collection: collection.into(),
            sync_writes: true,
        }
    }

    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Location of the collection log
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(&self.collection).join(LOG_FILE)
    }
}

/// Outcome of `FileAdapter::compact`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    pub records: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

struct LogState {
    collection: Collection,
    file: File,
    len: u64,
}

impl LogState {
    async fn append(&mut self, frames: &[Frame], sync: bool) -> AdapterResult<()> {
        let mut buf = Vec::new();
        for frame in frames {
            buf.extend(frame.encode()?);
        }
        if let Err(e) = self.write_frames(&buf, sync).await {
            if let Err(cut) = self.discard_partial().await {
                tracing::error!(error = %cut, len = self.len, "failed to truncate partial log frame");
            }
            return Err(e.into());
        }
        self.len += buf.len() as u64;
        Ok(())
    }

    /// Cuts the log back to the end of the last complete frame
    async fn discard_partial(&mut self) -> std::io::Result<()> {
        self.file.set_len(self.len).await
    }

    async fn write_frames(&mut self, buf: &[u8], sync: bool) -> std::io::Result<()> {
        self.file.write_all(buf).await?;
        self.file.flush().await?;
        if sync {
            self.file.sync_data().await?;
        }
        Ok(())
    }
}

/// Adapter persisting one collection to an append-only log
pub struct FileAdapter {
    collection_name: String,
    path: PathBuf,
    sync_writes: bool,
    state: RwLock<LogState>,
}

/// Directory-safe collection names
fn check_collection_name(name: &str) -> AdapterResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        && !name.starts_with('-');
    if valid {
        Ok(())
    } else {
        Err(AdapterError::InvalidIdentifier(name.to_string()))
    }
}

async fn open_append(path: &Path) -> AdapterResult<File> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?)
}

impl FileAdapter {
    /// Opens the collection log, replaying it into memory
    pub async fn open(config: FileAdapterConfig) -> AdapterResult<Self> {
        check_collection_name(&config.collection)?;

        let path = config.log_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let image = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let frames = Frame::decode_all(&image).map_err(|e| {
            tracing::warn!(
                collection = %config.collection,
                path = %path.display(),
                error = %e,
                "record log failed integrity check"
            );
            e
        })?;

        let mut collection = Collection::new();
        for frame in frames {
            match frame {
                Frame::Put(record) => collection.write(record),
                Frame::Delete(id) => {
                    collection.remove(&id);
                }
            }
        }

        tracing::info!(
            collection = %config.collection,
            records = collection.len(),
            bytes = image.len(),
            "replayed record log"
        );

        let file = open_append(&path).await?;
        Ok(Self {
            collection_name: config.collection,
            path,
            sync_writes: config.sync_writes,
            state: RwLock::new(LogState {
                collection,
                file,
                len: image.len() as u64,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn collection(&self) -> &str {
        &self.collection_name
    }

    /// Current log size in bytes
    pub async fn log_len(&self) -> u64 {
        self.state.read().await.len
    }

    /// Rewrites the log keeping only live records
    ///
    /// The new log is written next to the old one, synced, then renamed
    /// over it.
    pub async fn compact(&self) -> AdapterResult<CompactionReport> {
        let mut state = self.state.write().await;
        let bytes_before = state.len;

        let mut buf = Vec::new();
        let mut records = 0usize;
        for record in state.collection.records() {
            buf.extend(Frame::Put(record.clone()).encode()?);
            records += 1;
        }

        let tmp = self.path.with_file_name(COMPACT_FILE);
        {
            let mut file = File::create(&tmp).await?;
            file.write_all(&buf).await?;
            file.flush().await?;
            file.sync_all().await?;
        }
        fs::rename(&tmp, &self.path).await?;

        state.file = open_append(&self.path).await?;
        state.len = buf.len() as u64;

        tracing::info!(
            collection = %self.collection_name,
            records,
            bytes_before,
            bytes_after = state.len,
            "compacted record log"
        );

        Ok(CompactionReport {
            records,
            bytes_before,
            bytes_after: state.len,
        })
    }
}

#[async_trait]
impl StorageAdapter for FileAdapter {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn insert(&self, fields: Document) -> AdapterResult<Record> {
        let record = Record::new(new_record_id(), fields);
        let mut state = self.state.write().await;
        state.collection.check_unique(&record)?;
        state
            .append(&[Frame::Put(record.clone())], self.sync_writes)
            .await?;
        state.collection.write(record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: &str) -> AdapterResult<Option<Record>> {
        Ok(self.state.read().await.collection.get(id).cloned())
    }

    async fn query(&self, filter: &Filter, window: QueryWindow) -> AdapterResult<Vec<Record>> {
        Ok(self.state.read().await.collection.query(filter, window))
    }

    async fn count(&self, filter: &Filter) -> AdapterResult<u64> {
        Ok(self.state.read().await.collection.count(filter))
    }

    async fn update(&self, record: &Record) -> AdapterResult<()> {
        let mut state = self.state.write().await;
        if !state.collection.contains(&record.id) {
            return Err(AdapterError::NotFound(record.id.clone()));
        }
        state.collection.check_unique(record)?;
        state
            .append(&[Frame::Put(record.clone())], self.sync_writes)
            .await?;
        state.collection.write(record.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> AdapterResult<bool> {
        let mut state = self.state.write().await;
        if !state.collection.contains(id) {
            return Ok(false);
        }
        state
            .append(&[Frame::Delete(id.to_string())], self.sync_writes)
            .await?;
        state.collection.remove(id);
        Ok(true)
    }

    async fn delete_all(&self, filter: &Filter) -> AdapterResult<u64> {
        let mut state = self.state.write().await;
        let ids = state.collection.matching_ids(filter);
        if ids.is_empty() {
            return Ok(0);
        }

        if ids.len() == state.collection.len() {
            state.file.set_len(0).await?;
            if self.sync_writes {
                state.file.sync_all().await?;
            }
            state.len = 0;
            state.collection.clear();
        } else {
            let frames: Vec<Frame> = ids.iter().cloned().map(Frame::Delete).collect();
            state.append(&frames, self.sync_writes).await?;
            for id in &ids {
                state.collection.remove(id);
            }
        }
        Ok(ids.len() as u64)
    }

    async fn ensure_unique_index(&self, field: &str) -> AdapterResult<()> {
        self.state.write().await.collection.ensure_unique(field)
    }

    fn stream_query(&self, filter: Filter) -> RecordStream<'_> {
        stream::unfold((filter, None::<u64>), move |(filter, after)| async move {
            let next = self
                .state
                .read()
                .await
                .collection
                .next_after(&filter, after);
            next.map(|(seq, record)| (Ok(record), (filter, Some(seq))))
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    async fn open(dir: &TempDir) -> FileAdapter {
        FileAdapter::open(FileAdapterConfig::new(dir.path(), "users").sync_writes(false))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_torn_append_is_cut_before_next_write() {
        let dir = TempDir::new().unwrap();
        {
            let adapter = open(&dir).await;
            adapter.insert(doc(json!({ "name": "A" }))).await.unwrap();

            let mut state = adapter.state.write().await;
            // half a frame, as left by a failed write
            state.file.write_all(&[0x20, 0x00, 0x00]).await.unwrap();
            state.file.flush().await.unwrap();
            state.discard_partial().await.unwrap();
            drop(state);

            adapter.insert(doc(json!({ "name": "B" }))).await.unwrap();
        }

        let adapter = open(&dir).await;
        assert_eq!(adapter.count(&Filter::new()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let adapter = open(&dir).await;
            let record = adapter.insert(doc(json!({ "name": "A" }))).await.unwrap();
            let gone = adapter.insert(doc(json!({ "name": "B" }))).await.unwrap();
            adapter.delete(&gone.id).await.unwrap();
            record.id
        };

        let adapter = open(&dir).await;
        assert_eq!(adapter.count(&Filter::new()).await.unwrap(), 1);
        let record = adapter.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.get("name"), Some(&json!("A")));
    }

    #[tokio::test]
    async fn test_invalid_collection_name() {
        let dir = TempDir::new().unwrap();
        let err = FileAdapter::open(FileAdapterConfig::new(dir.path(), "../escape"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AdapterError::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn test_compaction_keeps_live_records_only() {
        let dir = TempDir::new().unwrap();
        let adapter = open(&dir).await;
        let mut record = adapter.insert(doc(json!({ "n": 0 }))).await.unwrap();
        for n in 1..20 {
            record.fields.insert("n".into(), json!(n));
            adapter.update(&record).await.unwrap();
        }

        let report = adapter.compact().await.unwrap();
        assert_eq!(report.records, 1);
        assert!(report.bytes_after < report.bytes_before);

        adapter.insert(doc(json!({ "n": 100 }))).await.unwrap();
        drop(adapter);

        let adapter = open(&dir).await;
        assert_eq!(adapter.count(&Filter::new()).await.unwrap(), 2);
        let reloaded = adapter.find_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(reloaded.get("n"), Some(&json!(19)));
    }

    #[tokio::test]
    async fn test_delete_everything_truncates_log() {
        let dir = TempDir::new().unwrap();
        let adapter = open(&dir).await;
        for _ in 0..3 {
            adapter.insert(doc(json!({}))).await.unwrap();
        }
        assert_eq!(adapter.delete_all(&Filter::new()).await.unwrap(), 3);
        assert_eq!(adapter.log_len().await, 0);

        adapter.insert(doc(json!({}))).await.unwrap();
        drop(adapter);
        assert_eq!(open(&dir).await.count(&Filter::new()).await.unwrap(), 1);
    }
}
