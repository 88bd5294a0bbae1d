//! Local filesystem blob store
//!
//! Content lives under `<root>/<id[0..2]>/<id>`. New content is written
//! to a temporary file next to its final path, synced, then renamed into
//! place, so a blob is either absent or complete.

use std::path::PathBuf;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use super::errors::{BlobError, BlobResult};
use super::{
    check_blob_id, file_stream, new_blob_id, BlobSource, BlobStore, ByteStream, StoredBlob,
    DEFAULT_CHUNK_SIZE,
};

/// Configuration of a local blob store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBlobConfig {
    pub root: PathBuf,
    /// Size of chunks yielded by `get`
    pub chunk_size: usize,
}

impl LocalBlobConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Blob store on the local filesystem
#[derive(Debug)]
pub struct LocalBlobStore {
    root: PathBuf,
    chunk_size: usize,
}

impl LocalBlobStore {
    /// Opens the store, creating its root directory
    pub async fn open(config: LocalBlobConfig) -> BlobResult<Self> {
        fs::create_dir_all(&config.root).await?;
        Ok(Self {
            root: config.root,
            chunk_size: config.chunk_size.max(1),
        })
    }

    /// Locator of a blob, relative to the root
    fn locator(id: &str) -> String {
        format!("{}/{}", &id[..2], id)
    }

    fn full_path(&self, id: &str) -> PathBuf {
        self.root.join(Self::locator(id))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn put(&self, source: BlobSource) -> BlobResult<StoredBlob> {
        let mut content = source.into_stream(self.chunk_size).await?;

        let id = new_blob_id();
        let path = self.full_path(&id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");

        let written = async {
            let mut file = File::create(&tmp).await?;
            let mut size = 0u64;
            while let Some(chunk) = content.try_next().await? {
                file.write_all(&chunk).await?;
                size += chunk.len() as u64;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok::<u64, BlobError>(size)
        }
        .await;

        let size = match written {
            Ok(size) => size,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&tmp).await {
                    tracing::warn!(path = %tmp.display(), error = %cleanup, "failed to remove partial blob");
                }
                return Err(e);
            }
        };
        fs::rename(&tmp, &path).await?;

        tracing::debug!(blob = %id, size, "stored blob");
        Ok(StoredBlob {
            locator: Self::locator(&id),
            id,
            size,
        })
    }

    async fn get(&self, id: &str) -> BlobResult<ByteStream> {
        check_blob_id(id)?;
        let file = File::open(self.full_path(id))
            .await
            .map_err(|e| BlobError::from_io(e, id))?;
        Ok(file_stream(file, self.chunk_size))
    }

    async fn delete(&self, id: &str) -> BlobResult<()> {
        check_blob_id(id)?;
        fs::remove_file(self.full_path(id))
            .await
            .map_err(|e| BlobError::from_io(e, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::read_to_vec;
    use bytes::Bytes;
    use futures_util::stream;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> LocalBlobStore {
        let mut config = LocalBlobConfig::new(dir.path().join("blobs"));
        config.chunk_size = 3;
        LocalBlobStore::open(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let blob = store.put(BlobSource::bytes("hello world")).await.unwrap();
        assert_eq!(blob.size, 11);
        assert_eq!(blob.locator, format!("{}/{}", &blob.id[..2], blob.id));

        // every get starts from the beginning
        for _ in 0..2 {
            let data = read_to_vec(store.get(&blob.id).await.unwrap()).await.unwrap();
            assert_eq!(data, b"hello world");
        }
    }

    #[tokio::test]
    async fn test_stream_source() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let chunks = vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))];
        let blob = store
            .put(BlobSource::stream(Box::pin(stream::iter(chunks))))
            .await
            .unwrap();
        let data = read_to_vec(store.get(&blob.id).await.unwrap()).await.unwrap();
        assert_eq!(data, b"abcd");
    }

    #[tokio::test]
    async fn test_failing_stream_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let chunks = vec![
            Ok(Bytes::from_static(b"ab")),
            Err(BlobError::Io("connection reset".into())),
        ];
        let err = store
            .put(BlobSource::stream(Box::pin(stream::iter(chunks))))
            .await
            .unwrap_err();
        assert_eq!(err, BlobError::Io("connection reset".into()));

        let mut shards = std::fs::read_dir(dir.path().join("blobs")).unwrap();
        let leftovers: usize = shards
            .by_ref()
            .map(|shard| std::fs::read_dir(shard.unwrap().path()).unwrap().count())
            .sum();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let blob = store.put(BlobSource::bytes("x")).await.unwrap();
        store.delete(&blob.id).await.unwrap();

        assert!(matches!(store.get(&blob.id).await.err(), Some(BlobError::NotFound(_))));
        assert!(matches!(store.delete(&blob.id).await, Err(BlobError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_malformed_id_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        assert!(matches!(store.get("../secret").await.err(), Some(BlobError::InvalidId(_))));
    }
}
