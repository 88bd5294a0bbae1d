//! Blob storage subsystem
//!
//! Attachment content lives in a `BlobStore`, apart from the records
//! that reference it. Content is immutable once stored; `delete` is the
//! only way to remove it.
//!
//! - `put` consumes a source (file path, in-memory bytes or a byte
//!   stream) and hands back a fresh id plus a backend locator
//! - `get` returns a lazy byte stream; every call starts a new read
//! - A missing source file is `BlobError::NotFound`

mod errors;
mod local;
mod postgres;

pub use errors::{BlobError, BlobResult};
pub use local::{LocalBlobConfig, LocalBlobStore};
pub use postgres::PgBlobStore;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Default read size of blob streams
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Lazy sequence of blob content chunks
pub type ByteStream = BoxStream<'static, BlobResult<Bytes>>;

/// Content handed to `BlobStore::put`
pub enum BlobSource {
    /// Local file, read when the blob is stored
    Path(PathBuf),
    /// Bytes already in memory
    Bytes(Bytes),
    /// Caller supplied stream
    Stream(ByteStream),
}

impl BlobSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self::Bytes(data.into())
    }

    pub fn stream(stream: ByteStream) -> Self {
        Self::Stream(stream)
    }

    /// Opens the source as a stream of `chunk_size` chunks
    ///
    /// Fails with `BlobError::NotFound` if a source file is missing.
    pub async fn into_stream(self, chunk_size: usize) -> BlobResult<ByteStream> {
        match self {
            Self::Path(path) => {
                let file = File::open(&path)
                    .await
                    .map_err(|e| BlobError::from_io(e, path.display().to_string()))?;
                Ok(file_stream(file, chunk_size))
            }
            Self::Bytes(data) => Ok(stream::once(async move { Ok::<_, BlobError>(data) }).boxed()),
            Self::Stream(stream) => Ok(stream),
        }
    }
}

impl fmt::Debug for BlobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Bytes(data) => f.debug_tuple("Bytes").field(&data.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<PathBuf> for BlobSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for BlobSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<Bytes> for BlobSource {
    fn from(data: Bytes) -> Self {
        Self::Bytes(data)
    }
}

impl From<Vec<u8>> for BlobSource {
    fn from(data: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(data))
    }
}

/// A stored blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Opaque id, used as the attachment id
    pub id: String,
    /// Backend specific location of the content
    pub locator: String,
    /// Content length in bytes
    pub size: u64,
}

/// Store for immutable blob content
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Backend name for diagnostics
    fn backend(&self) -> &'static str;

    /// Stores the content of `source` under a fresh id
    async fn put(&self, source: BlobSource) -> BlobResult<StoredBlob>;

    /// Streams the content of a blob
    ///
    /// Fails with `BlobError::NotFound` before streaming if `id` is unknown.
    async fn get(&self, id: &str) -> BlobResult<ByteStream>;

    /// Removes a blob; `BlobError::NotFound` if it does not exist
    async fn delete(&self, id: &str) -> BlobResult<()>;
}

/// Fresh blob identifier: 32 lowercase hex digits
pub(crate) fn new_blob_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Rejects ids `new_blob_id` could not have produced
pub(crate) fn check_blob_id(id: &str) -> BlobResult<()> {
    let valid = id.len() == 32 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if valid {
        Ok(())
    } else {
        Err(BlobError::InvalidId(id.to_string()))
    }
}

/// Reads an open file lazily, one chunk per poll
pub(crate) fn file_stream(file: File, chunk_size: usize) -> ByteStream {
    stream::try_unfold(file, move |mut file| async move {
        let mut buf = vec![0u8; chunk_size];
        let n = file.read(&mut buf).await.map_err(BlobError::from)?;
        buf.truncate(n);
        Ok::<_, BlobError>((n > 0).then(|| (Bytes::from(buf), file)))
    })
    .boxed()
}

/// Collects a blob stream into memory
pub async fn read_to_vec(stream: ByteStream) -> BlobResult<Vec<u8>> {
    stream
        .try_fold(Vec::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_blob_ids() {
        let id = new_blob_id();
        assert!(check_blob_id(&id).is_ok());
        assert!(check_blob_id("../../etc/passwd").is_err());
        assert!(check_blob_id(&id.to_uppercase()).is_err());
    }

    #[tokio::test]
    async fn test_path_source_streams_in_chunks() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[7u8; 10]).unwrap();

        let stream = BlobSource::path(file.path()).into_stream(4).await.unwrap();
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert!(chunks.iter().all(|c| c.len() <= 4));
        assert_eq!(chunks.iter().map(Bytes::len).sum::<usize>(), 10);
    }

    #[tokio::test]
    async fn test_missing_path_is_not_found() {
        let err = BlobSource::path("/nonexistent/avatar.png")
            .into_stream(DEFAULT_CHUNK_SIZE)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BlobError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_bytes_source_roundtrip() {
        let stream = BlobSource::from(b"hello".to_vec())
            .into_stream(2)
            .await
            .unwrap();
        assert_eq!(read_to_vec(stream).await.unwrap(), b"hello");
    }
}
