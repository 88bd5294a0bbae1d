//! PostgreSQL blob store
//!
//! Blobs are split into `BYTEA` chunks:
//!
//! ```sql
//! CREATE TABLE "<table>"        (id TEXT PRIMARY KEY, size BIGINT NOT NULL)
//! CREATE TABLE "<table>_chunks" (id TEXT, n INTEGER, data BYTEA NOT NULL, PRIMARY KEY (id, n))
//! ```
//!
//! A blob is written inside one transaction, so a failing source leaves
//! nothing behind. `get` fetches one chunk per poll.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Row, Transaction};

use super::errors::{BlobError, BlobResult};
use super::{check_blob_id, new_blob_id, BlobSource, BlobStore, ByteStream, StoredBlob, DEFAULT_CHUNK_SIZE};
use crate::adapter::is_sql_identifier;

fn db_error(e: sqlx::Error) -> BlobError {
    BlobError::Io(format!("database error: {}", e))
}

/// Blob store keeping content in PostgreSQL
pub struct PgBlobStore {
    pool: PgPool,
    table: String,
    chunk_size: usize,
}

impl PgBlobStore {
    /// Prepares the blob tables on an existing pool
    pub async fn with_pool(pool: PgPool, table: &str) -> BlobResult<Self> {
        // leave room for the "_chunks" suffix
        if !is_sql_identifier(table) || table.len() > 56 {
            return Err(BlobError::Io(format!("invalid blob table name '{}'", table)));
        }

        let store = Self {
            pool,
            table: table.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        };

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (id TEXT PRIMARY KEY, size BIGINT NOT NULL)",
            store.table
        ))
        .execute(&store.pool)
        .await
        .map_err(db_error)?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}_chunks\" (
                id TEXT NOT NULL,
                n INTEGER NOT NULL,
                data BYTEA NOT NULL,
                PRIMARY KEY (id, n)
            )",
            store.table
        ))
        .execute(&store.pool)
        .await
        .map_err(db_error)?;

        Ok(store)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    async fn write_chunk(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: &str,
        n: i32,
        data: &[u8],
    ) -> BlobResult<()> {
        sqlx::query(&format!(
            "INSERT INTO \"{}_chunks\" (id, n, data) VALUES ($1, $2, $3)",
            self.table
        ))
        .bind(id)
        .bind(n)
        .bind(data)
        .execute(&mut **tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for PgBlobStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn put(&self, source: BlobSource) -> BlobResult<StoredBlob> {
        let mut content = source.into_stream(self.chunk_size).await?;
        let id = new_blob_id();

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut pending = BytesMut::new();
        let mut n = 0i32;
        let mut size = 0u64;

        // dropping `tx` on an early return rolls the blob back
        while let Some(chunk) = content.try_next().await? {
            size += chunk.len() as u64;
            pending.extend_from_slice(&chunk);
            while pending.len() >= self.chunk_size {
                let full = pending.split_to(self.chunk_size);
                self.write_chunk(&mut tx, &id, n, &full).await?;
                n += 1;
            }
        }
        if !pending.is_empty() {
            self.write_chunk(&mut tx, &id, n, &pending).await?;
        }

        sqlx::query(&format!("INSERT INTO \"{}\" (id, size) VALUES ($1, $2)", self.table))
            .bind(&id)
            .bind(size as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;

        Ok(StoredBlob {
            locator: format!("pg:{}/{}", self.table, id),
            id,
            size,
        })
    }

    async fn get(&self, id: &str) -> BlobResult<ByteStream> {
        check_blob_id(id)?;
        let exists = sqlx::query(&format!("SELECT 1 FROM \"{}\" WHERE id = $1", self.table))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        if exists.is_none() {
            return Err(BlobError::NotFound(id.to_string()));
        }

        let pool = self.pool.clone();
        let sql = format!(
            "SELECT data FROM \"{}_chunks\" WHERE id = $1 AND n = $2",
            self.table
        );
        let id = id.to_string();

        Ok(stream::try_unfold(0i32, move |n| {
            let pool = pool.clone();
            let sql = sql.clone();
            let id = id.clone();
            async move {
                let row = sqlx::query(&sql)
                    .bind(&id)
                    .bind(n)
                    .fetch_optional(&pool)
                    .await
                    .map_err(db_error)?;
                let next = match row {
                    Some(row) => {
                        let data: Vec<u8> = row.try_get("data").map_err(db_error)?;
                        Some((Bytes::from(data), n + 1))
                    }
                    None => None,
                };
                Ok::<_, BlobError>(next)
            }
        })
        .boxed())
    }

    async fn delete(&self, id: &str) -> BlobResult<()> {
        check_blob_id(id)?;
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let removed = sqlx::query(&format!("DELETE FROM \"{}\" WHERE id = $1", self.table))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?
            .rows_affected();
        if removed == 0 {
            return Err(BlobError::NotFound(id.to_string()));
        }

        sqlx::query(&format!("DELETE FROM \"{}_chunks\" WHERE id = $1", self.table))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }
}
