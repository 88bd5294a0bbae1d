//! PostgreSQL adapter
//!
//! One table per collection:
//!
//! ```sql
//! CREATE TABLE "<collection>" (seq BIGSERIAL, id TEXT PRIMARY KEY, doc JSONB NOT NULL)
//! ```
//!
//! `doc` holds the persisted form including `_id` and `_attachments`.
//! `seq` fixes the native order. Filters become JSONB predicates:
//! equality per top-level key, containment (`@>`) for object values, and
//! "missing or JSON null" for null values. Unique fields map to partial
//! unique expression indexes, so the database enforces them atomically
//! with the write.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};

use super::errors::{AdapterError, AdapterResult};
use super::{new_record_id, QueryWindow, RecordStream, StorageAdapter};
use crate::filter::Filter;
use crate::record::{Document, Record, ID_KEY};

/// Longest identifier PostgreSQL keeps without truncating
const MAX_IDENTIFIER_LEN: usize = 63;

const UNIQUE_SUFFIX: &str = "_uniq";

/// Whether a name is safe to splice into SQL as a quoted identifier:
/// `^[A-Za-z_][A-Za-z0-9_]*$`, at most 63 bytes
pub(crate) fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    name.len() <= MAX_IDENTIFIER_LEN
        && chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_identifier(name: &str) -> AdapterResult<()> {
    if is_sql_identifier(name) {
        Ok(())
    } else {
        Err(AdapterError::InvalidIdentifier(name.to_string()))
    }
}

fn db_error(e: sqlx::Error) -> AdapterError {
    AdapterError::io(format!("database error: {}", e))
}

/// Adapter storing one collection in a PostgreSQL table
pub struct PostgresAdapter {
    pool: PgPool,
    table: String,
}

impl PostgresAdapter {
    /// Connects a pool and prepares the collection table
    pub async fn connect(
        url: &str,
        max_connections: u32,
        collection: &str,
    ) -> AdapterResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(db_error)?;
        tracing::info!(collection, max_connections, "connected to PostgreSQL");
        Self::with_pool(pool, collection).await
    }

    /// Prepares the collection table on an existing pool
    pub async fn with_pool(pool: PgPool, collection: &str) -> AdapterResult<Self> {
        check_identifier(collection)?;
        let adapter = Self {
            pool,
            table: collection.to_string(),
        };

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (
                seq BIGSERIAL,
                id TEXT PRIMARY KEY,
                doc JSONB NOT NULL
            )",
            adapter.table
        ))
        .execute(&adapter.pool)
        .await
        .map_err(db_error)?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS \"{0}_seq\" ON \"{0}\" (seq)",
            adapter.table
        ))
        .execute(&adapter.pool)
        .await
        .map_err(db_error)?;

        Ok(adapter)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn index_name(&self, field: &str) -> String {
        format!("{}_{}{}", self.table, field, UNIQUE_SUFFIX)
    }

    /// Field guarded by a unique index, from the index name
    fn field_for_constraint<'a>(&self, constraint: &'a str) -> Option<&'a str> {
        if constraint == format!("{}_pkey", self.table) {
            return Some(ID_KEY);
        }
        constraint
            .strip_prefix(self.table.as_str())?
            .strip_prefix('_')?
            .strip_suffix(UNIQUE_SUFFIX)
    }

    /// Maps a write error, recognising unique violations
    fn write_error(&self, e: sqlx::Error, record: &Record) -> AdapterError {
        if let sqlx::Error::Database(db) = &e {
            if db.code().as_deref() == Some("23505") {
                let field = db
                    .constraint()
                    .and_then(|c| self.field_for_constraint(c))
                    .unwrap_or(ID_KEY)
                    .to_string();
                let value = if field == ID_KEY {
                    Value::String(record.id.clone()).to_string()
                } else {
                    record.get(&field).map(Value::to_string).unwrap_or_default()
                };
                tracing::warn!(table = %self.table, field = %field, "unique constraint violated");
                return AdapterError::unique(field, value);
            }
        }
        db_error(e)
    }

    fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
        for (key, expected) in filter.as_document() {
            if key == ID_KEY {
                match expected.as_str() {
                    Some(id) => {
                        qb.push(" AND id = ").push_bind(id.to_string());
                    }
                    None => {
                        qb.push(" AND FALSE");
                    }
                }
                continue;
            }

            match expected {
                Value::Null => {
                    qb.push(" AND COALESCE(doc -> ")
                        .push_bind(key.clone())
                        .push(", 'null'::jsonb) = 'null'::jsonb");
                }
                Value::Object(_) => {
                    qb.push(" AND doc -> ")
                        .push_bind(key.clone())
                        .push(" @> ")
                        .push_bind(expected.clone());
                }
                _ => {
                    qb.push(" AND doc -> ")
                        .push_bind(key.clone())
                        .push(" = ")
                        .push_bind(expected.clone());
                }
            }
        }
    }

    fn decode_row(row: &PgRow) -> AdapterResult<Record> {
        let doc: Value = row.try_get("doc").map_err(db_error)?;
        match doc {
            Value::Object(map) => Ok(Record::from_document(map)?),
            other => Err(AdapterError::io(format!(
                "stored document is not an object: {}",
                other
            ))),
        }
    }

    /// Next matching row past `after` in `seq` order
    async fn fetch_after(&self, filter: &Filter, after: i64) -> AdapterResult<Option<(i64, Record)>> {
        let mut qb = QueryBuilder::new(format!("SELECT seq, doc FROM \"{}\" WHERE seq > ", self.table));
        qb.push_bind(after);
        Self::push_filter(&mut qb, filter);
        qb.push(" ORDER BY seq LIMIT 1");

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        match row {
            Some(row) => {
                let seq: i64 = row.try_get("seq").map_err(db_error)?;
                Ok(Some((seq, Self::decode_row(&row)?)))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl StorageAdapter for PostgresAdapter {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn insert(&self, fields: Document) -> AdapterResult<Record> {
        let record = Record::new(new_record_id(), fields);
        sqlx::query(&format!("INSERT INTO \"{}\" (id, doc) VALUES ($1, $2)", self.table))
            .bind(&record.id)
            .bind(Value::Object(record.to_document()))
            .execute(&self.pool)
            .await
            .map_err(|e| self.write_error(e, &record))?;
        Ok(record)
    }

    async fn find_by_id(&self, id: &str) -> AdapterResult<Option<Record>> {
        let row = sqlx::query(&format!("SELECT doc FROM \"{}\" WHERE id = $1", self.table))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(Self::decode_row).transpose()
    }

    async fn query(&self, filter: &Filter, window: QueryWindow) -> AdapterResult<Vec<Record>> {
        let mut qb = QueryBuilder::new(format!("SELECT doc FROM \"{}\" WHERE TRUE", self.table));
        Self::push_filter(&mut qb, filter);
        qb.push(" ORDER BY seq");
        if let Some(limit) = window.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }
        qb.push(" OFFSET ").push_bind(window.skip as i64);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter().map(Self::decode_row).collect()
    }

    async fn count(&self, filter: &Filter) -> AdapterResult<u64> {
        let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) AS n FROM \"{}\" WHERE TRUE", self.table));
        Self::push_filter(&mut qb, filter);

        let row = qb.build().fetch_one(&self.pool).await.map_err(db_error)?;
        let n: i64 = row.try_get("n").map_err(db_error)?;
        Ok(n as u64)
    }

    async fn update(&self, record: &Record) -> AdapterResult<()> {
        let result = sqlx::query(&format!("UPDATE \"{}\" SET doc = $2 WHERE id = $1", self.table))
            .bind(&record.id)
            .bind(Value::Object(record.to_document()))
            .execute(&self.pool)
            .await
            .map_err(|e| self.write_error(e, record))?;

        if result.rows_affected() == 0 {
            return Err(AdapterError::NotFound(record.id.clone()));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> AdapterResult<bool> {
        let result = sqlx::query(&format!("DELETE FROM \"{}\" WHERE id = $1", self.table))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self, filter: &Filter) -> AdapterResult<u64> {
        let mut qb = QueryBuilder::new(format!("DELETE FROM \"{}\" WHERE TRUE", self.table));
        Self::push_filter(&mut qb, filter);

        let result = qb.build().execute(&self.pool).await.map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn ensure_unique_index(&self, field: &str) -> AdapterResult<()> {
        check_identifier(field)?;
        let index = self.index_name(field);
        check_identifier(&index)?;

        // field is a checked identifier, safe inside a string literal
        let sql = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS \"{index}\" ON \"{table}\" ((doc -> '{field}')) \
             WHERE jsonb_typeof(doc -> '{field}') <> 'null'",
            index = index,
            table = self.table,
            field = field,
        );
        sqlx::query(&sql).execute(&self.pool).await.map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.code().as_deref() == Some("23505") {
                    return AdapterError::unique(field, "");
                }
            }
            db_error(e)
        })?;
        Ok(())
    }

    fn stream_query(&self, filter: Filter) -> RecordStream<'_> {
        stream::unfold(Some((filter, 0i64)), move |state| async move {
            let (filter, after) = state?;
            match self.fetch_after(&filter, after).await {
                Ok(Some((seq, record))) => Some((Ok(record), Some((filter, seq)))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }
}
