//! libsql Store
//!
//! [`EntityStore`] over a libsql (SQLite-compatible) database. Queries are
//! rendered through a [`SqlDialect`] and executed with bound parameters.
//!
//! # Architecture
//!
//! - **Single connection**: one connection is held behind an async mutex so
//!   that an open unit of work (`BEGIN` … `COMMIT`) covers every statement,
//!   and so that `:memory:` databases keep their contents
//! - **Busy timeout**: 5 seconds, so concurrent writers wait instead of
//!   failing with `SQLITE_BUSY`
//! - **Optimistic locking**: a single guarded statement,
//!   `UPDATE … SET …, version = version + 1 WHERE id = ? AND version = ?`;
//!   zero affected rows is a version conflict
//! - **Storage forms**: booleans as `0`/`1`, timestamps as RFC3339 text with
//!   microseconds, so text order equals time order
//!
//! Tables are created by the caller (see [`execute_batch`](LibsqlStore::execute_batch));
//! only the sequence table is created on open.
//!
//! # Examples
//!
//! ```no_run
//! # use criteria_core::db::{EntityStore, LibsqlStore};
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = LibsqlStore::open("./data/criteria.db").await?;
//! store
//!     .execute_batch("CREATE TABLE IF NOT EXISTS tag (id INTEGER PRIMARY KEY, label TEXT)")
//!     .await?;
//! let next = store.next_sequence_value("invoice_number").await?;
//! # Ok(())
//! # }
//! ```

use crate::db::cache::EntityCache;
use crate::db::entity_store::{EntityStore, Projection, SelectQuery};
use crate::db::error::StoreError;
use crate::db::sql::{render_select, RenderedSql, SqlDialect, SqliteDialect, SEQUENCE_TABLE};
use crate::models::{format_timestamp, Row, Value, ID_COLUMN, VERSION_COLUMN};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use libsql::{Builder, Connection, Database};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

const BUSY_TIMEOUT_PRAGMA: &str = "PRAGMA busy_timeout = 5000";

/// libsql-backed [`EntityStore`]
pub struct LibsqlStore {
    /// Kept alive for the lifetime of the connection
    _db: Option<Database>,
    conn: Mutex<Connection>,
    dialect: Arc<dyn SqlDialect>,
    cache: EntityCache,
    unit_of_work: Mutex<Option<String>>,
}

impl LibsqlStore {
    /// Open (or create) a database file
    ///
    /// Creates the parent directory when missing, sets the busy timeout and
    /// creates the sequence table.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Builder::new_local(path).build().await.map_err(|e| {
            StoreError::sql(format!("Failed to open database at {}: {}", path.display(), e))
        })?;
        let conn = db.connect()?;
        let mut store = Self::with_connection(conn, Arc::new(SqliteDialect)).await?;
        store._db = Some(db);
        Ok(store)
    }

    /// Private in-memory database
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:").await
    }

    /// Wrap an existing connection with a custom dialect
    pub async fn with_connection(
        conn: Connection,
        dialect: Arc<dyn SqlDialect>,
    ) -> Result<Self, StoreError> {
        execute_pragma(&conn, BUSY_TIMEOUT_PRAGMA).await?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (name TEXT PRIMARY KEY, value INTEGER NOT NULL)",
                dialect.quote_identifier(SEQUENCE_TABLE)
            ),
            (),
        )
        .await
        .map_err(|e| StoreError::sql(format!("Failed to create sequence table: {}", e)))?;

        Ok(Self {
            _db: None,
            conn: Mutex::new(conn),
            dialect,
            cache: EntityCache::new(),
            unit_of_work: Mutex::new(None),
        })
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    /// Run caller DDL or other multi-statement SQL
    pub async fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute_batch(sql)
            .await
            .map_err(|e| StoreError::sql(format!("Failed to execute batch: {}", e)))?;
        Ok(())
    }

    /// `BEGIN` a transaction and bind a fresh unit-of-work id
    pub async fn begin_unit_of_work(&self) -> Result<String, StoreError> {
        let mut current = self.unit_of_work.lock().await;
        if let Some(id) = current.as_ref() {
            return Err(StoreError::sql(format!("Unit of work {} is already open", id)));
        }
        self.conn
            .lock()
            .await
            .execute("BEGIN TRANSACTION", ())
            .await
            .map_err(|e| StoreError::sql(format!("Failed to begin transaction: {}", e)))?;
        let id = uuid::Uuid::new_v4().to_string();
        *current = Some(id.clone());
        tracing::debug!(unit_of_work = %id, "Began unit of work");
        Ok(id)
    }

    /// `COMMIT` (or `ROLLBACK`) the open transaction
    pub async fn end_unit_of_work(&self, commit: bool) -> Result<(), StoreError> {
        let mut current = self.unit_of_work.lock().await;
        let Some(id) = current.take() else {
            return Ok(());
        };
        let conn = self.conn.lock().await;
        if commit {
            if let Err(e) = conn.execute("COMMIT", ()).await {
                let _rollback = conn.execute("ROLLBACK", ()).await;
                return Err(StoreError::sql(format!("Failed to commit transaction: {}", e)));
            }
        } else {
            conn.execute("ROLLBACK", ())
                .await
                .map_err(|e| StoreError::sql(format!("Failed to roll back transaction: {}", e)))?;
        }
        tracing::debug!(unit_of_work = %id, commit, "Ended unit of work");
        Ok(())
    }

    fn render(&self, query: &SelectQuery, projection: &Projection) -> Result<RenderedSql, StoreError> {
        let rendered = render_select(self.dialect.as_ref(), query, projection)?;
        tracing::trace!(sql = %rendered.sql, params = rendered.params.len(), "Rendered select");
        Ok(rendered)
    }

    async fn fetch(&self, entity: &str, sql: &str, params: Vec<Value>) -> Result<Vec<Row>, StoreError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(sql, to_libsql_params(params))
            .await
            .map_err(|e| StoreError::sql(format!("Failed to query {}: {}", entity, e)))?;

        let names: Vec<String> = (0..rows.column_count())
            .map(|i| rows.column_name(i).unwrap_or_default().to_string())
            .collect();

        let mut result = Vec::new();
        while let Some(row) = rows.next().await? {
            result.push(row_to_map(&row, &names).map_err(|e| StoreError::decode(entity, e))?);
        }
        Ok(result)
    }

    async fn fetch_values(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Value>, StoreError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(sql, to_libsql_params(params))
            .await
            .map_err(|e| StoreError::sql(format!("Failed to execute '{}': {}", sql, e)))?;
        let mut values = Vec::new();
        while let Some(row) = rows.next().await? {
            let value = row.get_value(0)?;
            values.push(from_libsql_value(value).map_err(|e| StoreError::decode("column", e))?);
        }
        Ok(values)
    }

    async fn stored_version(&self, entity: &str, id: i64) -> Result<Option<i64>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            self.dialect.quote_identifier(VERSION_COLUMN),
            self.dialect.quote_identifier(entity),
            self.dialect.quote_identifier(ID_COLUMN)
        );
        let values = self.fetch_values(&sql, vec![Value::Int(id)]).await?;
        Ok(values.first().and_then(Value::as_i64))
    }

    async fn row_exists(&self, entity: &str, id: i64) -> Result<bool, StoreError> {
        let sql = format!(
            "SELECT {0} FROM {1} WHERE {0} = ?",
            self.dialect.quote_identifier(ID_COLUMN),
            self.dialect.quote_identifier(entity)
        );
        Ok(!self.fetch_values(&sql, vec![Value::Int(id)]).await?.is_empty())
    }

    /// INSERT of `row`; the id column is included only when `with_id`
    async fn insert_row(&self, entity: &str, row: &Row, with_id: bool) -> Result<i64, StoreError> {
        let columns: Vec<(&String, &Value)> = row
            .iter()
            .filter(|(name, _)| with_id || name.as_str() != ID_COLUMN)
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.dialect.quote_identifier(entity),
            columns
                .iter()
                .map(|(name, _)| self.dialect.quote_identifier(name))
                .collect::<Vec<_>>()
                .join(", "),
            (1..=columns.len())
                .map(|i| self.dialect.placeholder(i))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let params: Vec<Value> = columns.into_iter().map(|(_, value)| value.clone()).collect();

        let conn = self.conn.lock().await;
        conn.execute(&sql, to_libsql_params(params))
            .await
            .map_err(|e| StoreError::sql(format!("Failed to insert {}: {}", entity, e)))?;
        Ok(conn.last_insert_rowid())
    }
}

#[async_trait]
impl EntityStore for LibsqlStore {
    async fn query_rows(&self, query: &SelectQuery) -> Result<Vec<Row>, StoreError> {
        let rendered = self.render(query, &Projection::Rows)?;
        self.fetch(&query.entity, &rendered.sql, rendered.params).await
    }

    async fn query_column(
        &self,
        query: &SelectQuery,
        column: &str,
    ) -> Result<Vec<Value>, StoreError> {
        let rendered = self.render(query, &Projection::Column(column.to_string()))?;
        self.fetch_values(&rendered.sql, rendered.params).await
    }

    async fn query_count(&self, query: &SelectQuery) -> Result<i64, StoreError> {
        let rendered = self.render(query, &Projection::Count)?;
        let values = self.fetch_values(&rendered.sql, rendered.params).await?;
        values
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| StoreError::sql(format!("Count query returned no value: {}", rendered.sql)))
    }

    async fn find(&self, entity: &str, id: i64) -> Result<Option<Row>, StoreError> {
        if let Some(row) = self.cache.get(entity, id).await {
            return Ok(Some(row));
        }
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            self.dialect.quote_identifier(entity),
            self.dialect.quote_identifier(ID_COLUMN)
        );
        let row = self
            .fetch(entity, &sql, vec![Value::Int(id)])
            .await?
            .into_iter()
            .next();
        if let Some(row) = &row {
            self.cache.put(entity, id, row.clone()).await;
        }
        Ok(row)
    }

    async fn insert(&self, entity: &str, mut row: Row) -> Result<Row, StoreError> {
        if row.contains_key(VERSION_COLUMN) {
            row.insert(VERSION_COLUMN.to_string(), Value::Int(0));
        }
        let id = self.insert_row(entity, &row, false).await?;
        row.insert(ID_COLUMN.to_string(), Value::Int(id));
        self.cache.put(entity, id, row.clone()).await;
        tracing::debug!(entity, id, "Inserted row");
        Ok(row)
    }

    async fn update(
        &self,
        entity: &str,
        id: i64,
        expected_version: Option<i64>,
        mut row: Row,
    ) -> Result<Row, StoreError> {
        row.insert(ID_COLUMN.to_string(), Value::Int(id));
        let columns: Vec<(&String, &Value)> = row
            .iter()
            .filter(|(name, _)| name.as_str() != ID_COLUMN && name.as_str() != VERSION_COLUMN)
            .collect();

        let mut assignments: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, (name, _))| {
                format!(
                    "{} = {}",
                    self.dialect.quote_identifier(name),
                    self.dialect.placeholder(i + 1)
                )
            })
            .collect();
        let mut params: Vec<Value> = columns.iter().map(|(_, value)| (*value).clone()).collect();

        let version = self.dialect.quote_identifier(VERSION_COLUMN);
        if expected_version.is_some() {
            assignments.push(format!("{0} = {0} + 1", version));
        }

        // an unversioned row holding only its id has nothing to set
        let rows_affected = if assignments.is_empty() {
            u64::from(self.row_exists(entity, id).await?)
        } else {
            let mut sql = format!(
                "UPDATE {} SET {} WHERE {} = {}",
                self.dialect.quote_identifier(entity),
                assignments.join(", "),
                self.dialect.quote_identifier(ID_COLUMN),
                self.dialect.placeholder(params.len() + 1)
            );
            params.push(Value::Int(id));
            if let Some(expected) = expected_version {
                sql.push_str(&format!(
                    " AND {} = {}",
                    version,
                    self.dialect.placeholder(params.len() + 1)
                ));
                params.push(Value::Int(expected));
            }

            let conn = self.conn.lock().await;
            conn.execute(&sql, to_libsql_params(params))
                .await
                .map_err(|e| StoreError::sql(format!("Failed to update {} {}: {}", entity, id, e)))?
        };

        match expected_version {
            Some(expected) if rows_affected == 0 => {
                let actual = self.stored_version(entity, id).await?;
                tracing::warn!(entity, id, expected, ?actual, "Version conflict");
                return Err(StoreError::version_conflict(entity, id, expected, actual));
            }
            Some(expected) => {
                row.insert(VERSION_COLUMN.to_string(), Value::Int(expected + 1));
            }
            None if rows_affected == 0 => {
                self.insert_row(entity, &row, true).await?;
            }
            None => {}
        }

        self.cache.put(entity, id, row.clone()).await;
        tracing::debug!(entity, id, "Updated row");
        Ok(row)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        // statements are executed eagerly on the held connection
        Ok(())
    }

    async fn evict_all(&self) {
        self.cache.evict_all().await;
    }

    async fn evict_type(&self, entity: &str) {
        self.cache.evict_type(entity).await;
    }

    async fn evict(&self, entity: &str, id: i64) {
        self.cache.evict(entity, id).await;
    }

    async fn next_sequence_value(&self, name: &str) -> Result<i64, StoreError> {
        let sql = self.dialect.create_sequence_next_value_sql();
        let values = self
            .fetch_values(&sql, vec![Value::Text(name.to_string())])
            .await?;
        values
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| StoreError::sql(format!("Sequence {} returned no value", name)))
    }

    async fn transaction_id(&self) -> Result<String, StoreError> {
        self.unit_of_work
            .lock()
            .await
            .clone()
            .ok_or_else(|| StoreError::sql("No transaction is open"))
    }

    fn render_sql(&self, query: &SelectQuery, projection: &Projection) -> Option<String> {
        render_select(self.dialect.as_ref(), query, projection)
            .ok()
            .map(|rendered| rendered.sql)
    }
}

/// Execute a PRAGMA statement
///
/// PRAGMA statements return rows, so they go through `query` rather than
/// `execute`.
async fn execute_pragma(conn: &Connection, pragma: &str) -> Result<(), StoreError> {
    let mut stmt = conn
        .prepare(pragma)
        .await
        .map_err(|e| StoreError::sql(format!("Failed to execute '{}': {}", pragma, e)))?;
    let _ = stmt
        .query(())
        .await
        .map_err(|e| StoreError::sql(format!("Failed to execute '{}': {}", pragma, e)))?;
    Ok(())
}

fn to_libsql_value(value: Value) -> libsql::Value {
    match value {
        Value::Null => libsql::Value::Null,
        Value::Bool(b) => libsql::Value::Integer(i64::from(b)),
        Value::Int(i) => libsql::Value::Integer(i),
        Value::Text(s) => libsql::Value::Text(s),
        Value::Timestamp(ts) => libsql::Value::Text(format_timestamp(&ts)),
    }
}

fn to_libsql_params(values: Vec<Value>) -> Vec<libsql::Value> {
    values.into_iter().map(to_libsql_value).collect()
}

fn from_libsql_value(value: libsql::Value) -> anyhow::Result<Value> {
    match value {
        libsql::Value::Null => Ok(Value::Null),
        libsql::Value::Integer(i) => Ok(Value::Int(i)),
        libsql::Value::Text(s) => Ok(Value::Text(s)),
        libsql::Value::Real(r) => Err(anyhow!("Unsupported REAL value {}", r)),
        libsql::Value::Blob(b) => Err(anyhow!("Unsupported BLOB value of {} bytes", b.len())),
    }
}

/// Convert a libsql row into a column map
fn row_to_map(row: &libsql::Row, names: &[String]) -> anyhow::Result<Row> {
    let mut map = Row::new();
    for (i, name) in names.iter().enumerate() {
        let value = row
            .get_value(i as i32)
            .with_context(|| format!("Failed to get {}", name))?;
        let value = from_libsql_value(value).with_context(|| format!("Failed to decode {}", name))?;
        map.insert(name.clone(), value);
    }
    Ok(map)
}
