//! In-Memory Reference Store
//!
//! A complete [`EntityStore`] held in process memory. Predicates are
//! interpreted with SQL three-valued logic (see [`evaluate`](crate::db::evaluate)),
//! so results agree with a SQL store for the same [`SelectQuery`].
//!
//! # Architecture
//!
//! - Tables: `entity → (id → row)`, iterated in id order when no sort order
//!   is given
//! - One store-wide id counter; ids are never reused
//! - Check-and-increment of the version happens under a single write lock
//! - `find` reads through a shared [`EntityCache`]; writes go through it.
//!   [`apply_external_write`](MemoryStore::apply_external_write) bypasses the
//!   cache to model another process changing a row
//! - Sort orders place NULL first, as SQLite does

use crate::db::cache::EntityCache;
use crate::db::criteria::SortDirection;
use crate::db::entity_store::{EntityStore, SelectQuery};
use crate::db::error::StoreError;
use crate::db::evaluate::{eval_expr, RowMatcher};
use crate::models::{Row, RowExt, Value, ID_COLUMN, VERSION_COLUMN};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<String, BTreeMap<i64, Row>>,
    last_id: i64,
    sequences: HashMap<String, i64>,
    unit_of_work: Option<String>,
}

/// In-process [`EntityStore`]
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    cache: EntityCache,
    flushes: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The second-level cache backing `find`
    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    /// Write a row directly, skipping id assignment, the version check and the cache
    ///
    /// Stands in for a concurrent writer outside this store's unit of work.
    pub async fn apply_external_write(&self, entity: &str, row: Row) -> Result<(), StoreError> {
        let id = row
            .get_i64(ID_COLUMN)
            .map_err(|e| StoreError::decode(entity, e))?;
        let mut tables = self.tables.write().await;
        tables.last_id = tables.last_id.max(id);
        tables.rows.entry(entity.to_string()).or_default().insert(id, row);
        Ok(())
    }

    /// Number of stored rows for an entity
    pub async fn row_count(&self, entity: &str) -> usize {
        let tables = self.tables.read().await;
        tables.rows.get(entity).map_or(0, BTreeMap::len)
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Bind a fresh unit of work and return its id
    pub async fn begin_unit_of_work(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.tables.write().await.unit_of_work = Some(id.clone());
        tracing::debug!(unit_of_work = %id, "Began unit of work");
        id
    }

    pub async fn end_unit_of_work(&self) {
        if let Some(id) = self.tables.write().await.unit_of_work.take() {
            tracing::debug!(unit_of_work = %id, "Ended unit of work");
        }
    }

    async fn select(&self, query: &SelectQuery) -> Result<Vec<Row>, StoreError> {
        let params = query.parameter_map();
        let matcher = RowMatcher::new(&query.predicates, &params)?;
        let tables = self.tables.read().await;
        let mut rows = Vec::new();
        if let Some(table) = tables.rows.get(&query.entity) {
            for row in table.values() {
                if matcher.matches(row)? {
                    rows.push(row.clone());
                }
            }
        }
        drop(tables);

        if !query.orders.is_empty() {
            rows.sort_by(|a, b| {
                query
                    .orders
                    .iter()
                    .map(|order| {
                        let ordering = eval_expr(&order.expr, a).sort_cmp(&eval_expr(&order.expr, b));
                        match order.direction {
                            SortDirection::Asc => ordering,
                            SortDirection::Desc => ordering.reverse(),
                        }
                    })
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        if query.distinct {
            let mut seen = HashSet::new();
            rows.retain(|row| seen.insert(row.clone()));
        }
        Ok(rows)
    }
}

fn paginate<T>(items: Vec<T>, query: &SelectQuery) -> Vec<T> {
    let skip = query.first_result.map_or(0, |n| n as usize);
    let take = query.max_results.map_or(usize::MAX, |n| n as usize);
    items.into_iter().skip(skip).take(take).collect()
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn query_rows(&self, query: &SelectQuery) -> Result<Vec<Row>, StoreError> {
        tracing::trace!(entity = %query.entity, predicates = query.predicates.len(), "Selecting rows");
        let rows = self.select(query).await?;
        Ok(paginate(rows, query))
    }

    async fn query_column(
        &self,
        query: &SelectQuery,
        column: &str,
    ) -> Result<Vec<Value>, StoreError> {
        let mut values: Vec<Value> = self
            .select(query)
            .await?
            .iter()
            .map(|row| row.get_value(column).clone())
            .collect();
        if query.distinct {
            let mut seen = HashSet::new();
            values.retain(|value| seen.insert(value.clone()));
        }
        Ok(paginate(values, query))
    }

    async fn query_count(&self, query: &SelectQuery) -> Result<i64, StoreError> {
        let rows = self.select(query).await?;
        let count = if query.distinct {
            rows.iter()
                .map(|row| row.get_value(ID_COLUMN))
                .collect::<HashSet<_>>()
                .len()
        } else {
            rows.len()
        };
        Ok(count as i64)
    }

    async fn find(&self, entity: &str, id: i64) -> Result<Option<Row>, StoreError> {
        if let Some(row) = self.cache.get(entity, id).await {
            return Ok(Some(row));
        }
        let row = {
            let tables = self.tables.read().await;
            tables.rows.get(entity).and_then(|t| t.get(&id)).cloned()
        };
        if let Some(row) = &row {
            self.cache.put(entity, id, row.clone()).await;
        }
        Ok(row)
    }

    async fn insert(&self, entity: &str, mut row: Row) -> Result<Row, StoreError> {
        let mut tables = self.tables.write().await;
        tables.last_id += 1;
        let id = tables.last_id;
        row.insert(ID_COLUMN.to_string(), Value::Int(id));
        if row.contains_key(VERSION_COLUMN) {
            row.insert(VERSION_COLUMN.to_string(), Value::Int(0));
        }
        tables
            .rows
            .entry(entity.to_string())
            .or_default()
            .insert(id, row.clone());
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
        let mut tables = self.tables.write().await;
        let table = tables.rows.entry(entity.to_string()).or_default();
        row.insert(ID_COLUMN.to_string(), Value::Int(id));

        if let Some(expected) = expected_version {
            let actual = match table.get(&id) {
                Some(existing) => existing
                    .get_opt_i64(VERSION_COLUMN)
                    .map_err(|e| StoreError::decode(entity, e))?,
                None => None,
            };
            if actual != Some(expected) {
                tracing::warn!(entity, id, expected, ?actual, "Version conflict");
                return Err(StoreError::version_conflict(entity, id, expected, actual));
            }
            row.insert(VERSION_COLUMN.to_string(), Value::Int(expected + 1));
        }

        table.insert(id, row.clone());
        if tables.last_id < id {
            tables.last_id = id;
        }
        self.cache.put(entity, id, row.clone()).await;
        tracing::debug!(entity, id, "Updated row");
        Ok(row)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
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
        let mut tables = self.tables.write().await;
        let value = tables.sequences.entry(name.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn transaction_id(&self) -> Result<String, StoreError> {
        self.tables
            .read()
            .await
            .unit_of_work
            .clone()
            .ok_or_else(|| StoreError::sql("No unit of work is bound to the store"))
    }
}
