//! EntityStore Trait - Storage Collaborator
//!
//! This module defines the narrow interface the query engine uses to reach a
//! relational store. The engine never issues SQL itself; it hands a
//! [`SelectQuery`] to the store and relies on the store for identity
//! assignment, the version check, and cache control.
//!
//! # Architecture
//!
//! - **Query execution**: rows, a single projected column, or a count, with
//!   predicates, bind parameters, sort orders, distinct and pagination
//! - **Identity/version**: `insert` assigns the id and `version = 0`;
//!   `update` atomically verifies and increments the version, failing with
//!   [`StoreError::VersionConflict`] on mismatch
//! - **Second-level cache**: `find` reads through the cache; eviction by all,
//!   by type, or by `(type, id)`
//! - **Sequences / units of work**: named sequences and the current unit-of-work id
//!
//! # Implementations
//!
//! - [`MemoryStore`](crate::db::MemoryStore) - in-process reference store
//! - [`LibsqlStore`](crate::db::LibsqlStore) - libsql/SQLite
//!
//! # Design Decisions
//!
//! 1. **Async-First**: all methods are async so embedded and networked
//!    backends share one interface
//! 2. **Rows, not entities**: the store works on [`Row`]s; typed conversion
//!    stays in the engine
//! 3. **Eager writes**: stores apply writes immediately; `flush` is the hook
//!    for stores that buffer

use crate::db::criteria::{Order, Predicate};
use crate::db::error::StoreError;
use crate::db::evaluate::Parameters;
use crate::models::{Row, Value};
use async_trait::async_trait;

/// What a select returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Rows,
    Column(String),
    Count,
}

/// A fully described select against one entity table
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub entity: String,
    /// AND-combined
    pub predicates: Vec<Predicate>,
    /// Bind parameters in declaration order
    pub parameters: Vec<(String, Value)>,
    pub orders: Vec<Order>,
    pub distinct: bool,
    /// Rows to skip; `None` starts at the first row
    pub first_result: Option<u64>,
    /// Row limit; `None` is unbounded
    pub max_results: Option<u64>,
}

impl SelectQuery {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicates: Vec::new(),
            parameters: Vec::new(),
            orders: Vec::new(),
            distinct: false,
            first_result: None,
            max_results: None,
        }
    }

    pub fn with_predicates(mut self, predicates: Vec<Predicate>) -> Self {
        self.predicates = predicates;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    pub fn with_orders(mut self, orders: Vec<Order>) -> Self {
        self.orders = orders;
        self
    }

    pub fn with_distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    /// Values of zero or less mean "from the beginning"
    pub fn with_first_result(mut self, first_result: i64) -> Self {
        self.first_result = u64::try_from(first_result).ok().filter(|n| *n > 0);
        self
    }

    /// Values of zero or less mean "no limit"
    pub fn with_max_results(mut self, max_results: i64) -> Self {
        self.max_results = u64::try_from(max_results).ok().filter(|n| *n > 0);
        self
    }

    /// Parameters keyed by name; a later binding of the same name wins
    pub fn parameter_map(&self) -> Parameters {
        self.parameters.iter().cloned().collect()
    }
}

/// Abstraction layer for entity persistence
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the engine holds them as
/// `Arc<dyn EntityStore>`.
///
/// # Method Categories
///
/// - **Querying**: `query_rows`, `query_column`, `query_count`
/// - **Identity**: `find`, `insert`, `update`, `flush`
/// - **Cache**: `evict_all`, `evict_type`, `evict`
/// - **Unit of work**: `next_sequence_value`, `transaction_id`
/// - **Diagnostics**: `render_sql`
#[async_trait]
pub trait EntityStore: Send + Sync {
    //
    // QUERYING
    //

    async fn query_rows(&self, query: &SelectQuery) -> Result<Vec<Row>, StoreError>;

    /// Project a single column of the matching rows
    async fn query_column(&self, query: &SelectQuery, column: &str)
        -> Result<Vec<Value>, StoreError>;

    /// Number of matching rows; with `distinct`, the number of distinct ids
    async fn query_count(&self, query: &SelectQuery) -> Result<i64, StoreError>;

    //
    // IDENTITY & VERSIONING
    //

    /// Row by id, read through the second-level cache
    async fn find(&self, entity: &str, id: i64) -> Result<Option<Row>, StoreError>;

    /// Persist a transient row
    ///
    /// Assigns a positive id, and `version = 0` when the row carries a version
    /// column. Returns the stored row.
    async fn insert(&self, entity: &str, row: Row) -> Result<Row, StoreError>;

    /// Merge a row by id
    ///
    /// With `expected_version`, the stored version must equal it and is
    /// incremented by exactly one in the same atomic step; otherwise
    /// [`StoreError::VersionConflict`] (also when the row is gone). Without
    /// it, the row is written unconditionally. Returns the stored row.
    async fn update(
        &self,
        entity: &str,
        id: i64,
        expected_version: Option<i64>,
        row: Row,
    ) -> Result<Row, StoreError>;

    /// Make pending writes visible within the current unit of work
    async fn flush(&self) -> Result<(), StoreError>;

    //
    // SECOND-LEVEL CACHE
    //

    async fn evict_all(&self);

    async fn evict_type(&self, entity: &str);

    async fn evict(&self, entity: &str, id: i64);

    //
    // UNIT OF WORK
    //

    /// Next value of a named sequence, creating it on first use
    async fn next_sequence_value(&self, name: &str) -> Result<i64, StoreError>;

    /// Id of the unit of work bound to the store
    async fn transaction_id(&self) -> Result<String, StoreError>;

    //
    // DIAGNOSTICS
    //

    /// SQL text the store would execute, when it executes SQL at all
    fn render_sql(&self, _query: &SelectQuery, _projection: &Projection) -> Option<String> {
        None
    }
}
