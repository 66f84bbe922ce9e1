//! Database Layer
//!
//! The storage side of the query engine:
//!
//! - [`criteria`] - predicate algebra (fields, expressions, predicates, orders)
//! - [`EntityStore`] - the narrow storage collaborator interface
//! - [`MemoryStore`] - in-process reference implementation
//! - [`LibsqlStore`] - libsql/SQLite implementation
//! - [`SqlDialect`] - the single pluggable SQL generation hook
//! - [`EntityCache`] - second-level cache shared by the stores
//!
//! # Architecture
//!
//! The engine hands a [`SelectQuery`] (predicates, bind parameters, orders,
//! distinct, pagination) to the store. Stores own identity assignment, the
//! atomic version check-and-increment, and cache eviction; the engine owns
//! everything typed.

mod cache;
pub mod criteria;
mod entity_store;
mod error;
pub mod evaluate;
mod libsql_store;
mod memory_store;
mod sql;

pub use cache::{CacheStats, EntityCache};
pub use criteria::{CompareOp, Expr, Field, Operand, Order, Predicate, SortDirection};
pub use entity_store::{EntityStore, Projection, SelectQuery};
pub use error::StoreError;
pub use evaluate::Parameters;
pub use libsql_store::LibsqlStore;
pub use memory_store::MemoryStore;
pub use sql::{render_select, RenderedSql, SqlDialect, SqliteDialect, SEQUENCE_TABLE};
