//! Criteria Core - Filter-to-Predicate Compilation and Entity Persistence
//!
//! This crate turns declarative filter objects into dynamic query predicates
//! and persists versioned entities with optimistic locking.
//!
//! # Architecture
//!
//! - **Filters are data**: filter objects carry values only; a per-entity
//!   query factory turns them into predicates through `PredicateBuilder`
//! - **Narrow storage seam**: the engine talks to an `EntityStore`; the
//!   store owns identity assignment, the version check and the cache
//! - **Explicit conflicts**: a stale merge surfaces as
//!   `EngineError::ObjectAlreadyModified`, never as a silent overwrite
//! - **libsql**: an embedded SQLite-compatible reference store, plus an
//!   in-memory one for tests
//!
//! # Modules
//!
//! - [`models`] - Values, ranges, filters, entities and locales
//! - [`db`] - Predicate algebra and the storage collaborators
//! - [`services`] - Predicate builder, query config and the query engine

pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use models::*;
pub use services::*;
