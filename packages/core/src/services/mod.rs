//! Query Services
//!
//! This module contains the filter-to-query layer:
//!
//! - `PredicateBuilder` - turns filter primitives into predicate nodes
//! - `QueryConfig` / `Criteria` - what a query factory hands the engine
//! - `EntityQueryEngine` - count/list/save/find-or-create against a store
//! - `EngineConfig` - IN-list limit and LIKE escape character
//!
//! Services sit between caller-defined filters and the storage layer; they
//! own the typed entity conversion and the optimistic-locking error mapping.

pub mod config;
pub mod entity_query_engine;
pub mod error;
pub mod predicate_builder;
pub mod query_config;

pub use config::EngineConfig;
pub use entity_query_engine::EntityQueryEngine;
pub use error::EngineError;
pub use predicate_builder::PredicateBuilder;
pub use query_config::{Criteria, QueryConfig};
