//! Query Configuration
//!
//! [`QueryConfig`] bundles what an entity-specific query factory decides:
//! predicates, bind parameters, sort orders and the distinct flag. The
//! [`EntityQueryEngine`](crate::services::EntityQueryEngine) asks the factory
//! for one per operation and consumes it exactly once.
//!
//! Factories receive a [`Criteria`] bound to the entity type, which hands out
//! [`PredicateBuilder`]s configured like the engine.

use crate::db::{Order, Predicate, SelectQuery};
use crate::models::{Entity, Filter, Locale, Value};
use crate::services::config::EngineConfig;
use crate::services::predicate_builder::PredicateBuilder;
use std::marker::PhantomData;

/// Predicates, parameters, ordering and distinct flag for one query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryConfig {
    predicates: Vec<Predicate>,
    parameters: Vec<(String, Value)>,
    sort_orders: Vec<Order>,
    distinct: bool,
}

impl Default for QueryConfig {
    /// No predicates, parameters or ordering; distinct
    fn default() -> Self {
        Self {
            predicates: Vec::new(),
            parameters: Vec::new(),
            sort_orders: Vec::new(),
            distinct: true,
        }
    }
}

impl QueryConfig {
    /// Distinct query over `predicates`
    pub fn new(predicates: Vec<Predicate>) -> Self {
        Self {
            predicates,
            ..Self::default()
        }
    }

    /// Resolve a builder into a config
    pub fn from_builder(builder: PredicateBuilder) -> Self {
        Self::new(builder.into_predicates())
    }

    /// Bind `:name`; parameters are applied in the order they were added
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    pub fn with_sort_orders(mut self, sort_orders: Vec<Order>) -> Self {
        self.sort_orders = sort_orders;
        self
    }

    pub fn with_order(mut self, order: Order) -> Self {
        self.sort_orders.push(order);
        self
    }

    pub fn with_distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn parameters(&self) -> &[(String, Value)] {
        &self.parameters
    }

    pub fn sort_orders(&self) -> &[Order] {
        &self.sort_orders
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// Select against `entity`; pagination values of zero or less are unbounded
    pub fn into_select(self, entity: &str, first_result: i64, max_results: i64) -> SelectQuery {
        let mut query = SelectQuery::new(entity)
            .with_predicates(self.predicates)
            .with_orders(self.sort_orders)
            .with_distinct(self.distinct)
            .with_first_result(first_result)
            .with_max_results(max_results);
        query.parameters = self.parameters;
        query
    }
}

impl From<PredicateBuilder> for QueryConfig {
    fn from(builder: PredicateBuilder) -> Self {
        Self::from_builder(builder)
    }
}

/// Query context handed to factories, bound to one entity type
pub struct Criteria<E> {
    config: EngineConfig,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Criteria<E> {
    pub(crate) fn new(config: EngineConfig) -> Self {
        Self {
            config,
            _entity: PhantomData,
        }
    }

    pub fn entity_name(&self) -> &'static str {
        E::ENTITY_NAME
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Builder folding case with `locale`
    pub fn builder(&self, locale: Locale) -> PredicateBuilder {
        PredicateBuilder::from_validated(locale, &self.config)
    }

    /// Builder using the filter's locale, resolved once here
    pub fn builder_for(&self, filter: &impl Filter) -> PredicateBuilder {
        self.builder(filter.locale())
    }
}

impl<E> std::fmt::Debug for Criteria<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Criteria")
            .field("entity", &std::any::type_name::<E>())
            .field("config", &self.config)
            .finish()
    }
}
