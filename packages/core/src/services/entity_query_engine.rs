//! Entity Query Engine - Generic Query and Persistence Operations
//!
//! This module provides the entity access layer on top of an
//! [`EntityStore`]:
//!
//! - Count / list / list-ids driven by a caller-supplied query factory
//! - Save with optimistic locking and explicit conflict reporting
//! - Find-or-create and load, optionally bypassing the second-level cache
//! - Cache eviction, named sequences and the current unit-of-work id
//!
//! # Query Factories
//!
//! Every query operation takes a factory closure. It receives a
//! [`Criteria`] bound to the entity type (and, for the `*_by_filter`
//! variants, the filter) and returns the [`QueryConfig`] to run. A factory
//! returning `None` runs the default config: no predicates, no ordering,
//! distinct.
//!
//! # Versioning
//!
//! `new → inserted (version 0) → merged (+1) → …`. The store performs the
//! check-and-increment; a merge against a stale version fails with
//! [`EngineError::ObjectAlreadyModified`]. The engine never retries.
//!
//! # Examples
//!
//! ```rust
//! # use criteria_core::db::MemoryStore;
//! # use criteria_core::models::{Auditable, AuditableEntity, AuditableEntityFilter, Entity, Filter, Row};
//! # use criteria_core::services::{EntityQueryEngine, QueryConfig};
//! # use std::sync::Arc;
//! # #[derive(Debug, Clone, Default)]
//! # struct Tag(AuditableEntity);
//! # impl Entity for Tag {
//! #     const ENTITY_NAME: &'static str = "tag";
//! #     fn id(&self) -> i64 { self.0.id }
//! #     fn set_id(&mut self, id: i64) { self.0.id = id; }
//! #     fn version(&self) -> Option<i64> { Some(self.0.version) }
//! #     fn set_version(&mut self, v: i64) { self.0.version = v; }
//! #     fn to_row(&self) -> Row { self.0.to_row() }
//! #     fn from_row(row: &Row) -> anyhow::Result<Self> { AuditableEntity::from_row(row).map(Tag) }
//! # }
//! # impl Auditable for Tag {
//! #     fn audit(&self) -> &AuditableEntity { &self.0 }
//! #     fn audit_mut(&mut self) -> &mut AuditableEntity { &mut self.0 }
//! # }
//! # async fn run() -> Result<(), criteria_core::services::EngineError> {
//! let engine = EntityQueryEngine::new(Arc::new(MemoryStore::new()));
//! let tag = engine.save(Tag::default(), true).await?;
//! assert_eq!(tag.0.version, 0);
//!
//! let filter = AuditableEntityFilter::new().with_deleted(false);
//! let tags: Vec<Tag> = engine
//!     .list_by_filter(&filter, |criteria, filter| {
//!         let builder = EntityQueryEngine::add_auditable_entity_predicates(criteria, filter);
//!         Ok(QueryConfig::from(builder).with_distinct(filter.distinct()))
//!     })
//!     .await?;
//! assert_eq!(tags.len(), 1);
//! # Ok(())
//! # }
//! ```

use crate::db::{EntityStore, Projection, SelectQuery, StoreError};
use crate::models::time::{SystemTimeProvider, TimeProvider};
use crate::models::{
    Auditable, AuditableEntity, AuditableEntityFilter, Entity, Filter, Row, ID_COLUMN,
};
use crate::services::config::EngineConfig;
use crate::services::error::EngineError;
use crate::services::predicate_builder::PredicateBuilder;
use crate::services::query_config::{Criteria, QueryConfig};
use std::sync::Arc;

/// Generic entity query and persistence engine
///
/// Stateless apart from its collaborators; entities are never retained
/// beyond a single call.
#[derive(Clone)]
pub struct EntityQueryEngine {
    store: Arc<dyn EntityStore>,
    config: EngineConfig,
    clock: Arc<dyn TimeProvider>,
}

impl EntityQueryEngine {
    /// Engine with the default configuration and the wall clock
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            config: EngineConfig::default(),
            clock: Arc::new(SystemTimeProvider),
        }
    }

    pub fn with_config(store: Arc<dyn EntityStore>, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new(store)
        })
    }

    /// Engine configured from `CRITERIA_*` environment variables
    pub fn from_env(store: Arc<dyn EntityStore>) -> Result<Self, EngineError> {
        Self::with_config(store, EngineConfig::from_env())
    }

    /// Clock used by [`save_audited`](Self::save_audited)
    pub fn with_time_provider(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Factory context for `E`
    pub fn criteria<E: Entity>(&self) -> Criteria<E> {
        Criteria::new(self.config.clone())
    }

    //
    // QUERIES
    //

    /// Number of matching entities; distinct configs count distinct ids
    pub async fn count_entities<E, F, C>(&self, factory: F) -> Result<i64, EngineError>
    where
        E: Entity,
        F: FnOnce(&Criteria<E>) -> Result<C, EngineError>,
        C: Into<Option<QueryConfig>>,
    {
        let query = self.build_query(0, 0, factory)?;
        self.log_sql(&query, &Projection::Count);
        Ok(self.store.query_count(&query).await?)
    }

    pub async fn count_by_filter<E, T, F, C>(&self, filter: &T, factory: F) -> Result<i64, EngineError>
    where
        E: Entity,
        T: Filter,
        F: FnOnce(&Criteria<E>, &T) -> Result<C, EngineError>,
        C: Into<Option<QueryConfig>>,
    {
        self.count_entities::<E, _, C>(|criteria| factory(criteria, filter)).await
    }

    /// Matching entities; `first_result` / `max_results` of zero or less are unbounded
    pub async fn list_entities<E, F, C>(
        &self,
        first_result: i64,
        max_results: i64,
        factory: F,
    ) -> Result<Vec<E>, EngineError>
    where
        E: Entity,
        F: FnOnce(&Criteria<E>) -> Result<C, EngineError>,
        C: Into<Option<QueryConfig>>,
    {
        let query = self.build_query(first_result, max_results, factory)?;
        self.log_sql(&query, &Projection::Rows);
        let rows = self.store.query_rows(&query).await?;
        rows.iter().map(decode::<E>).collect()
    }

    /// [`list_entities`](Self::list_entities) paged by the filter
    pub async fn list_by_filter<E, T, F, C>(&self, filter: &T, factory: F) -> Result<Vec<E>, EngineError>
    where
        E: Entity,
        T: Filter,
        F: FnOnce(&Criteria<E>, &T) -> Result<C, EngineError>,
        C: Into<Option<QueryConfig>>,
    {
        self.list_entities::<E, _, C>(filter.first_result(), filter.max_results(), |criteria| {
            factory(criteria, filter)
        })
        .await
    }

    /// Ids of the matching entities
    pub async fn list_entity_ids<E, F, C>(
        &self,
        first_result: i64,
        max_results: i64,
        factory: F,
    ) -> Result<Vec<i64>, EngineError>
    where
        E: Entity,
        F: FnOnce(&Criteria<E>) -> Result<C, EngineError>,
        C: Into<Option<QueryConfig>>,
    {
        let query = self.build_query(first_result, max_results, factory)?;
        let projection = Projection::Column(ID_COLUMN.to_string());
        self.log_sql(&query, &projection);
        let values = self.store.query_column(&query, ID_COLUMN).await?;
        values
            .iter()
            .map(|value| {
                value.as_i64().ok_or_else(|| {
                    EngineError::from(StoreError::decode(
                        E::ENTITY_NAME,
                        anyhow::anyhow!("Non-integer id: {}", value),
                    ))
                })
            })
            .collect()
    }

    pub async fn list_ids_by_filter<E, T, F, C>(&self, filter: &T, factory: F) -> Result<Vec<i64>, EngineError>
    where
        E: Entity,
        T: Filter,
        F: FnOnce(&Criteria<E>, &T) -> Result<C, EngineError>,
        C: Into<Option<QueryConfig>>,
    {
        self.list_entity_ids::<E, _, C>(filter.first_result(), filter.max_results(), |criteria| {
            factory(criteria, filter)
        })
        .await
    }

    /// Run the factory and describe the resulting select without executing it
    pub fn build_query<E, F, C>(
        &self,
        first_result: i64,
        max_results: i64,
        factory: F,
    ) -> Result<SelectQuery, EngineError>
    where
        E: Entity,
        F: FnOnce(&Criteria<E>) -> Result<C, EngineError>,
        C: Into<Option<QueryConfig>>,
    {
        let criteria = self.criteria::<E>();
        let config = factory(&criteria)?.into().unwrap_or_default();
        let query = config.into_select(E::ENTITY_NAME, first_result, max_results);
        tracing::trace!(
            entity = E::ENTITY_NAME,
            predicates = query.predicates.len(),
            parameters = query.parameters.len(),
            orders = query.orders.len(),
            distinct = query.distinct,
            "Built query"
        );
        Ok(query)
    }

    /// SQL the store would run for `query`, if it speaks SQL
    pub fn sql_for(&self, query: &SelectQuery, projection: &Projection) -> Option<String> {
        self.store.render_sql(query, projection)
    }

    fn log_sql(&self, query: &SelectQuery, projection: &Projection) {
        if tracing::enabled!(tracing::Level::DEBUG) {
            if let Some(sql) = self.sql_for(query, projection) {
                tracing::debug!(entity = %query.entity, sql = %sql, "Executing query");
            }
        }
    }

    //
    // PERSISTENCE
    //

    /// Insert a transient entity or merge a persistent one
    ///
    /// Returns the stored state with id and version refreshed. A merge
    /// against a stale version fails with
    /// [`EngineError::ObjectAlreadyModified`]; inserts never do. With
    /// `flush`, the write is made visible within the current unit of work.
    pub async fn save<E: Entity>(&self, entity: E, flush: bool) -> Result<E, EngineError> {
        let id = entity.id();
        let merging = !entity.is_transient();
        let row = entity.to_row();

        let stored = if merging {
            self.store
                .update(E::ENTITY_NAME, id, entity.version(), row)
                .await
                .map_err(|e| merge_error::<E>(id, e))?
        } else {
            self.store.insert(E::ENTITY_NAME, row).await?
        };

        if flush {
            self.store.flush().await.map_err(|e| {
                if merging {
                    merge_error::<E>(id, e)
                } else {
                    e.into()
                }
            })?;
        }

        let saved = decode::<E>(&stored)?;
        tracing::debug!(
            entity = E::ENTITY_NAME,
            id = saved.id(),
            version = ?saved.version(),
            merged = merging,
            "Saved entity"
        );
        Ok(saved)
    }

    /// [`save`](Self::save) passing `None` through
    pub async fn save_optional<E: Entity>(&self, entity: Option<E>, flush: bool) -> Result<Option<E>, EngineError> {
        match entity {
            Some(entity) => self.save(entity, flush).await.map(Some),
            None => Ok(None),
        }
    }

    /// Stamp the audit columns for `user` and save
    ///
    /// `created`/`creator` are set on insert only; `edited`/`editor` on
    /// every save.
    pub async fn save_audited<E: Auditable>(
        &self,
        mut entity: E,
        user: Option<i64>,
        flush: bool,
    ) -> Result<E, EngineError> {
        let now = self.clock.now();
        let transient = entity.is_transient();
        let audit = entity.audit_mut();
        if transient {
            audit.created = now;
            audit.creator = user;
        }
        audit.edited = now;
        audit.editor = user;
        self.save(entity, flush).await
    }

    //
    // LOOKUP
    //

    /// A fresh transient instance
    pub fn create_entity<E: Entity>(&self) -> E {
        E::default()
    }

    /// Entity by id, or a fresh transient instance
    ///
    /// `None` or `0` always creates. With `clear_cache` the cached copy is
    /// evicted before the lookup.
    pub async fn find_or_create_entity<E: Entity>(&self, id: Option<i64>, clear_cache: bool) -> Result<E, EngineError> {
        self.find_or_create_with(id, clear_cache, E::default).await
    }

    /// [`find_or_create_entity`](Self::find_or_create_entity) with a custom factory
    pub async fn find_or_create_with<E, N>(&self, id: Option<i64>, clear_cache: bool, create: N) -> Result<E, EngineError>
    where
        E: Entity,
        N: FnOnce() -> E,
    {
        if let Some(id) = id.filter(|id| *id != 0) {
            if let Some(entity) = self.load_entity::<E>(id, clear_cache).await? {
                return Ok(entity);
            }
            tracing::trace!(entity = E::ENTITY_NAME, id, "Not found, creating");
        }
        Ok(create())
    }

    /// First query result, or a fresh transient instance
    ///
    /// With `clear_cache` the found entity is evicted and re-read.
    pub async fn find_or_create_entity_by<E, F, C>(&self, factory: F, clear_cache: bool) -> Result<E, EngineError>
    where
        E: Entity,
        F: FnOnce(&Criteria<E>) -> Result<C, EngineError>,
        C: Into<Option<QueryConfig>>,
    {
        Ok(self
            .load_entity_by(factory, clear_cache)
            .await?
            .unwrap_or_default())
    }

    /// Entity by id, read through the cache unless `clear_cache`
    pub async fn load_entity<E: Entity>(&self, id: i64, clear_cache: bool) -> Result<Option<E>, EngineError> {
        if clear_cache {
            self.clear_cache_entity::<E>(id).await;
        }
        self.store
            .find(E::ENTITY_NAME, id)
            .await?
            .map(|row| decode::<E>(&row))
            .transpose()
    }

    /// First query result; with `clear_cache` it is evicted and re-read
    pub async fn load_entity_by<E, F, C>(&self, factory: F, clear_cache: bool) -> Result<Option<E>, EngineError>
    where
        E: Entity,
        F: FnOnce(&Criteria<E>) -> Result<C, EngineError>,
        C: Into<Option<QueryConfig>>,
    {
        let first = self.list_entities::<E, _, _>(0, 1, factory).await?.into_iter().next();
        match first {
            Some(entity) if clear_cache => self.load_entity(entity.id(), true).await,
            other => Ok(other),
        }
    }

    /// `Some` unwrapped, `None` as [`EngineError::ObjectNotFound`]
    pub fn not_null<T>(value: Option<T>) -> Result<T, EngineError> {
        value.ok_or(EngineError::ObjectNotFound)
    }

    //
    // CACHE
    //

    pub async fn clear_cache(&self) {
        tracing::debug!("Evicting second-level cache");
        self.store.evict_all().await;
    }

    pub async fn clear_cache_for<E: Entity>(&self) {
        tracing::debug!(entity = E::ENTITY_NAME, "Evicting entity type from cache");
        self.store.evict_type(E::ENTITY_NAME).await;
    }

    pub async fn clear_cache_entity<E: Entity>(&self, id: i64) {
        tracing::debug!(entity = E::ENTITY_NAME, id, "Evicting entity from cache");
        self.store.evict(E::ENTITY_NAME, id).await;
    }

    /// Evict a persistent instance; transient ones have nothing cached
    pub async fn clear_cache_of<E: Entity>(&self, entity: &E) {
        if !entity.is_transient() {
            self.clear_cache_entity::<E>(entity.id()).await;
        }
    }

    //
    // FILTERS
    //

    /// Predicates for the audit columns of `filter`
    ///
    /// Deletion state is boolean-aware (`Some(false)` also matches NULL);
    /// ids, creators and editors become IN lists; created, edited and
    /// version become ranges. The returned builder uses the filter's locale
    /// and can take further entity-specific predicates.
    ///
    /// A builder converts to a distinct [`QueryConfig`]; carry the filter's
    /// flag over explicitly:
    ///
    /// ```ignore
    /// let builder = EntityQueryEngine::add_auditable_entity_predicates(criteria, filter);
    /// Ok(QueryConfig::from(builder).with_distinct(filter.distinct()))
    /// ```
    pub fn add_auditable_entity_predicates<E: Auditable>(
        criteria: &Criteria<E>,
        filter: &AuditableEntityFilter,
    ) -> PredicateBuilder {
        let mut builder = criteria.builder_for(filter);
        builder
            .equal_bool(&AuditableEntity::DELETED, filter.deleted)
            .in_values(&AuditableEntity::ID, filter.ids().into_iter().flatten().copied())
            .in_values(&AuditableEntity::CREATOR, filter.creators.iter().flatten().copied())
            .in_values(&AuditableEntity::EDITOR, filter.editors.iter().flatten().copied())
            .between(&AuditableEntity::CREATED, filter.created.as_ref())
            .between(&AuditableEntity::EDITED, filter.edited.as_ref())
            .between(&AuditableEntity::VERSION, filter.version.as_ref());
        builder
    }

    //
    // UNIT OF WORK
    //

    /// Next value of a named sequence
    pub async fn generate_id(&self, sequence_name: &str) -> Result<i64, EngineError> {
        if sequence_name.trim().is_empty() {
            return Err(EngineError::invalid_argument("sequence name cannot be blank"));
        }
        Ok(self.store.next_sequence_value(sequence_name).await?)
    }

    /// Id of the current unit of work, or an empty string when there is none
    pub async fn transaction_id(&self) -> String {
        match self.store.transaction_id().await {
            Ok(id) => id,
            Err(e) => {
                tracing::trace!("No transaction id: {}", e);
                String::new()
            }
        }
    }
}

impl std::fmt::Debug for EntityQueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityQueryEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn decode<E: Entity>(row: &Row) -> Result<E, EngineError> {
    E::from_row(row).map_err(|e| EngineError::from(StoreError::decode(E::ENTITY_NAME, e)))
}

fn merge_error<E: Entity>(id: i64, error: StoreError) -> EngineError {
    if error.is_version_conflict() {
        tracing::warn!(entity = E::ENTITY_NAME, id, "Object already modified: {}", error);
        EngineError::object_already_modified(E::ENTITY_NAME, id, error)
    } else {
        error.into()
    }
}

#[cfg(test)]
#[path = "entity_query_engine_test.rs"]
mod entity_query_engine_test;
