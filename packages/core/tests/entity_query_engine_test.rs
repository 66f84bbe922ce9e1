//! Integration tests for EntityQueryEngine
//!
//! Tests cover:
//! - Saving and loading auditable entities through a libsql database
//! - Optimistic locking surfaced as "already modified"
//! - Stale second-level cache entries and explicit refreshes
//! - Auditable filters compiled into predicates end to end
//! - Identical results from the in-memory and libsql stores for the same
//!   query configuration
//! - Split IN / NOT IN lists returning the same rows as unsplit ones

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use criteria_core::db::{EntityStore, Field, LibsqlStore, MemoryStore, Order, Projection};
use criteria_core::models::time::MockTimeProvider;
use criteria_core::models::{
    Auditable, AuditableEntity, AuditableEntityFilter, Entity, FilterStringField, Locale,
    PageableFilter, Range, Row, RowExt, Value,
};
use criteria_core::services::{
    Criteria, EngineConfig, EngineError, EntityQueryEngine, PredicateBuilder, QueryConfig,
};
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug, Clone, Default, PartialEq)]
struct Document {
    audit: AuditableEntity,
    title: String,
}

impl Document {
    const TITLE: Field<String> = Field::new("title");

    fn titled(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }
}

impl Entity for Document {
    const ENTITY_NAME: &'static str = "document";

    fn id(&self) -> i64 {
        self.audit.id
    }

    fn set_id(&mut self, id: i64) {
        self.audit.id = id;
    }

    fn version(&self) -> Option<i64> {
        Some(self.audit.version)
    }

    fn set_version(&mut self, version: i64) {
        self.audit.version = version;
    }

    fn to_row(&self) -> Row {
        let mut row = self.audit.to_row();
        row.insert(Self::TITLE.name().into(), Value::from(self.title.as_str()));
        row
    }

    fn from_row(row: &Row) -> anyhow::Result<Self> {
        Ok(Self {
            audit: AuditableEntity::from_row(row)?,
            title: row.get_str(Self::TITLE.name())?,
        })
    }
}

impl Auditable for Document {
    fn audit(&self) -> &AuditableEntity {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditableEntity {
        &mut self.audit
    }
}

const DOCUMENT_DDL: &str = "CREATE TABLE IF NOT EXISTS document (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created TEXT NOT NULL,
    edited TEXT NOT NULL,
    creator INTEGER,
    editor INTEGER,
    version INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER,
    title TEXT NOT NULL
)";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
}

/// Helper to create an engine over a fresh libsql database
async fn create_libsql_engine(
    config: EngineConfig,
) -> Result<(EntityQueryEngine, Arc<LibsqlStore>, Arc<MockTimeProvider>, TempDir)> {
    init_tracing();
    let temp_dir = TempDir::new()?;
    let store = Arc::new(LibsqlStore::open(temp_dir.path().join("test.db")).await?);
    store.execute_batch(DOCUMENT_DDL).await?;

    let clock = Arc::new(MockTimeProvider::with_time(start_time()));
    let engine = EntityQueryEngine::with_config(store.clone(), config)?.with_time_provider(clock.clone());
    Ok((engine, store, clock, temp_dir))
}

fn create_memory_engine() -> (EntityQueryEngine, Arc<MemoryStore>, Arc<MockTimeProvider>) {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(MockTimeProvider::with_time(start_time()));
    let engine = EntityQueryEngine::new(store.clone()).with_time_provider(clock.clone());
    (engine, store, clock)
}

/// Title, creating user, deleted flag and number of extra merges
const CORPUS: &[(&str, Option<i64>, bool, usize)] = &[
    ("Alpha release notes", Some(10), false, 0),
    ("Beta plan", Some(11), true, 0),
    ("alpha_beta 50% draft", None, false, 2),
    ("Gamma", Some(10), false, 1),
    ("Beta retrospective", Some(12), false, 0),
    ("Delta 50 percent", Some(11), false, 3),
];

/// Save the corpus one day apart; returns the final entities
async fn seed_corpus(engine: &EntityQueryEngine, clock: &MockTimeProvider) -> Result<Vec<Document>> {
    let mut saved = Vec::new();
    for (title, user, deleted, merges) in CORPUS {
        let mut doc = Document::titled(title);
        doc.audit.deleted = *deleted;
        let mut doc = engine.save_audited(doc, *user, true).await?;
        for _ in 0..*merges {
            doc = engine.save_audited(doc, Some(99), true).await?;
        }
        saved.push(doc);
        clock.advance(Duration::days(1));
    }
    Ok(saved)
}

async fn ids_for(engine: &EntityQueryEngine, config: QueryConfig) -> Result<Vec<i64>> {
    Ok(engine
        .list_entity_ids::<Document, _, _>(0, 0, |_| -> Result<QueryConfig, EngineError> {
            Ok(config.with_order(Order::asc(&AuditableEntity::ID)))
        })
        .await?)
}

fn auditable_config(
    criteria: &Criteria<Document>,
    filter: &AuditableEntityFilter,
) -> Result<QueryConfig, EngineError> {
    Ok(QueryConfig::from(EntityQueryEngine::add_auditable_entity_predicates(
        criteria, filter,
    ))
    .with_order(Order::asc(&AuditableEntity::ID)))
}

// =========================================================================
// Persistence
// =========================================================================

#[tokio::test]
async fn test_save_and_load_round_trip() -> Result<()> {
    let (engine, _store, clock, _temp_dir) = create_libsql_engine(EngineConfig::default()).await?;
    clock.advance(Duration::minutes(30));

    let saved = engine
        .save_audited(Document::titled("Quarterly report"), Some(7), true)
        .await?;
    assert_eq!(saved.id(), 1);
    assert_eq!(saved.audit.version, 0);
    assert_eq!(saved.audit.creator, Some(7));
    assert_eq!(saved.audit.created, start_time() + Duration::minutes(30));

    let loaded: Document = EntityQueryEngine::not_null(engine.load_entity(saved.id(), true).await?)?;
    assert_eq!(loaded, saved);
    Ok(())
}

#[tokio::test]
async fn test_stale_save_is_already_modified() -> Result<()> {
    let (engine, _store, _clock, _temp_dir) = create_libsql_engine(EngineConfig::default()).await?;

    let original = engine.save(Document::titled("draft"), true).await?;
    let mut first = original.clone();
    first.title = "first edit".into();
    let first = engine.save(first, true).await?;
    assert_eq!(first.audit.version, 1);

    let mut stale = original;
    stale.title = "lost update".into();
    let err = engine.save(stale, true).await.expect_err("stale copy must be rejected");
    assert!(err.is_already_modified());

    let current: Document = EntityQueryEngine::not_null(engine.load_entity(first.id(), true).await?)?;
    assert_eq!(current.title, "first edit");
    assert_eq!(current.audit.version, 1);
    Ok(())
}

#[tokio::test]
async fn test_find_or_create_with_stale_cache() -> Result<()> {
    let (engine, store, _clock, _temp_dir) = create_libsql_engine(EngineConfig::default()).await?;
    let saved = engine.save(Document::titled("cached"), true).await?;

    store
        .execute_batch("UPDATE document SET title = 'external', version = version + 1")
        .await?;

    let cached: Document = engine.find_or_create_entity(Some(saved.id()), false).await?;
    assert_eq!(cached.title, "cached");

    let fresh: Document = engine.find_or_create_entity(Some(saved.id()), true).await?;
    assert_eq!(fresh.title, "external");
    assert_eq!(fresh.audit.version, 1);

    let missing: Document = engine.find_or_create_entity(Some(404), true).await?;
    assert!(missing.is_transient());
    Ok(())
}

#[tokio::test]
async fn test_sequences_and_unit_of_work() -> Result<()> {
    let (engine, store, _clock, _temp_dir) = create_libsql_engine(EngineConfig::default()).await?;

    assert_eq!(engine.generate_id("invoice").await?, 1);
    assert_eq!(engine.generate_id("invoice").await?, 2);
    assert!(matches!(
        engine.generate_id(" ").await,
        Err(EngineError::InvalidArgument(_))
    ));

    assert_eq!(engine.transaction_id().await, "");
    let id = store.begin_unit_of_work().await?;
    assert_eq!(engine.transaction_id().await, id);
    store.end_unit_of_work(true).await?;
    assert_eq!(engine.transaction_id().await, "");
    Ok(())
}

// =========================================================================
// Queries
// =========================================================================

#[tokio::test]
async fn test_auditable_filter_on_libsql() -> Result<()> {
    let (engine, store, clock, _temp_dir) = create_libsql_engine(EngineConfig::default()).await?;
    let docs = seed_corpus(&engine, &clock).await?;

    // doc 4 gets a NULL deletion flag outside the engine
    store
        .execute_batch("UPDATE document SET deleted = NULL WHERE id = 4")
        .await?;

    let filter = AuditableEntityFilter::new()
        .with_ids([1, 2, 3, 4, 6])
        .with_deleted(false)
        .with_version(Range::between(1, 2));
    let ids = engine
        .list_ids_by_filter::<Document, _, _, _>(&filter, auditable_config)
        .await?;
    assert_eq!(ids, vec![docs[2].id(), docs[3].id()]);

    let count = engine
        .count_by_filter::<Document, _, _, _>(&filter, auditable_config)
        .await?;
    assert_eq!(count, 2);

    let by_creator = AuditableEntityFilter::new()
        .with_creators([11])
        .with_page(PageableFilter::new().with_max_results(1));
    let docs_by_creator: Vec<Document> = engine
        .list_by_filter::<Document, _, _, _>(&by_creator, auditable_config)
        .await?;
    assert_eq!(docs_by_creator.len(), 1);
    assert_eq!(docs_by_creator[0].title, "Beta plan");
    Ok(())
}

#[tokio::test]
async fn test_rendered_sql_is_available() -> Result<()> {
    let (engine, _store, _clock, _temp_dir) = create_libsql_engine(EngineConfig::default()).await?;

    let query = engine.build_query::<Document, _, _>(0, 10, |criteria| {
        let mut builder = criteria.builder(Locale::english());
        builder.like_text(&Document::TITLE, "Beta")?;
        Ok(QueryConfig::from(builder))
    })?;
    let sql = engine
        .sql_for(&query, &Projection::Rows)
        .expect("libsql renders SQL");
    assert_eq!(
        sql,
        "SELECT DISTINCT * FROM \"document\" WHERE lower(\"title\") LIKE ? ESCAPE ? LIMIT 10"
    );
    Ok(())
}

#[tokio::test]
async fn test_memory_and_libsql_agree() -> Result<()> {
    let (sql_engine, sql_store, sql_clock, _temp_dir) =
        create_libsql_engine(EngineConfig::default()).await?;
    let (mem_engine, mem_store, mem_clock) = create_memory_engine();

    let docs = seed_corpus(&sql_engine, &sql_clock).await?;
    let mem_docs = seed_corpus(&mem_engine, &mem_clock).await?;
    assert_eq!(docs, mem_docs);

    // doc 6 gets a NULL deletion flag in both stores
    sql_store
        .execute_batch("UPDATE document SET deleted = NULL WHERE id = 6")
        .await?;
    let mut raw = mem_store.find("document", 6).await?.expect("row should exist");
    raw.insert("deleted".into(), Value::Null);
    mem_store.apply_external_write("document", raw).await?;

    let criteria = sql_engine.criteria::<Document>();
    let mut configs = Vec::new();

    let mut builder = criteria.builder(Locale::english());
    builder.like_text(&Document::TITLE, "  ALPHA  ")?;
    configs.push(QueryConfig::from(builder));

    let mut builder = criteria.builder(Locale::english());
    builder.add(&Document::TITLE, &FilterStringField::starts_with("beta"))?;
    configs.push(QueryConfig::from(builder));

    let mut builder = criteria.builder(Locale::english());
    builder.add(&Document::TITLE, &FilterStringField::like("50%"))?;
    configs.push(QueryConfig::from(builder));

    let mut builder = criteria.builder(Locale::english());
    builder.add(&Document::TITLE, &FilterStringField::ends_with("_beta 50% draft"))?;
    configs.push(QueryConfig::from(builder));

    let mut builder = criteria.builder(Locale::english());
    builder.equal_bool(&AuditableEntity::DELETED, false);
    configs.push(QueryConfig::from(builder));

    let mut builder = criteria.builder(Locale::english());
    builder.not_equal_bool(&AuditableEntity::DELETED, false);
    configs.push(QueryConfig::from(builder));

    let mut builder = criteria.builder(Locale::english());
    builder.between(&AuditableEntity::VERSION, &Range::between(1, 2));
    configs.push(QueryConfig::from(builder));

    let mut builder = criteria.builder(Locale::english());
    builder.between(
        &AuditableEntity::CREATED,
        &Range::between(start_time() + Duration::days(1), start_time() + Duration::days(3)),
    );
    configs.push(QueryConfig::from(builder));

    let mut builder = criteria.builder(Locale::english());
    builder.not_in(&AuditableEntity::CREATOR, [10, 12]);
    configs.push(QueryConfig::from(builder));

    let mut builder = criteria.builder(Locale::english());
    builder.is_null(&AuditableEntity::CREATOR);
    builder
        .or()
        .equal(&AuditableEntity::ID, 1)
        .equal(&AuditableEntity::ID, 3);
    configs.push(QueryConfig::from(builder));

    let mut builder = criteria.builder(Locale::english());
    builder.greater_than(&AuditableEntity::EDITED, start_time() + Duration::days(2));
    builder.equal_parameter(&AuditableEntity::EDITOR, "editor");
    configs.push(QueryConfig::from(builder).with_parameter("editor", 99));

    let mut builder = criteria.builder(Locale::english());
    builder.not_equal_fields(&AuditableEntity::CREATOR, &AuditableEntity::EDITOR);
    configs.push(QueryConfig::from(builder));

    for config in configs {
        let description = format!("{:?}", config.predicates());
        let expected = ids_for(&mem_engine, config.clone()).await?;
        let actual = ids_for(&sql_engine, config).await?;
        assert_eq!(actual, expected, "stores disagree for {description}");
    }
    Ok(())
}

#[tokio::test]
async fn test_split_in_lists_match_unsplit_results() -> Result<()> {
    let split_config = EngineConfig {
        max_in_elements: 2,
        ..EngineConfig::default()
    };
    let (engine, _store, clock, _temp_dir) = create_libsql_engine(split_config).await?;
    seed_corpus(&engine, &clock).await?;

    let ids = [1, 3, 4, 6, 42];
    let reference = PredicateBuilder::new(Locale::english());

    let criteria = engine.criteria::<Document>();
    let mut split_in = criteria.builder(Locale::english());
    split_in.in_values(&AuditableEntity::ID, ids);
    let mut unsplit_in = reference.clone();
    unsplit_in.in_values(&AuditableEntity::ID, ids);

    let in_ids = ids_for(&engine, QueryConfig::from(split_in)).await?;
    assert_eq!(in_ids, vec![1, 3, 4, 6]);
    assert_eq!(in_ids, ids_for(&engine, QueryConfig::from(unsplit_in)).await?);

    let mut split_not_in = criteria.builder(Locale::english());
    split_not_in.not_in(&AuditableEntity::ID, ids);
    let mut unsplit_not_in = reference;
    unsplit_not_in.not_in(&AuditableEntity::ID, ids);

    let not_in_ids = ids_for(&engine, QueryConfig::from(split_not_in)).await?;
    assert_eq!(not_in_ids, vec![2, 5]);
    assert_eq!(
        not_in_ids,
        ids_for(&engine, QueryConfig::from(unsplit_not_in)).await?
    );
    Ok(())
}

#[tokio::test]
async fn test_paging_with_sort_orders() -> Result<()> {
    let (engine, _store, clock, _temp_dir) = create_libsql_engine(EngineConfig::default()).await?;
    seed_corpus(&engine, &clock).await?;

    let titles: Vec<String> = engine
        .list_entities::<Document, _, _>(1, 3, |_| -> Result<QueryConfig, EngineError> {
            Ok(QueryConfig::default()
                .with_order(Order::desc(&AuditableEntity::VERSION))
                .with_order(Order::asc(&Document::TITLE)))
        })
        .await?
        .into_iter()
        .map(|doc| doc.title)
        .collect();
    assert_eq!(titles, vec!["alpha_beta 50% draft", "Gamma", "Alpha release notes"]);

    let total = engine
        .count_entities::<Document, _, _>(|_| -> Result<Option<QueryConfig>, EngineError> { Ok(None) })
        .await?;
    assert_eq!(total, 6);
    Ok(())
}
