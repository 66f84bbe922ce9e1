//! Integration tests for LibsqlStore
//!
//! Tests cover:
//! - Opening file databases (parent directory creation, reopen)
//! - Inserts, merges and the guarded version increment
//! - Predicate rendering against real rows (NULL handling, LIKE escapes, IN)
//! - Ordering, pagination and projections
//! - Sequences, units of work and the second-level cache

use anyhow::Result;
use criteria_core::db::{
    EntityStore, Field, LibsqlStore, Operand, Order, Predicate, Projection, SelectQuery,
    StoreError,
};
use criteria_core::models::{Row, Value};
use tempfile::TempDir;

const NAME: Field<String> = Field::new("name");
const AGE: Field<i64> = Field::new("age");
const ACTIVE: Field<bool> = Field::new("active");

const PERSON_DDL: &str = "CREATE TABLE IF NOT EXISTS person (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    age INTEGER,
    active INTEGER,
    version INTEGER NOT NULL DEFAULT 0
)";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Helper to create a file-backed store with the person table
async fn create_test_store() -> Result<(LibsqlStore, TempDir)> {
    init_tracing();
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let store = LibsqlStore::open(&db_path).await?;
    store.execute_batch(PERSON_DDL).await?;
    Ok((store, temp_dir))
}

fn person(name: &str, age: Option<i64>, active: Option<bool>) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), Value::Int(0));
    row.insert("name".into(), Value::from(name));
    row.insert("age".into(), age.into());
    row.insert("active".into(), active.into());
    row.insert("version".into(), Value::Int(0));
    row
}

/// Insert people and return their ids in order
async fn seed(store: &LibsqlStore, people: &[(&str, Option<i64>, Option<bool>)]) -> Result<Vec<i64>> {
    let mut ids = Vec::new();
    for (name, age, active) in people {
        let row = store.insert("person", person(name, *age, *active)).await?;
        ids.push(row["id"].as_i64().unwrap_or_default());
    }
    Ok(ids)
}

async fn names(store: &LibsqlStore, query: &SelectQuery) -> Result<Vec<String>> {
    Ok(store
        .query_column(query, "name")
        .await?
        .into_iter()
        .filter_map(|value| value.as_str().map(str::to_string))
        .collect())
}

// =========================================================================
// Open & Lifecycle
// =========================================================================

#[tokio::test]
async fn test_open_creates_parent_directory() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("nested").join("dir").join("test.db");

    let store = LibsqlStore::open(&db_path).await?;
    store.execute_batch(PERSON_DDL).await?;

    assert!(db_path.parent().is_some_and(|dir| dir.exists()));
    assert_eq!(store.next_sequence_value("open_check").await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_rows_and_sequences_survive_reopen() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");

    {
        let store = LibsqlStore::open(&db_path).await?;
        store.execute_batch(PERSON_DDL).await?;
        seed(&store, &[("ada", Some(36), Some(true))]).await?;
        assert_eq!(store.next_sequence_value("invoice").await?, 1);
        assert_eq!(store.next_sequence_value("invoice").await?, 2);
    }

    let store = LibsqlStore::open(&db_path).await?;
    assert_eq!(store.query_count(&SelectQuery::new("person")).await?, 1);
    assert_eq!(store.next_sequence_value("invoice").await?, 3);
    assert_eq!(store.next_sequence_value("order").await?, 1);
    Ok(())
}

// =========================================================================
// Insert & Optimistic Locking
// =========================================================================

#[tokio::test]
async fn test_insert_assigns_id_and_initial_version() -> Result<()> {
    let (store, _temp_dir) = create_test_store().await?;

    let mut row = person("ada", Some(36), None);
    row.insert("version".into(), Value::Int(7));
    let stored = store.insert("person", row).await?;

    assert_eq!(stored["id"], Value::Int(1));
    assert_eq!(stored["version"], Value::Int(0));

    let found = store.find("person", 1).await?.expect("row should exist");
    assert_eq!(found["name"], Value::from("ada"));
    Ok(())
}

#[tokio::test]
async fn test_update_increments_version() -> Result<()> {
    let (store, _temp_dir) = create_test_store().await?;
    let ids = seed(&store, &[("ada", Some(36), Some(true))]).await?;

    let mut row = person("ada lovelace", Some(37), Some(true));
    row.insert("id".into(), Value::Int(ids[0]));
    let merged = store.update("person", ids[0], Some(0), row.clone()).await?;
    assert_eq!(merged["version"], Value::Int(1));

    let merged = store.update("person", ids[0], Some(1), row).await?;
    assert_eq!(merged["version"], Value::Int(2));

    store.evict_all().await;
    let found = store.find("person", ids[0]).await?.expect("row should exist");
    assert_eq!(found["version"], Value::Int(2));
    assert_eq!(found["name"], Value::from("ada lovelace"));
    Ok(())
}

#[tokio::test]
async fn test_stale_version_is_a_conflict() -> Result<()> {
    let (store, _temp_dir) = create_test_store().await?;
    let ids = seed(&store, &[("ada", Some(36), None)]).await?;
    let row = person("ada", Some(40), None);

    store.update("person", ids[0], Some(0), row.clone()).await?;
    let err = store
        .update("person", ids[0], Some(0), row)
        .await
        .expect_err("stale version must not be written");

    assert!(err.is_version_conflict());
    match err {
        StoreError::VersionConflict {
            expected_version,
            actual_version,
            ..
        } => {
            assert_eq!(expected_version, 0);
            assert_eq!(actual_version, Some(1));
        }
        other => panic!("unexpected error: {other}"),
    }

    store.evict_all().await;
    let found = store.find("person", ids[0]).await?.expect("row should exist");
    assert_eq!(found["version"], Value::Int(1));
    Ok(())
}

#[tokio::test]
async fn test_update_of_missing_row_is_a_conflict() -> Result<()> {
    let (store, _temp_dir) = create_test_store().await?;

    let err = store
        .update("person", 99, Some(0), person("ghost", None, None))
        .await
        .expect_err("missing row must conflict");

    assert!(matches!(
        err,
        StoreError::VersionConflict {
            id: 99,
            actual_version: None,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn test_unversioned_update_writes_missing_row() -> Result<()> {
    let (store, _temp_dir) = create_test_store().await?;

    store.update("person", 50, None, person("ada", None, None)).await?;
    store.evict_all().await;

    let found = store.find("person", 50).await?.expect("row should be written");
    assert_eq!(found["name"], Value::from("ada"));
    Ok(())
}

#[tokio::test]
async fn test_unversioned_update_of_id_only_row() -> Result<()> {
    let (store, _temp_dir) = create_test_store().await?;
    store
        .execute_batch("CREATE TABLE tag (id INTEGER PRIMARY KEY, label TEXT)")
        .await?;

    let mut id_only = Row::new();
    id_only.insert("id".into(), Value::Int(7));

    // absent: written with just its id
    store.update("tag", 7, None, id_only.clone()).await?;
    // present: nothing to set
    let updated = store.update("tag", 7, None, id_only).await?;
    assert_eq!(updated["id"], Value::Int(7));

    store.evict_all().await;
    let found = store.find("tag", 7).await?.expect("row should be written");
    assert_eq!(found["label"], Value::Null);
    assert_eq!(store.query_count(&SelectQuery::new("tag")).await?, 1);
    Ok(())
}

// =========================================================================
// Queries
// =========================================================================

#[tokio::test]
async fn test_negated_comparison_excludes_null() -> Result<()> {
    let (store, _temp_dir) = create_test_store().await?;
    seed(
        &store,
        &[("old", Some(70), None), ("unknown", None, None), ("young", Some(10), None)],
    )
    .await?;

    let query = SelectQuery::new("person")
        .with_predicates(vec![Predicate::not(Predicate::gt(AGE.expr(), 20))]);
    assert_eq!(names(&store, &query).await?, vec!["young"]);
    assert_eq!(store.query_count(&query).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_false_or_null_flag() -> Result<()> {
    let (store, _temp_dir) = create_test_store().await?;
    seed(
        &store,
        &[("on", None, Some(true)), ("off", None, Some(false)), ("unset", None, None)],
    )
    .await?;

    let query = SelectQuery::new("person")
        .with_predicates(vec![Predicate::or(vec![
            Predicate::is_null(ACTIVE.expr()),
            Predicate::eq(ACTIVE.expr(), false),
        ])])
        .with_orders(vec![Order::asc(&NAME)]);
    assert_eq!(names(&store, &query).await?, vec!["off", "unset"]);
    Ok(())
}

#[tokio::test]
async fn test_like_escape_matches_literal_wildcards() -> Result<()> {
    let (store, _temp_dir) = create_test_store().await?;
    seed(
        &store,
        &[("50% OFF", None, None), ("500 off", None, None), ("a_b", None, None), ("axb", None, None)],
    )
    .await?;

    let percent = SelectQuery::new("person")
        .with_predicates(vec![Predicate::like(NAME.lower(), "50\\%%", Some('\\'))]);
    assert_eq!(names(&store, &percent).await?, vec!["50% OFF"]);

    let underscore = SelectQuery::new("person")
        .with_predicates(vec![Predicate::like(NAME.lower(), "a!_b", Some('!'))]);
    assert_eq!(names(&store, &underscore).await?, vec!["a_b"]);
    Ok(())
}

#[tokio::test]
async fn test_in_and_not_in() -> Result<()> {
    let (store, _temp_dir) = create_test_store().await?;
    seed(
        &store,
        &[("a", Some(1), None), ("b", Some(2), None), ("c", Some(3), None), ("d", None, None)],
    )
    .await?;

    let values = vec![Value::Int(1), Value::Int(3)];
    let included = SelectQuery::new("person")
        .with_predicates(vec![Predicate::in_list(AGE.expr(), values.clone())])
        .with_orders(vec![Order::asc(&NAME)]);
    assert_eq!(names(&store, &included).await?, vec!["a", "c"]);

    let excluded = SelectQuery::new("person")
        .with_predicates(vec![Predicate::not(Predicate::in_list(AGE.expr(), values))]);
    assert_eq!(names(&store, &excluded).await?, vec!["b"]);
    Ok(())
}

#[tokio::test]
async fn test_order_and_pagination() -> Result<()> {
    let (store, _temp_dir) = create_test_store().await?;
    seed(
        &store,
        &[
            ("a", Some(10), None),
            ("b", Some(40), None),
            ("c", Some(20), None),
            ("d", Some(30), None),
        ],
    )
    .await?;

    let query = SelectQuery::new("person")
        .with_orders(vec![Order::desc(&AGE)])
        .with_first_result(1)
        .with_max_results(2);
    assert_eq!(names(&store, &query).await?, vec!["d", "c"]);

    let offset_only = SelectQuery::new("person")
        .with_orders(vec![Order::asc(&AGE)])
        .with_first_result(3);
    assert_eq!(names(&store, &offset_only).await?, vec!["b"]);

    // pagination never applies to counts
    assert_eq!(store.query_count(&query).await?, 4);
    Ok(())
}

#[tokio::test]
async fn test_bound_parameters() -> Result<()> {
    let (store, _temp_dir) = create_test_store().await?;
    seed(&store, &[("a", Some(17), None), ("b", Some(18), None), ("c", Some(65), None)]).await?;

    let query = SelectQuery::new("person")
        .with_predicates(vec![
            Predicate::ge(AGE.expr(), Operand::param("min")),
            Predicate::lt(AGE.expr(), Operand::param("max")),
        ])
        .with_parameter("min", 18)
        .with_parameter("max", 65);
    assert_eq!(names(&store, &query).await?, vec!["b"]);

    let unbound = SelectQuery::new("person")
        .with_predicates(vec![Predicate::eq(AGE.expr(), Operand::param("missing"))]);
    assert!(matches!(
        store.query_rows(&unbound).await,
        Err(StoreError::UnboundParameter(name)) if name == "missing"
    ));
    Ok(())
}

#[tokio::test]
async fn test_query_rows_decode_storage_forms() -> Result<()> {
    let (store, _temp_dir) = create_test_store().await?;
    seed(&store, &[("ada", Some(36), Some(true))]).await?;

    let rows = store.query_rows(&SelectQuery::new("person")).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["active"].as_bool(), Some(true));
    assert_eq!(rows[0]["age"], Value::Int(36));
    Ok(())
}

#[tokio::test]
async fn test_render_sql() -> Result<()> {
    let (store, _temp_dir) = create_test_store().await?;

    let query = SelectQuery::new("person")
        .with_predicates(vec![Predicate::eq(AGE.expr(), 3)])
        .with_distinct(true);
    assert_eq!(
        store.render_sql(&query, &Projection::Count).as_deref(),
        Some("SELECT COUNT(DISTINCT \"id\") FROM \"person\" WHERE \"age\" = ?")
    );
    Ok(())
}

// =========================================================================
// Units of Work & Cache
// =========================================================================

#[tokio::test]
async fn test_unit_of_work_rollback() -> Result<()> {
    let (store, _temp_dir) = create_test_store().await?;
    assert!(store.transaction_id().await.is_err());

    let id = store.begin_unit_of_work().await?;
    assert_eq!(store.transaction_id().await?, id);
    assert!(store.begin_unit_of_work().await.is_err());

    seed(&store, &[("temporary", None, None)]).await?;
    store.end_unit_of_work(false).await?;

    assert!(store.transaction_id().await.is_err());
    assert_eq!(store.query_count(&SelectQuery::new("person")).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_unit_of_work_commit() -> Result<()> {
    let (store, _temp_dir) = create_test_store().await?;

    let first = store.begin_unit_of_work().await?;
    seed(&store, &[("kept", None, None)]).await?;
    store.end_unit_of_work(true).await?;

    let second = store.begin_unit_of_work().await?;
    assert_ne!(first, second);
    store.end_unit_of_work(true).await?;

    assert_eq!(store.query_count(&SelectQuery::new("person")).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_find_serves_cached_row_until_evicted() -> Result<()> {
    let (store, _temp_dir) = create_test_store().await?;
    let ids = seed(&store, &[("ada", Some(36), None)]).await?;

    store
        .execute_batch("UPDATE person SET name = 'changed', version = version + 1")
        .await?;

    let cached = store.find("person", ids[0]).await?.expect("row should exist");
    assert_eq!(cached["name"], Value::from("ada"));
    let stats = store.cache().stats().await;
    assert_eq!(stats.hits, 1);

    store.evict("person", ids[0]).await;
    let fresh = store.find("person", ids[0]).await?.expect("row should exist");
    assert_eq!(fresh["name"], Value::from("changed"));
    assert_eq!(fresh["version"], Value::Int(1));

    store.evict_type("person").await;
    assert!(!store.cache().contains("person", ids[0]).await);
    Ok(())
}
