//! PostgreSQL store tests
//!
//! Require Docker. Run with `cargo test -p domain_counting -- --ignored`.

use chrono::{TimeZone, Utc};
use domain_counting::entity;
use domain_counting::*;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use test_utils::{TestDataBuilder, TestDatabase};

#[tokio::test]
#[ignore]
async fn test_save_inserts_row() {
    let db = TestDatabase::new().await;
    let store = PgResultStore::new(db.connection());
    let builder = TestDataBuilder::from_test_name("pg_save_inserts_row");

    let result = CountingResult::new(
        builder.entity_id("main"),
        42,
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    )
    .with_producer("counter-api")
    .with_message("hello");

    store.save(&result).await.unwrap();

    let row = entity::Entity::find()
        .filter(entity::Column::EntityId.eq(builder.entity_id("main")))
        .one(&db.connection)
        .await
        .unwrap()
        .expect("row should exist");

    assert_eq!(row.count, 42);
    assert_eq!(row.producer.as_deref(), Some("counter-api"));

    let stored: CountingResult = row.into();
    assert_eq!(stored, result);
}

#[tokio::test]
#[ignore]
async fn test_same_entity_is_saved_twice() {
    let db = TestDatabase::new().await;
    let store = PgResultStore::new(db.connection());
    let builder = TestDataBuilder::from_test_name("pg_same_entity_twice");

    let result = CountingResult::new(builder.entity_id("main"), 1, Utc::now());
    store.save(&result).await.unwrap();
    store.save(&result).await.unwrap();

    // No deduplication at the storage layer
    assert_eq!(db.count_rows("counting_results").await, 2);
}

#[tokio::test]
#[ignore]
async fn test_save_after_table_dropped_is_storage_error() {
    let db = TestDatabase::new().await;
    let store = PgResultStore::new(db.connection());

    sea_orm::ConnectionTrait::execute_unprepared(&db.connection, "DROP TABLE counting_results")
        .await
        .unwrap();

    let err = store
        .save(&CountingResult::new("A1", 1, Utc::now()))
        .await
        .unwrap_err();

    assert!(!err.to_string().is_empty());
}
