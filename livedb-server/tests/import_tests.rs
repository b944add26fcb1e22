//! Import pipeline: deduplication, idempotence, identifier reservation and
//! the "items added" notification

mod common;

use common::{fast_config, import_item};
use livedb_common::db::{init_memory_database, DataType, DisplayValueUpdate, ImportItem};
use livedb_common::events::LiveDbEvent;
use livedb_common::Error;
use livedb_server::db::{model_sets, values};
use livedb_server::services::{LiveDb, WorkerPoolExecutor};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

async fn setup() -> (SqlitePool, LiveDb) {
    let pool = init_memory_database().await.unwrap();
    let executor = Arc::new(WorkerPoolExecutor::new(pool.clone(), 2));
    let livedb = LiveDb::new(pool.clone(), fast_config(), executor);
    (pool, livedb)
}

async fn model_set_id(pool: &SqlitePool, key: &str) -> i64 {
    model_sets::find_model_set(pool, key)
        .await
        .unwrap()
        .expect("model set exists")
        .id
}

#[tokio::test]
async fn test_duplicate_input_creates_one_row() {
    let (pool, livedb) = setup().await;

    let new_keys = livedb
        .import_items("siteA", vec![import_item("K1", "1"), import_item("K1", "2")])
        .await
        .unwrap();

    assert_eq!(new_keys, vec!["K1"]);
    let ms = model_set_id(&pool, "siteA").await;
    assert_eq!(values::count_items(&pool, ms).await.unwrap(), 1);

    // Last occurrence wins
    let row = values::find_item(&pool, ms, "K1").await.unwrap().unwrap();
    assert_eq!(row.raw_value.as_deref(), Some("2"));
}

#[tokio::test]
async fn test_reimport_is_idempotent_and_never_overwrites() {
    let (pool, livedb) = setup().await;

    livedb
        .import_items("siteA", vec![import_item("K1", "1")])
        .await
        .unwrap();
    let new_keys = livedb
        .import_items("siteA", vec![import_item("K1", "999")])
        .await
        .unwrap();

    assert!(new_keys.is_empty());
    let ms = model_set_id(&pool, "siteA").await;
    assert_eq!(values::count_items(&pool, ms).await.unwrap(), 1);
    let row = values::find_item(&pool, ms, "K1").await.unwrap().unwrap();
    assert_eq!(row.raw_value.as_deref(), Some("1"));
}

#[tokio::test]
async fn test_mixed_import_returns_only_new_keys() {
    let (_pool, livedb) = setup().await;

    livedb
        .import_items("siteA", vec![import_item("K1", "1"), import_item("K2", "2")])
        .await
        .unwrap();
    let new_keys = livedb
        .import_items(
            "siteA",
            vec![import_item("K3", "3"), import_item("K2", "2"), import_item("K4", "4")],
        )
        .await
        .unwrap();

    assert_eq!(new_keys, vec!["K3", "K4"]);
}

#[tokio::test]
async fn test_identifiers_are_unique_across_imports() {
    let (pool, livedb) = setup().await;

    livedb
        .import_items("siteA", vec![import_item("A", "1"), import_item("B", "1")])
        .await
        .unwrap();
    livedb
        .import_items("siteB", vec![import_item("A", "1"), import_item("C", "1")])
        .await
        .unwrap();

    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM live_db_item ORDER BY id")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_same_key_in_two_model_sets_is_two_rows() {
    let (pool, livedb) = setup().await;

    livedb.import_items("siteA", vec![import_item("K1", "1")]).await.unwrap();
    let new_keys = livedb.import_items("siteB", vec![import_item("K1", "1")]).await.unwrap();

    assert_eq!(new_keys, vec!["K1"]);
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM live_db_item")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(total, 2);
}

#[tokio::test]
async fn test_imported_items_round_trip_through_bulk_read() {
    let (_pool, livedb) = setup().await;
    let items: Vec<ImportItem> = vec![
        ImportItem {
            key: "color".to_string(),
            data_type: DataType::Color,
            raw_value: Some("#ff0000".to_string()),
            display_value: Some("red".to_string()),
            import_hash: None,
        },
        ImportItem {
            key: "empty".to_string(),
            data_type: DataType::String,
            raw_value: None,
            display_value: None,
            import_hash: None,
        },
    ];

    livedb.import_items("siteA", items.clone()).await.unwrap();
    let read = livedb
        .read_chunk("siteA", None, 0, None)
        .await
        .unwrap();

    assert_eq!(read.len(), 2);
    for (stored, original) in read.iter().zip(&items) {
        assert_eq!(stored.key, original.key);
        assert_eq!(stored.data_type, original.data_type);
        assert_eq!(stored.raw_value, original.raw_value);
        assert_eq!(stored.display_value, original.display_value);
    }
}

#[tokio::test]
async fn test_new_items_are_published_as_added() {
    let (_pool, livedb) = setup().await;
    let mut events = livedb.subscribe_model_set("siteA");

    livedb
        .import_items("siteA", vec![import_item("K1", "1"), import_item("K2", "2")])
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event before timeout")
        .expect("bus open");
    match event {
        LiveDbEvent::ItemsAdded { model_set_key, items, .. } => {
            assert_eq!(model_set_key, "siteA");
            let keys: Vec<_> = items.iter().map(|i| i.key.as_str()).collect();
            assert_eq!(keys, vec!["K1", "K2"]);
            assert_eq!(items[1].display_value.as_deref(), Some("2 units"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_nothing_new_publishes_nothing() {
    let (_pool, livedb) = setup().await;
    livedb.import_items("siteA", vec![import_item("K1", "1")]).await.unwrap();

    // Let the first announcement go out before subscribing
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut events = livedb.subscribe_model_set("siteA");

    livedb.import_items("siteA", vec![import_item("K1", "1")]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn test_empty_model_set_key_rejected() {
    let (_pool, livedb) = setup().await;
    let result = livedb.import_items("", vec![import_item("K1", "1")]).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn test_display_values_apply_directly() {
    let (pool, livedb) = setup().await;
    livedb.import_items("siteA", vec![import_item("K1", "1")]).await.unwrap();
    let mut events = livedb.subscribe_model_set("siteA");

    let updated = livedb
        .update_display_values(
            "siteA",
            vec![
                DisplayValueUpdate { key: "K1".to_string(), display_value: Some("ON".to_string()) },
                DisplayValueUpdate { key: "nope".to_string(), display_value: None },
            ],
        )
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let ms = model_set_id(&pool, "siteA").await;
    let row = values::find_item(&pool, ms, "K1").await.unwrap().unwrap();
    assert_eq!(row.display_value.as_deref(), Some("ON"));
    assert_eq!(row.raw_value.as_deref(), Some("1"));

    let mut saw_display = false;
    while let Some(event) = events.try_recv() {
        if matches!(event, LiveDbEvent::DisplayValuesUpdated { .. }) {
            saw_display = true;
        }
    }
    assert!(saw_display);
}

#[tokio::test]
async fn test_prioritize_publishes_hint_without_storage() {
    let (pool, livedb) = setup().await;
    let mut events = livedb.subscribe_model_set("siteA");

    livedb
        .prioritize("siteA", vec!["K9".to_string()])
        .unwrap();

    match events.try_recv() {
        Some(LiveDbEvent::PriorityKeysChanged { keys, .. }) => assert_eq!(keys, vec!["K9"]),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(model_sets::find_model_set(&pool, "siteA").await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_import_leaves_no_model_set_behind() {
    let (pool, livedb) = setup().await;
    sqlx::query("DELETE FROM id_sequence").execute(&pool).await.unwrap();

    let result = livedb.import_items("siteA", vec![import_item("K1", "1")]).await;
    assert!(matches!(result, Err(Error::NotFound(_))));

    assert!(model_sets::find_model_set(&pool, "siteA").await.unwrap().is_none());
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM live_db_item")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 0);
}
