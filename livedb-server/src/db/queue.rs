//! Raw value update queue
//!
//! Append-only staging table. Writers append, the queue controller reads in id
//! order past a watermark, and the apply step deletes the entries it
//! acknowledged.

use livedb_common::db::{QueueEntry, RawValueUpdate};
use livedb_common::Result;
use sqlx::{Pool, QueryBuilder, Sqlite, SqliteConnection};

/// Rows per multi-row INSERT (3 bound columns each)
const INSERT_ROWS_PER_STATEMENT: usize = 2000;

/// Ids per DELETE ... IN (...) statement
const DELETE_IDS_PER_STATEMENT: usize = 5000;

/// Append raw value updates for one model set in a single transaction
///
/// Returns the number of entries queued.
pub async fn append_entries(
    db: &Pool<Sqlite>,
    model_set_id: i64,
    updates: &[RawValueUpdate],
) -> Result<usize> {
    if updates.is_empty() {
        return Ok(0);
    }

    let mut tx = db.begin().await?;

    for chunk in updates.chunks(INSERT_ROWS_PER_STATEMENT) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO live_db_raw_value_queue (model_set_id, key, raw_value) ");
        builder.push_values(chunk, |mut row, update| {
            row.push_bind(model_set_id)
                .push_bind(&update.key)
                .push_bind(&update.raw_value);
        });
        builder.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;

    Ok(updates.len())
}

/// Fetch up to `limit` entries with id greater than `after_id`, oldest first
pub async fn fetch_after(db: &Pool<Sqlite>, after_id: i64, limit: usize) -> Result<Vec<QueueEntry>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let entries = sqlx::query_as::<_, QueueEntry>(
        r#"
        SELECT id, model_set_id, key, raw_value
        FROM live_db_raw_value_queue
        WHERE id > ?
        ORDER BY id ASC
        LIMIT ?
        "#,
    )
    .bind(after_id)
    .bind(limit)
    .fetch_all(db)
    .await?;

    Ok(entries)
}

/// Delete acknowledged entries inside the caller's transaction
pub async fn delete_entries(conn: &mut SqliteConnection, ids: &[i64]) -> Result<u64> {
    let mut deleted = 0;

    for chunk in ids.chunks(DELETE_IDS_PER_STATEMENT) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM live_db_raw_value_queue WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        deleted += builder.build().execute(&mut *conn).await?.rows_affected();
    }

    Ok(deleted)
}

/// Number of entries not yet acknowledged
pub async fn pending_count(db: &Pool<Sqlite>) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM live_db_raw_value_queue")
        .fetch_one(db)
        .await?;

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::model_sets::get_or_create_model_set;
    use livedb_common::db::init_memory_database;

    fn update(key: &str, value: &str) -> RawValueUpdate {
        RawValueUpdate {
            key: key.to_string(),
            raw_value: Some(value.to_string()),
        }
    }

    #[tokio::test]
    async fn test_append_then_fetch_in_id_order() {
        let pool = init_memory_database().await.unwrap();
        let model_set = get_or_create_model_set(&pool, "siteA").await.unwrap();

        let queued = append_entries(&pool, model_set.id, &[update("K1", "5"), update("K1", "7")])
            .await
            .unwrap();
        assert_eq!(queued, 2);

        let entries = fetch_after(&pool, 0, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].id < entries[1].id);
        assert_eq!(entries[1].raw_value.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_fetch_respects_watermark_and_limit() {
        let pool = init_memory_database().await.unwrap();
        let model_set = get_or_create_model_set(&pool, "siteA").await.unwrap();
        let updates: Vec<_> = (0..5).map(|i| update(&format!("K{}", i), "1")).collect();
        append_entries(&pool, model_set.id, &updates).await.unwrap();

        let first = fetch_after(&pool, 0, 2).await.unwrap();
        assert_eq!(first.len(), 2);

        let rest = fetch_after(&pool, first[1].id, 10).await.unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].key, "K2");
    }

    #[tokio::test]
    async fn test_delete_acknowledged_entries() {
        let pool = init_memory_database().await.unwrap();
        let model_set = get_or_create_model_set(&pool, "siteA").await.unwrap();
        append_entries(&pool, model_set.id, &[update("K1", "1"), update("K2", "2")])
            .await
            .unwrap();

        let entries = fetch_after(&pool, 0, 10).await.unwrap();
        let mut tx = pool.begin().await.unwrap();
        let deleted = delete_entries(&mut tx, &[entries[0].id]).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(pending_count(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_append_is_noop() {
        let pool = init_memory_database().await.unwrap();
        assert_eq!(append_entries(&pool, 1, &[]).await.unwrap(), 0);
        assert_eq!(pending_count(&pool).await.unwrap(), 0);
    }
}
