//! Model set queries

use livedb_common::db::ModelSet;
use livedb_common::{Error, Result};
use sqlx::{Pool, Sqlite, SqliteConnection};

/// Get the model set with this key, creating it on first reference
///
/// The insert and the select are separate statements; concurrent callers
/// converge on the same row through the UNIQUE constraint on `key`.
pub async fn get_or_create_model_set(db: &Pool<Sqlite>, key: &str) -> Result<ModelSet> {
    let mut conn = db.acquire().await?;
    get_or_create_model_set_on(&mut conn, key).await
}

/// [`get_or_create_model_set`] on a caller-held connection or transaction
///
/// The insert runs first, so inside a transaction this statement takes the
/// write lock before anything is read.
pub async fn get_or_create_model_set_on(
    conn: &mut SqliteConnection,
    key: &str,
) -> Result<ModelSet> {
    if key.trim().is_empty() {
        return Err(Error::InvalidInput("model set key must not be empty".to_string()));
    }

    let inserted = sqlx::query(
        "INSERT INTO live_db_model_set (key, name) VALUES (?, ?) ON CONFLICT(key) DO NOTHING",
    )
    .bind(key)
    .bind(key)
    .execute(&mut *conn)
    .await?;

    if inserted.rows_affected() > 0 {
        tracing::debug!(model_set = %key, "Inserted model set");
    }

    sqlx::query_as::<_, ModelSet>(
        "SELECT id, key, name, comment FROM live_db_model_set WHERE key = ?",
    )
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| Error::Internal(format!("model set '{}' vanished after insert", key)))
}

/// Look up a model set by key without creating it
pub async fn find_model_set(db: &Pool<Sqlite>, key: &str) -> Result<Option<ModelSet>> {
    let model_set = sqlx::query_as::<_, ModelSet>(
        "SELECT id, key, name, comment FROM live_db_model_set WHERE key = ?",
    )
    .bind(key)
    .fetch_optional(db)
    .await?;

    Ok(model_set)
}

/// Look up a model set by identifier
pub async fn find_model_set_by_id(db: &Pool<Sqlite>, id: i64) -> Result<Option<ModelSet>> {
    let model_set = sqlx::query_as::<_, ModelSet>(
        "SELECT id, key, name, comment FROM live_db_model_set WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(db)
    .await?;

    Ok(model_set)
}
