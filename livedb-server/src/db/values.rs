//! Live value store queries (`live_db_item`)

use livedb_common::db::{
    DataType, DisplayValueUpdate, LiveDbValue, RawValueUpdate, ValueItem,
};
use livedb_common::{Error, Result};
use sqlx::{FromRow, Pool, QueryBuilder, Sqlite, SqliteConnection};
use std::collections::HashSet;

/// Largest key list accepted by one filtered chunk query
///
/// Callers with longer lists split them (see `BulkReader`).
pub const MAX_FILTER_KEYS: usize = 10_000;

/// Rows per multi-row INSERT (7 bound columns each)
const INSERT_ROWS_PER_STATEMENT: usize = 1000;

#[derive(FromRow)]
struct ValueRow {
    key: String,
    data_type: i64,
    raw_value: Option<String>,
    display_value: Option<String>,
}

impl TryFrom<ValueRow> for LiveDbValue {
    type Error = Error;

    fn try_from(row: ValueRow) -> Result<Self> {
        let data_type = DataType::try_from(row.data_type)
            .map_err(|e| Error::Internal(format!("key '{}': {}", row.key, e)))?;

        Ok(LiveDbValue {
            key: row.key,
            data_type,
            raw_value: row.raw_value,
            display_value: row.display_value,
        })
    }
}

/// Subset of `keys` already present in the model set
///
/// Queries in chunks of `chunk_size` keys.
pub async fn existing_keys(
    conn: &mut SqliteConnection,
    model_set_id: i64,
    keys: &[String],
    chunk_size: usize,
) -> Result<HashSet<String>> {
    let mut existing = HashSet::new();

    for chunk in keys.chunks(chunk_size.max(1)) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT key FROM live_db_item WHERE model_set_id = ");
        builder.push_bind(model_set_id);
        builder.push(" AND key IN (");
        let mut separated = builder.separated(", ");
        for key in chunk {
            separated.push_bind(key);
        }
        separated.push_unseparated(")");

        let found: Vec<String> = builder
            .build_query_scalar()
            .fetch_all(&mut *conn)
            .await?;
        existing.extend(found);
    }

    Ok(existing)
}

/// Insert fully formed rows (identifiers already assigned)
pub async fn insert_items(conn: &mut SqliteConnection, items: &[ValueItem]) -> Result<()> {
    for chunk in items.chunks(INSERT_ROWS_PER_STATEMENT) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO live_db_item \
             (id, model_set_id, key, raw_value, display_value, data_type, import_hash) ",
        );
        builder.push_values(chunk, |mut row, item| {
            row.push_bind(item.id)
                .push_bind(item.model_set_id)
                .push_bind(&item.key)
                .push_bind(&item.raw_value)
                .push_bind(&item.display_value)
                .push_bind(item.data_type)
                .push_bind(&item.import_hash);
        });
        builder.build().execute(&mut *conn).await?;
    }

    Ok(())
}

/// Set raw values by key; keys missing from the model set are skipped
///
/// Returns the number of rows updated.
pub async fn apply_raw_values(
    conn: &mut SqliteConnection,
    model_set_id: i64,
    updates: &[RawValueUpdate],
) -> Result<u64> {
    let mut updated = 0;

    for update in updates {
        updated += sqlx::query(
            "UPDATE live_db_item SET raw_value = ? WHERE model_set_id = ? AND key = ?",
        )
        .bind(&update.raw_value)
        .bind(model_set_id)
        .bind(&update.key)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    }

    Ok(updated)
}

/// Set display values by key; keys missing from the model set are skipped
pub async fn apply_display_values(
    conn: &mut SqliteConnection,
    model_set_id: i64,
    updates: &[DisplayValueUpdate],
) -> Result<u64> {
    let mut updated = 0;

    for update in updates {
        updated += sqlx::query(
            "UPDATE live_db_item SET display_value = ? WHERE model_set_id = ? AND key = ?",
        )
        .bind(&update.display_value)
        .bind(model_set_id)
        .bind(&update.key)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    }

    Ok(updated)
}

/// Read one page of values ordered by identifier
///
/// `keys = Some(..)` restricts the page to those keys. An empty key list reads
/// nothing, and a list longer than [`MAX_FILTER_KEYS`] is refused rather than
/// silently truncated.
pub async fn read_chunk(
    db: &Pool<Sqlite>,
    model_set_id: i64,
    keys: Option<&[String]>,
    offset: i64,
    limit: i64,
) -> Result<Vec<LiveDbValue>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT key, data_type, raw_value, display_value FROM live_db_item WHERE model_set_id = ",
    );
    builder.push_bind(model_set_id);

    if let Some(keys) = keys {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        if keys.len() > MAX_FILTER_KEYS {
            return Err(Error::NotImplemented(format!(
                "key filter of {} keys exceeds the {} key limit per query",
                keys.len(),
                MAX_FILTER_KEYS
            )));
        }

        builder.push(" AND key IN (");
        let mut separated = builder.separated(", ");
        for key in keys {
            separated.push_bind(key);
        }
        separated.push_unseparated(")");
    }

    builder.push(" ORDER BY id ASC LIMIT ");
    builder.push_bind(limit);
    builder.push(" OFFSET ");
    builder.push_bind(offset);

    let rows: Vec<ValueRow> = builder.build_query_as().fetch_all(db).await?;

    rows.into_iter().map(LiveDbValue::try_from).collect()
}

/// Fetch one stored row
pub async fn find_item(db: &Pool<Sqlite>, model_set_id: i64, key: &str) -> Result<Option<ValueItem>> {
    let item = sqlx::query_as::<_, ValueItem>(
        r#"
        SELECT id, model_set_id, key, raw_value, display_value, data_type, import_hash
        FROM live_db_item
        WHERE model_set_id = ? AND key = ?
        "#,
    )
    .bind(model_set_id)
    .bind(key)
    .fetch_optional(db)
    .await?;

    Ok(item)
}

/// Number of rows in a model set
pub async fn count_items(db: &Pool<Sqlite>, model_set_id: i64) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM live_db_item WHERE model_set_id = ?")
        .bind(model_set_id)
        .fetch_one(db)
        .await?;

    Ok(count)
}
