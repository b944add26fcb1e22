//! Identifier sequences
//!
//! SQLite has no sequence objects, so `id_sequence` holds one counter row per
//! sequence. Reserving advances the counter inside the caller's transaction;
//! a rolled back transaction releases nothing because nothing was used.

use livedb_common::{Error, Result};
use sqlx::SqliteConnection;
use std::ops::Range;

/// Reserve `count` contiguous identifiers from the named sequence
///
/// Returns an empty range when `count` is zero.
pub async fn reserve_ids(
    conn: &mut SqliteConnection,
    sequence: &str,
    count: usize,
) -> Result<Range<i64>> {
    if count == 0 {
        return Ok(0..0);
    }

    let count = i64::try_from(count)
        .map_err(|_| Error::InvalidInput(format!("cannot reserve {} identifiers", count)))?;

    let next_id: i64 = sqlx::query_scalar(
        "UPDATE id_sequence SET next_id = next_id + ? WHERE name = ? RETURNING next_id",
    )
    .bind(count)
    .bind(sequence)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| Error::NotFound(format!("sequence '{}'", sequence)))?;

    Ok((next_id - count)..next_id)
}
