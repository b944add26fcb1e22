//! Chunked reads of the value store
//!
//! Every chunk is an independent offset/limit query ordered by identifier,
//! so a sequence can be restarted from offset 0 at any time and nothing is
//! held server-side between chunks.

use crate::config::BulkReadConfig;
use crate::db::values::{self, MAX_FILTER_KEYS};
use crate::services::model_set_registry::ModelSetRegistry;
use async_stream::try_stream;
use futures::{Stream, TryStreamExt};
use livedb_common::db::LiveDbValue;
use livedb_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::collections::HashSet;
use tracing::debug;

#[derive(Clone)]
pub struct BulkReader {
    db: Pool<Sqlite>,
    registry: ModelSetRegistry,
    config: BulkReadConfig,
}

impl BulkReader {
    pub fn new(db: Pool<Sqlite>, registry: ModelSetRegistry, config: BulkReadConfig) -> Self {
        Self {
            db,
            registry,
            config,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    /// One chunk starting at `offset`; an empty result marks the end
    ///
    /// A key filter longer than [`MAX_FILTER_KEYS`] is refused with
    /// `Error::NotImplemented`; use [`BulkReader::read`] for long lists.
    pub async fn read_chunk(
        &self,
        model_set_key: &str,
        keys: Option<&[String]>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LiveDbValue>> {
        let offset = sql_int(offset, "offset")?;
        let limit = sql_int(limit, "limit")?;

        let model_set = self.registry.resolve(model_set_key).await?;
        values::read_chunk(&self.db, model_set.id, keys, offset, limit).await
    }

    /// Lazy sequence of chunks covering the model set or the listed keys
    ///
    /// Duplicate keys are read once. Long key lists are split into slices of
    /// [`MAX_FILTER_KEYS`]; rows are ordered by identifier within each slice.
    /// The sequence ends after the first short chunk, which is yielded only
    /// if it holds rows.
    pub fn read(
        &self,
        model_set_key: &str,
        keys: Option<Vec<String>>,
    ) -> impl Stream<Item = Result<Vec<LiveDbValue>>> + Send + 'static {
        let reader = self.clone();
        let model_set_key = model_set_key.to_string();
        let chunk_size = self.config.chunk_size.max(1);

        try_stream! {
            let model_set = reader.registry.resolve(&model_set_key).await?;

            let key_slices: Vec<Option<Vec<String>>> = match keys {
                None => vec![None],
                Some(keys) => unique_keys(keys)
                    .chunks(MAX_FILTER_KEYS)
                    .map(|slice| Some(slice.to_vec()))
                    .collect(),
            };

            for slice in key_slices {
                let mut offset = 0usize;
                loop {
                    debug!(
                        model_set = %model_set_key,
                        offset,
                        limit = chunk_size,
                        "Reading value chunk"
                    );
                    let chunk = values::read_chunk(
                        &reader.db,
                        model_set.id,
                        slice.as_deref(),
                        sql_int(offset, "offset")?,
                        sql_int(chunk_size, "limit")?,
                    )
                    .await?;

                    let short = chunk.len() < chunk_size;
                    offset += chunk.len();
                    if !chunk.is_empty() {
                        yield chunk;
                    }
                    if short {
                        break;
                    }
                }
            }
        }
    }

    /// Every row of [`BulkReader::read`], concatenated
    pub async fn read_all(
        &self,
        model_set_key: &str,
        keys: Option<Vec<String>>,
    ) -> Result<Vec<LiveDbValue>> {
        let chunks: Vec<Vec<LiveDbValue>> = self.read(model_set_key, keys).try_collect().await?;
        Ok(chunks.into_iter().flatten().collect())
    }
}

/// SQLite binds signed 64-bit integers; a wrapped value would read as "no limit"
fn sql_int(value: usize, name: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| Error::InvalidInput(format!("{} {} is out of range", name, value)))
}

/// Drop repeated keys, keeping first-seen order
fn unique_keys(keys: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.into_iter().filter(|k| seen.insert(k.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_keys_keeps_first_seen_order() {
        let keys = vec!["b", "a", "b", "c", "a"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(unique_keys(keys), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_sql_int_rejects_values_past_i64() {
        assert_eq!(sql_int(2500, "limit").unwrap(), 2500);
        assert!(matches!(sql_int(usize::MAX, "limit"), Err(Error::InvalidInput(_))));
    }
}
