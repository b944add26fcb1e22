//! Bulk import of new keys
//!
//! Import only ever creates rows. Keys already present in the model set are
//! left untouched; their values change only through the update queue or the
//! display value path.

use crate::config::ImportConfig;
use crate::db::{model_sets, sequences, values};
use crate::services::model_set_registry::ModelSetRegistry;
use livedb_common::db::{ImportItem, ValueItem, LIVE_DB_ITEM_SEQUENCE};
use livedb_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct ImportController {
    db: Pool<Sqlite>,
    registry: ModelSetRegistry,
    config: ImportConfig,
}

impl ImportController {
    pub fn new(db: Pool<Sqlite>, registry: ModelSetRegistry, config: ImportConfig) -> Self {
        Self {
            db,
            registry,
            config,
        }
    }

    /// Insert the items whose keys are new to the model set
    ///
    /// Returns the newly created keys in input order. Duplicate keys in
    /// `items` collapse to the last occurrence. Any storage failure rolls the
    /// whole import back; nothing is retried.
    pub async fn import_items(
        &self,
        model_set_key: &str,
        items: Vec<ImportItem>,
    ) -> Result<Vec<String>> {
        let candidates = dedupe_last_wins(items);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        match self.insert_new(model_set_key, candidates).await {
            Ok(new_keys) => {
                info!(
                    model_set = %model_set_key,
                    new_keys = new_keys.len(),
                    "Import complete"
                );
                Ok(new_keys)
            }
            Err(e) => {
                error!(model_set = %model_set_key, "Import failed and was rolled back: {}", e);
                Err(e)
            }
        }
    }

    async fn insert_new(
        &self,
        model_set_key: &str,
        candidates: Vec<ImportItem>,
    ) -> Result<Vec<String>> {
        let mut tx = self.db.begin().await?;

        // Writes before it reads: a deferred transaction that reads first
        // cannot upgrade once another connection has committed.
        let model_set = model_sets::get_or_create_model_set_on(&mut tx, model_set_key).await?;

        let keys: Vec<String> = candidates.iter().map(|c| c.key.clone()).collect();
        let existing = values::existing_keys(
            &mut tx,
            model_set.id,
            &keys,
            self.config.existence_chunk_size,
        )
        .await?;

        let new_items: Vec<ImportItem> = candidates
            .into_iter()
            .filter(|c| !existing.contains(&c.key))
            .collect();

        debug!(
            model_set = %model_set.key,
            existing = existing.len(),
            new = new_items.len(),
            "Partitioned import candidates"
        );

        if new_items.is_empty() {
            // Every key exists, so the model set did too; nothing to keep
            return Ok(Vec::new());
        }

        let ids = sequences::reserve_ids(&mut tx, LIVE_DB_ITEM_SEQUENCE, new_items.len()).await?;
        if ids.end - ids.start != new_items.len() as i64 {
            return Err(Error::Internal(format!(
                "reserved {} identifiers for {} items",
                ids.end - ids.start,
                new_items.len()
            )));
        }

        let rows: Vec<ValueItem> = ids
            .zip(new_items)
            .map(|(id, item)| ValueItem {
                id,
                model_set_id: model_set.id,
                key: item.key,
                raw_value: item.raw_value,
                display_value: item.display_value,
                data_type: item.data_type.as_i64(),
                import_hash: item.import_hash,
            })
            .collect();

        values::insert_items(&mut tx, &rows).await?;
        tx.commit().await?;
        self.registry.remember(model_set).await;

        Ok(rows.into_iter().map(|row| row.key).collect())
    }
}

/// Keep the last occurrence of each key, ordered by where that occurrence sits
pub fn dedupe_last_wins(items: Vec<ImportItem>) -> Vec<ImportItem> {
    let mut last_index: HashMap<String, usize> = HashMap::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        last_index.insert(item.key.clone(), index);
    }

    items
        .into_iter()
        .enumerate()
        .filter(|(index, item)| last_index.get(&item.key) == Some(index))
        .map(|(_, item)| item)
        .collect()
}
