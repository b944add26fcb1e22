//! Task execution seam for update batches
//!
//! The queue controller hands each deduplicated batch to a [`TaskExecutor`]
//! and only does bookkeeping with the result. [`WorkerPoolExecutor`] applies
//! batches to the value store on a bounded pool of tokio tasks.

use crate::db::{queue, values};
use async_trait::async_trait;
use livedb_common::db::RawValueUpdate;
use sqlx::{Pool, Sqlite};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;
use uuid::Uuid;

/// One update destined for the value store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub model_set_id: i64,
    pub key: String,
    pub raw_value: Option<String>,
}

/// Unit of work handed to an executor
///
/// `queue_ids` lists every queue entry the batch covers, including duplicates
/// that were dropped from `items`, so all of them are acknowledged together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateBatch {
    pub batch_id: Uuid,
    pub queue_ids: Vec<i64>,
    pub items: Vec<BatchItem>,
}

impl UpdateBatch {
    /// Items grouped per model set, preserving item order within each group
    pub fn updates_by_model_set(&self) -> BTreeMap<i64, Vec<RawValueUpdate>> {
        let mut grouped: BTreeMap<i64, Vec<RawValueUpdate>> = BTreeMap::new();
        for item in &self.items {
            grouped.entry(item.model_set_id).or_default().push(RawValueUpdate {
                key: item.key.clone(),
                raw_value: item.raw_value.clone(),
            });
        }
        grouped
    }
}

/// Dispatch failure, always retried by the controller
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatch timed out after {0:?}")]
    Timeout(Duration),

    #[error("dispatch failed: {0}")]
    Failed(String),
}

impl From<livedb_common::Error> for DispatchError {
    fn from(err: livedb_common::Error) -> Self {
        DispatchError::Failed(err.to_string())
    }
}

/// Runs update batches
///
/// Implementations must be idempotent per batch: a batch whose result was
/// lost may be submitted again with identical contents.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Apply the batch and acknowledge its queue entries
    ///
    /// Returns the number of items that matched a stored key.
    async fn submit(&self, batch: &UpdateBatch) -> Result<usize, DispatchError>;
}

/// Applies batches on spawned tokio tasks, at most `max_concurrent` at once
pub struct WorkerPoolExecutor {
    db: Pool<Sqlite>,
    permits: Arc<Semaphore>,
}

impl WorkerPoolExecutor {
    pub fn new(db: Pool<Sqlite>, max_concurrent: usize) -> Self {
        Self {
            db,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Free worker slots
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl TaskExecutor for WorkerPoolExecutor {
    async fn submit(&self, batch: &UpdateBatch) -> Result<usize, DispatchError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::Failed("worker pool closed".to_string()))?;

        let db = self.db.clone();
        let batch = batch.clone();

        // The worker runs to completion even if the caller stops waiting
        let handle = tokio::spawn(async move {
            let _permit = permit;
            apply_batch(&db, &batch).await
        });

        handle
            .await
            .map_err(|e| DispatchError::Failed(format!("worker task aborted: {}", e)))?
            .map_err(DispatchError::from)
    }
}

/// Apply one batch and delete its queue entries in a single transaction
pub async fn apply_batch(db: &Pool<Sqlite>, batch: &UpdateBatch) -> livedb_common::Result<usize> {
    let mut tx = db.begin().await?;

    let mut applied = 0;
    for (model_set_id, updates) in batch.updates_by_model_set() {
        applied += values::apply_raw_values(&mut tx, model_set_id, &updates).await?;
    }
    let acknowledged = queue::delete_entries(&mut tx, &batch.queue_ids).await?;

    tx.commit().await?;

    debug!(
        batch_id = %batch.batch_id,
        items = batch.items.len(),
        applied,
        acknowledged,
        "Applied update batch"
    );

    Ok(applied as usize)
}
