//! LiveDB service facade
//!
//! Wires the controllers, notifier and reader around one database pool and
//! one event bus, and exposes the public read/write operations.

use crate::config::LiveDbConfig;
use crate::db::{queue, values};
use crate::services::bulk_reader::BulkReader;
use crate::services::executor::{TaskExecutor, WorkerPoolExecutor};
use crate::services::import_controller::ImportController;
use crate::services::model_set_registry::ModelSetRegistry;
use crate::services::queue_controller::QueueController;
use crate::services::status_notifier::StatusNotifier;
use futures::{Stream, StreamExt};
use livedb_common::db::{DisplayValueUpdate, ImportItem, LiveDbValue, RawValueUpdate};
use livedb_common::events::{EventBus, LiveDbEvent, ModelSetSubscription};
use livedb_common::{Error, Result, StatusRecord};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct LiveDb {
    db: Pool<Sqlite>,
    config: LiveDbConfig,
    event_bus: EventBus,
    registry: ModelSetRegistry,
    status: StatusNotifier,
    importer: ImportController,
    reader: BulkReader,
    controller: Arc<QueueController>,
}

impl LiveDb {
    /// Build a LiveDB instance applying batches with `executor`
    pub fn new(db: Pool<Sqlite>, config: LiveDbConfig, executor: Arc<dyn TaskExecutor>) -> Self {
        let event_bus = EventBus::new(config.event_bus_capacity);
        let registry = ModelSetRegistry::new(db.clone());
        let status = StatusNotifier::new(event_bus.clone(), config.status.notify_period);
        let importer = ImportController::new(db.clone(), registry.clone(), config.import.clone());
        let reader = BulkReader::new(db.clone(), registry.clone(), config.bulk_read.clone());
        let controller = Arc::new(QueueController::new(
            db.clone(),
            config.queue.clone(),
            executor,
            registry.clone(),
            status.clone(),
            event_bus.clone(),
        ));

        Self {
            db,
            config,
            event_bus,
            registry,
            status,
            importer,
            reader,
            controller,
        }
    }

    /// Load configuration from the settings table and use the worker pool executor
    pub async fn open(db: Pool<Sqlite>) -> Result<Self> {
        let config = LiveDbConfig::from_database(&db).await?;
        let executor = Arc::new(WorkerPoolExecutor::new(
            db.clone(),
            config.executor.max_concurrent_tasks,
        ));
        Ok(Self::new(db, config, executor))
    }

    pub fn config(&self) -> &LiveDbConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Subscribe to the notifications of one model set
    pub fn subscribe_model_set(&self, model_set_key: &str) -> ModelSetSubscription {
        self.event_bus.subscribe_model_set(model_set_key)
    }

    /// Start draining the update queue
    pub fn start(&self) {
        self.controller.start();
    }

    pub async fn shutdown(&self) {
        self.controller.shutdown().await;
    }

    /// True while the queue controller has unacknowledged batches
    pub fn is_busy(&self) -> bool {
        self.controller.is_busy()
    }

    /// Durably queue raw value updates
    ///
    /// Returns once the updates are stored, not once they are applied.
    pub async fn queue_raw_updates(
        &self,
        model_set_key: &str,
        updates: Vec<RawValueUpdate>,
    ) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }

        let model_set = self.registry.resolve(model_set_key).await?;
        let queued = queue::append_entries(&self.db, model_set.id, &updates).await?;

        debug!(model_set = %model_set_key, items = queued, "Queued raw value updates");
        Ok(queued)
    }

    /// Import items and announce the new rows
    ///
    /// The newly created rows are re-read in chunks and published as
    /// `ItemsAdded` in the background; no event is sent when nothing is new.
    pub async fn import_items(
        &self,
        model_set_key: &str,
        items: Vec<ImportItem>,
    ) -> Result<Vec<String>> {
        let new_keys = self.importer.import_items(model_set_key, items).await?;

        if !new_keys.is_empty() {
            let reader = self.reader.clone();
            let event_bus = self.event_bus.clone();
            let model_set_key = model_set_key.to_string();
            let keys = new_keys.clone();

            tokio::spawn(async move {
                publish_items_added(reader, event_bus, model_set_key, keys).await;
            });
        }

        Ok(new_keys)
    }

    /// Apply display values directly in one transaction
    ///
    /// Returns the number of stored keys updated.
    pub async fn update_display_values(
        &self,
        model_set_key: &str,
        updates: Vec<DisplayValueUpdate>,
    ) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }

        let model_set = self.registry.resolve(model_set_key).await?;

        let mut tx = self.db.begin().await?;
        let updated = values::apply_display_values(&mut tx, model_set.id, &updates).await?;
        tx.commit().await?;

        self.event_bus.emit_lossy(LiveDbEvent::DisplayValuesUpdated {
            model_set_key: model_set.key,
            updates,
            timestamp: chrono::Utc::now(),
        });

        Ok(updated as usize)
    }

    /// Chunked read of a model set, optionally restricted to `keys`
    pub fn bulk_read(
        &self,
        model_set_key: &str,
        keys: Option<Vec<String>>,
    ) -> impl Stream<Item = Result<Vec<LiveDbValue>>> + Send + 'static {
        self.reader.read(model_set_key, keys)
    }

    /// Single chunk read at `offset`, `limit` defaulting to the configured chunk size
    pub async fn read_chunk(
        &self,
        model_set_key: &str,
        keys: Option<&[String]>,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<LiveDbValue>> {
        let limit = limit.unwrap_or_else(|| self.reader.chunk_size());
        self.reader.read_chunk(model_set_key, keys, offset, limit).await
    }

    /// Publish a priority hint for acquisition agents; nothing is stored
    pub fn prioritize(&self, model_set_key: &str, keys: Vec<String>) -> Result<()> {
        if model_set_key.trim().is_empty() {
            return Err(Error::InvalidInput("model set key must not be empty".to_string()));
        }

        self.event_bus.emit_lossy(LiveDbEvent::PriorityKeysChanged {
            model_set_key: model_set_key.to_string(),
            keys,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    pub fn status(&self) -> StatusRecord {
        self.status.status()
    }
}

async fn publish_items_added(
    reader: BulkReader,
    event_bus: EventBus,
    model_set_key: String,
    keys: Vec<String>,
) {
    let mut chunks = Box::pin(reader.read(&model_set_key, Some(keys)));
    let mut published = 0usize;

    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(items) => {
                published += items.len();
                event_bus.emit_lossy(LiveDbEvent::ItemsAdded {
                    model_set_key: model_set_key.clone(),
                    items,
                    timestamp: chrono::Utc::now(),
                });
            }
            Err(e) => {
                warn!(model_set = %model_set_key, "Failed to re-read imported items: {}", e);
                return;
            }
        }
    }

    info!(model_set = %model_set_key, items = published, "Published added items");
}
