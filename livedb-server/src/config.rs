//! Runtime tuning loaded from the settings table
//!
//! Every field has a compiled default matching the values seeded by
//! `livedb_common::db::init`. A missing setting keeps the default; a setting
//! that does not parse, or a combination that cannot work, is a
//! configuration error.

use crate::db::settings::get_setting;
use livedb_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::time::Duration;

/// Update queue controller tuning
#[derive(Debug, Clone, PartialEq)]
pub struct QueueControllerConfig {
    /// Poll period of the control loop (default: 200ms)
    pub poll_period: Duration,

    /// Maximum update items per dispatched batch (default: 500)
    pub items_per_task: usize,

    /// Maximum batches in flight (default: 40)
    pub blocks_max: usize,

    /// Refill only when in-flight batches are at or below this (default: 8)
    pub blocks_min: usize,

    /// Per-attempt dispatch timeout (default: 60s)
    pub task_timeout: Duration,

    /// Wait before re-dispatching a failed batch (default: 2s)
    pub retry_delay: Duration,
}

impl Default for QueueControllerConfig {
    fn default() -> Self {
        Self {
            poll_period: Duration::from_millis(200),
            items_per_task: 500,
            blocks_max: 40,
            blocks_min: 8,
            task_timeout: Duration::from_secs(60),
            retry_delay: Duration::from_millis(2000),
        }
    }
}

impl QueueControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_period.is_zero() {
            return Err(Error::Config("queue_poll_period_ms must be > 0".to_string()));
        }
        if self.items_per_task == 0 {
            return Err(Error::Config("queue_items_per_task must be > 0".to_string()));
        }
        if self.blocks_max == 0 {
            return Err(Error::Config("queue_blocks_max must be > 0".to_string()));
        }
        if self.blocks_min >= self.blocks_max {
            return Err(Error::Config(format!(
                "queue_blocks_min ({}) must be less than queue_blocks_max ({})",
                self.blocks_min, self.blocks_max
            )));
        }
        if self.task_timeout.is_zero() {
            return Err(Error::Config("queue_task_timeout_secs must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Status notification rate limit
#[derive(Debug, Clone, PartialEq)]
pub struct StatusConfig {
    /// Minimum spacing between status notifications (default: 2s)
    pub notify_period: Duration,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            notify_period: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkReadConfig {
    /// Rows per chunk (default: 2500)
    pub chunk_size: usize,
}

impl Default for BulkReadConfig {
    fn default() -> Self {
        Self { chunk_size: 2500 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportConfig {
    /// Keys per existence query (default: 1000)
    pub existence_chunk_size: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            existence_chunk_size: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Batches applied concurrently by the worker pool (default: 8)
    pub max_concurrent_tasks: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 8,
        }
    }
}

/// All runtime tuning for one LiveDB instance
#[derive(Debug, Clone, PartialEq)]
pub struct LiveDbConfig {
    pub queue: QueueControllerConfig,
    pub status: StatusConfig,
    pub bulk_read: BulkReadConfig,
    pub import: ImportConfig,
    pub executor: ExecutorConfig,

    /// Per-subscriber event buffer (default: 1000)
    pub event_bus_capacity: usize,
}

impl Default for LiveDbConfig {
    fn default() -> Self {
        Self {
            queue: QueueControllerConfig::default(),
            status: StatusConfig::default(),
            bulk_read: BulkReadConfig::default(),
            import: ImportConfig::default(),
            executor: ExecutorConfig::default(),
            event_bus_capacity: 1000,
        }
    }
}

impl LiveDbConfig {
    /// Load configuration from database settings, falling back to defaults
    pub async fn from_database(db: &Pool<Sqlite>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = get_setting::<u64>(db, "queue_poll_period_ms").await? {
            config.queue.poll_period = Duration::from_millis(ms);
        }
        if let Some(n) = get_setting::<usize>(db, "queue_items_per_task").await? {
            config.queue.items_per_task = n;
        }
        if let Some(n) = get_setting::<usize>(db, "queue_blocks_max").await? {
            config.queue.blocks_max = n;
        }
        if let Some(n) = get_setting::<usize>(db, "queue_blocks_min").await? {
            config.queue.blocks_min = n;
        }
        if let Some(secs) = get_setting::<u64>(db, "queue_task_timeout_secs").await? {
            config.queue.task_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = get_setting::<u64>(db, "queue_retry_delay_ms").await? {
            config.queue.retry_delay = Duration::from_millis(ms);
        }

        if let Some(ms) = get_setting::<u64>(db, "status_notify_period_ms").await? {
            config.status.notify_period = Duration::from_millis(ms);
        }

        if let Some(n) = get_setting::<usize>(db, "bulk_read_chunk_size").await? {
            config.bulk_read.chunk_size = n;
        }
        if let Some(n) = get_setting::<usize>(db, "import_existence_chunk_size").await? {
            config.import.existence_chunk_size = n;
        }

        if let Some(n) = get_setting::<usize>(db, "executor_max_concurrent_tasks").await? {
            config.executor.max_concurrent_tasks = n;
        }

        if let Some(n) = get_setting::<usize>(db, "event_bus_capacity").await? {
            config.event_bus_capacity = n;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.queue.validate()?;

        if self.bulk_read.chunk_size == 0 {
            return Err(Error::Config("bulk_read_chunk_size must be > 0".to_string()));
        }
        if self.import.existence_chunk_size == 0 {
            return Err(Error::Config("import_existence_chunk_size must be > 0".to_string()));
        }
        if self.executor.max_concurrent_tasks == 0 {
            return Err(Error::Config("executor_max_concurrent_tasks must be > 0".to_string()));
        }
        // broadcast::channel panics on zero capacity
        if self.event_bus_capacity == 0 {
            return Err(Error::Config("event_bus_capacity must be > 0".to_string()));
        }
        Ok(())
    }
}
