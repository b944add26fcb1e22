//! Shared helpers for livedb-server integration tests

#![allow(dead_code)]

use livedb_common::db::{DataType, ImportItem, RawValueUpdate};
use livedb_server::config::LiveDbConfig;
use std::future::Future;
use std::time::Duration;

/// Config with short timers so controller tests run in milliseconds
pub fn fast_config() -> LiveDbConfig {
    let mut config = LiveDbConfig::default();
    config.queue.poll_period = Duration::from_millis(10);
    config.queue.task_timeout = Duration::from_millis(200);
    config.queue.retry_delay = Duration::from_millis(50);
    config.status.notify_period = Duration::from_millis(10);
    config
}

pub fn raw(key: &str, value: &str) -> RawValueUpdate {
    RawValueUpdate {
        key: key.to_string(),
        raw_value: Some(value.to_string()),
    }
}

pub fn import_item(key: &str, raw_value: &str) -> ImportItem {
    ImportItem {
        key: key.to_string(),
        data_type: DataType::Number,
        raw_value: Some(raw_value.to_string()),
        display_value: Some(format!("{} units", raw_value)),
        import_hash: Some(format!("hash-{}", key)),
    }
}

/// Poll `check` until it returns true or `limit` elapses
pub async fn wait_until<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
