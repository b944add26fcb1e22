//! Rate-limited status publication
//!
//! Status mutations are cheap and frequent (every poll cycle, every batch
//! completion). Subscribers see at most one `StatusChanged` event per
//! notify period, always carrying the latest record.

use livedb_common::events::{EventBus, LiveDbEvent};
use livedb_common::StatusRecord;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

struct Inner {
    status: StatusRecord,
    notify_pending: bool,
    last_notify: Option<Instant>,
}

/// Shared status record plus its coalescing publisher
#[derive(Clone)]
pub struct StatusNotifier {
    inner: Arc<Mutex<Inner>>,
    event_bus: EventBus,
    period: Duration,
}

impl StatusNotifier {
    pub fn new(event_bus: EventBus, period: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                status: StatusRecord::default(),
                notify_pending: false,
                last_notify: None,
            })),
            event_bus,
            period,
        }
    }

    /// Current status snapshot
    pub fn status(&self) -> StatusRecord {
        self.lock().status.clone()
    }

    /// Record controller liveness and in-flight batch count
    pub fn set_queue_status(&self, running: bool, queue_size: usize) {
        self.update(|status| {
            status.raw_value_queue_running = running;
            status.raw_value_queue_size = queue_size;
        });
    }

    /// Add applied items to the cumulative total
    pub fn add_to_processed_total(&self, items: u64) {
        if items == 0 {
            return;
        }
        self.update(|status| {
            status.raw_value_processed_total += items;
        });
    }

    pub fn set_last_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|status| {
            status.raw_value_last_error = Some(message);
        });
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the record half-written
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update(&self, mutate: impl FnOnce(&mut StatusRecord)) {
        let mut inner = self.lock();

        let before = inner.status.clone();
        mutate(&mut inner.status);
        if inner.status == before {
            return;
        }

        if inner.notify_pending {
            // A delayed send is already scheduled and will carry this change
            return;
        }

        let now = Instant::now();
        let elapsed = inner.last_notify.map(|last| now.duration_since(last));

        match elapsed {
            Some(elapsed) if elapsed < self.period => {
                inner.notify_pending = true;
                let wait = self.period - elapsed;
                drop(inner);
                self.schedule(wait);
            }
            _ => {
                inner.last_notify = Some(now);
                let status = inner.status.clone();
                drop(inner);
                self.publish(status);
            }
        }
    }

    fn schedule(&self, wait: Duration) {
        let notifier = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;

            let status = {
                let mut inner = notifier.lock();
                inner.notify_pending = false;
                inner.last_notify = Some(Instant::now());
                inner.status.clone()
            };
            notifier.publish(status);
        });
    }

    fn publish(&self, status: StatusRecord) {
        trace!(
            running = status.raw_value_queue_running,
            queue_size = status.raw_value_queue_size,
            processed = status.raw_value_processed_total,
            "Publishing status"
        );
        self.event_bus.emit_lossy(LiveDbEvent::StatusChanged {
            status,
            timestamp: chrono::Utc::now(),
        });
    }
}
