//! Event types for the LiveDB notification channels
//!
//! Provides the shared event definitions and the EventBus used by every
//! component that publishes changes.

use crate::db::{DisplayValueUpdate, LiveDbValue, RawValueUpdate};
use crate::StatusRecord;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// LiveDB event types
///
/// Events are broadcast via EventBus and can be serialized for SSE transmission.
/// Every model-set scoped event names its model set so subscribers can keep
/// to one partition of the key space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LiveDbEvent {
    /// Keys acquisition agents should fetch first (e.g. currently on screen)
    PriorityKeysChanged {
        model_set_key: String,
        keys: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Newly imported items, fully hydrated
    ItemsAdded {
        model_set_key: String,
        items: Vec<LiveDbValue>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Keys removed from the store
    ///
    /// Deletion is performed outside this service; the channel exists so
    /// subscribers have one place to listen for it.
    ItemsRemoved {
        model_set_key: String,
        keys: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Raw values committed by the update queue
    RawValuesUpdated {
        model_set_key: String,
        updates: Vec<RawValueUpdate>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Display values committed directly
    DisplayValuesUpdated {
        model_set_key: String,
        updates: Vec<DisplayValueUpdate>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Coalesced queue status
    StatusChanged {
        status: StatusRecord,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl LiveDbEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            LiveDbEvent::PriorityKeysChanged { .. } => "PriorityKeysChanged",
            LiveDbEvent::ItemsAdded { .. } => "ItemsAdded",
            LiveDbEvent::ItemsRemoved { .. } => "ItemsRemoved",
            LiveDbEvent::RawValuesUpdated { .. } => "RawValuesUpdated",
            LiveDbEvent::DisplayValuesUpdated { .. } => "DisplayValuesUpdated",
            LiveDbEvent::StatusChanged { .. } => "StatusChanged",
        }
    }

    /// Model set this event belongs to, `None` for process-wide events
    pub fn model_set_key(&self) -> Option<&str> {
        match self {
            LiveDbEvent::PriorityKeysChanged { model_set_key, .. }
            | LiveDbEvent::ItemsAdded { model_set_key, .. }
            | LiveDbEvent::ItemsRemoved { model_set_key, .. }
            | LiveDbEvent::RawValuesUpdated { model_set_key, .. }
            | LiveDbEvent::DisplayValuesUpdated { model_set_key, .. } => Some(model_set_key),
            LiveDbEvent::StatusChanged { .. } => None,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - No backlog: events emitted before `subscribe` are never seen
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use livedb_common::events::{EventBus, LiveDbEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(LiveDbEvent::PriorityKeysChanged {
///     model_set_key: "siteA".to_string(),
///     keys: vec!["K1".to_string()],
///     timestamp: chrono::Utc::now(),
/// });
///
/// let event = rx.try_recv().unwrap();
/// assert_eq!(event.event_type(), "PriorityKeysChanged");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LiveDbEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered per subscriber before the
    /// oldest are dropped for that subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<LiveDbEvent> {
        self.tx.subscribe()
    }

    /// Subscribe to the events of one model set
    ///
    /// Process-wide events (status) are not delivered to model-set subscriptions.
    pub fn subscribe_model_set(&self, model_set_key: impl Into<String>) -> ModelSetSubscription {
        ModelSetSubscription {
            model_set_key: model_set_key.into(),
            rx: self.tx.subscribe(),
        }
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: LiveDbEvent,
    ) -> Result<usize, broadcast::error::SendError<LiveDbEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: LiveDbEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Receiver restricted to one model set
pub struct ModelSetSubscription {
    model_set_key: String,
    rx: broadcast::Receiver<LiveDbEvent>,
}

impl ModelSetSubscription {
    /// Model set this subscription listens to
    pub fn model_set_key(&self) -> &str {
        &self.model_set_key
    }

    /// Wait for the next event of this model set
    ///
    /// Lagged subscribers skip the dropped events and keep receiving.
    /// Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<LiveDbEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.model_set_key() == Some(self.model_set_key.as_str()) => {
                    return Some(event)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        model_set = %self.model_set_key,
                        skipped,
                        "Model set subscriber lagged, events dropped"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-buffered event of this model set, without waiting
    pub fn try_recv(&mut self) -> Option<LiveDbEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event.model_set_key() == Some(self.model_set_key.as_str()) => {
                    return Some(event)
                }
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
