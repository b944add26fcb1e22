//! Update queue controller
//!
//! Drains `live_db_raw_value_queue` into the value store. A single control
//! loop task owns all bookkeeping (in-flight count, in-flight key set, the
//! buffer of fetched blocks, the fetch watermark); the only suspension points
//! are the queue fetch and the dispatch tasks it spawns.
//!
//! # Cycle
//!
//! Every poll period the loop:
//! 1. Skips the cycle while a block is paused for a duplicate key or while
//!    more than `blocks_min` batches are in flight.
//! 2. Fetches up to `(blocks_max - in_flight - buffered) * items_per_task`
//!    entries past the watermark, splits them into blocks of
//!    `items_per_task` and keeps only the latest entry per key in each block.
//! 3. Dispatches buffered blocks in order until `blocks_max` are in flight.
//!    A block sharing any key with an in-flight batch pauses dispatch until
//!    that batch completes.
//!
//! Dispatch tasks retry forever on timeout or failure with a fixed delay,
//! resubmitting identical batch contents, and report completion back to the
//! loop over a channel.

use crate::config::QueueControllerConfig;
use crate::db::queue;
use crate::services::executor::{BatchItem, DispatchError, TaskExecutor, UpdateBatch};
use crate::services::model_set_registry::ModelSetRegistry;
use crate::services::status_notifier::StatusNotifier;
use livedb_common::db::QueueEntry;
use livedb_common::events::{EventBus, LiveDbEvent};
use sqlx::{Pool, Sqlite};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// `(model_set_id, key)`
pub type UniqueKey = (i64, String);

/// Fetched entries prepared for one dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct QueueBlock {
    pub batch: UpdateBatch,
    pub unique_keys: HashSet<UniqueKey>,
}

impl QueueBlock {
    /// Build a block from entries in queue order, keeping the latest entry per key
    pub fn from_entries(entries: &[QueueEntry]) -> Self {
        let queue_ids = entries.iter().map(|e| e.id).collect();

        let mut unique_keys = HashSet::new();
        let mut items: Vec<BatchItem> = entries
            .iter()
            .rev()
            .filter(|e| unique_keys.insert((e.model_set_id, e.key.clone())))
            .map(|e| BatchItem {
                model_set_id: e.model_set_id,
                key: e.key.clone(),
                raw_value: e.raw_value.clone(),
            })
            .collect();
        items.reverse();

        Self {
            batch: UpdateBatch {
                batch_id: Uuid::new_v4(),
                queue_ids,
                items,
            },
            unique_keys,
        }
    }
}

/// Split a fetch into blocks of at most `items_per_task` entries
pub fn build_blocks(entries: &[QueueEntry], items_per_task: usize) -> Vec<QueueBlock> {
    entries
        .chunks(items_per_task.max(1))
        .map(QueueBlock::from_entries)
        .collect()
}

/// Completion report from a dispatch task
struct BlockCompleted {
    unique_keys: HashSet<UniqueKey>,
    items: usize,
}

/// Bookkeeping owned by the control loop
#[derive(Default)]
struct ControlState {
    queue_count: usize,
    in_flight: HashSet<UniqueKey>,
    paused_for_duplicate: Option<HashSet<UniqueKey>>,
    buffered: VecDeque<QueueBlock>,
    watermark: i64,
}

/// Collaborators shared by the control loop and its dispatch tasks
#[derive(Clone)]
struct ControllerContext {
    db: Pool<Sqlite>,
    config: QueueControllerConfig,
    executor: Arc<dyn TaskExecutor>,
    registry: ModelSetRegistry,
    status: StatusNotifier,
    event_bus: EventBus,
    queue_count: Arc<AtomicUsize>,
}

/// Owns the control loop task
pub struct QueueController {
    ctx: ControllerContext,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl QueueController {
    pub fn new(
        db: Pool<Sqlite>,
        config: QueueControllerConfig,
        executor: Arc<dyn TaskExecutor>,
        registry: ModelSetRegistry,
        status: StatusNotifier,
        event_bus: EventBus,
    ) -> Self {
        Self {
            ctx: ControllerContext {
                db,
                config,
                executor,
                registry,
                status,
                event_bus,
                queue_count: Arc::new(AtomicUsize::new(0)),
            },
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawn the control loop
    ///
    /// Calling `start` on a running or stopped controller does nothing.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(|p| p.into_inner());
        if task.is_some() || self.shutdown.is_cancelled() {
            warn!("Queue controller already started");
            return;
        }

        info!(
            poll_period_ms = self.ctx.config.poll_period.as_millis() as u64,
            items_per_task = self.ctx.config.items_per_task,
            blocks_max = self.ctx.config.blocks_max,
            blocks_min = self.ctx.config.blocks_min,
            "Starting queue controller"
        );

        let ctx = self.ctx.clone();
        let shutdown = self.shutdown.clone();
        *task = Some(tokio::spawn(control_loop(ctx, shutdown)));
    }

    /// Stop polling and abandon in-flight batches
    ///
    /// Abandoned batches stay in the durable queue and are fetched again by
    /// the next controller.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let task = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Queue controller task ended abnormally: {}", e);
            }
        }

        self.ctx
            .status
            .set_queue_status(false, self.ctx.queue_count.load(Ordering::SeqCst));
        info!("Queue controller stopped");
    }

    /// True while any batch is dispatched and unacknowledged
    pub fn is_busy(&self) -> bool {
        self.queue_count() > 0
    }

    /// Batches dispatched and not yet acknowledged
    pub fn queue_count(&self) -> usize {
        self.ctx.queue_count.load(Ordering::SeqCst)
    }
}

async fn control_loop(ctx: ControllerContext, shutdown: CancellationToken) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<BlockCompleted>();
    let mut state = ControlState::default();

    let mut timer = interval(ctx.config.poll_period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(done) = done_rx.recv() => on_block_completed(&ctx, &mut state, done),
            _ = timer.tick() => poll(&ctx, &mut state, &done_tx, &shutdown).await,
        }
    }

    debug!(
        queue_count = state.queue_count,
        buffered = state.buffered.len(),
        "Queue control loop exited"
    );
}

async fn poll(
    ctx: &ControllerContext,
    state: &mut ControlState,
    done_tx: &mpsc::UnboundedSender<BlockCompleted>,
    shutdown: &CancellationToken,
) {
    if state.paused_for_duplicate.is_some() {
        return;
    }
    if state.queue_count > ctx.config.blocks_min {
        return;
    }

    let free_blocks = ctx
        .config
        .blocks_max
        .saturating_sub(state.queue_count + state.buffered.len());

    if free_blocks > 0 {
        let limit = free_blocks * ctx.config.items_per_task;
        match queue::fetch_after(&ctx.db, state.watermark, limit).await {
            Ok(entries) => {
                if let Some(last) = entries.last() {
                    state.watermark = last.id;
                    let blocks = build_blocks(&entries, ctx.config.items_per_task);
                    debug!(
                        entries = entries.len(),
                        blocks = blocks.len(),
                        watermark = state.watermark,
                        "Fetched queue entries"
                    );
                    state.buffered.extend(blocks);
                }
            }
            Err(e) => {
                error!("Failed to fetch raw value queue: {}", e);
                ctx.status.set_queue_status(false, state.queue_count);
                ctx.status.set_last_error(e.to_string());
                return;
            }
        }
    }

    dispatch_ready(ctx, state, done_tx, shutdown);
    ctx.status.set_queue_status(true, state.queue_count);
}

fn dispatch_ready(
    ctx: &ControllerContext,
    state: &mut ControlState,
    done_tx: &mpsc::UnboundedSender<BlockCompleted>,
    shutdown: &CancellationToken,
) {
    while let Some(block) = state.buffered.front() {
        if state.queue_count >= ctx.config.blocks_max {
            break;
        }

        if !block.unique_keys.is_disjoint(&state.in_flight) {
            debug!(
                batch_id = %block.batch.batch_id,
                "Block shares keys with an in-flight batch, pausing"
            );
            state.paused_for_duplicate = Some(block.unique_keys.clone());
            break;
        }

        let Some(block) = state.buffered.pop_front() else {
            break;
        };
        state.in_flight.extend(block.unique_keys.iter().cloned());
        state.queue_count += 1;
        ctx.queue_count.store(state.queue_count, Ordering::SeqCst);

        tokio::spawn(dispatch_block(
            ctx.clone(),
            block,
            done_tx.clone(),
            shutdown.clone(),
        ));
    }
}

fn on_block_completed(ctx: &ControllerContext, state: &mut ControlState, done: BlockCompleted) {
    state.queue_count = state.queue_count.saturating_sub(1);
    ctx.queue_count.store(state.queue_count, Ordering::SeqCst);

    for key in &done.unique_keys {
        state.in_flight.remove(key);
    }

    let unpause = state
        .paused_for_duplicate
        .as_ref()
        .is_some_and(|paused| !paused.is_disjoint(&done.unique_keys));
    if unpause {
        debug!("Conflicting batch completed, resuming dispatch");
        state.paused_for_duplicate = None;
    }

    ctx.status.set_queue_status(true, state.queue_count);
    ctx.status.add_to_processed_total(done.items as u64);
}

/// Submit one block until it succeeds or the controller shuts down
async fn dispatch_block(
    ctx: ControllerContext,
    block: QueueBlock,
    done_tx: mpsc::UnboundedSender<BlockCompleted>,
    shutdown: CancellationToken,
) {
    let batch = &block.batch;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let result = tokio::select! {
            _ = shutdown.cancelled() => return,
            r = tokio::time::timeout(ctx.config.task_timeout, ctx.executor.submit(batch)) => {
                r.unwrap_or(Err(DispatchError::Timeout(ctx.config.task_timeout)))
            }
        };

        match result {
            Ok(applied) => {
                debug!(
                    batch_id = %batch.batch_id,
                    items = batch.items.len(),
                    applied,
                    attempt,
                    "Batch acknowledged"
                );
                publish_updates(&ctx, batch).await;

                let _ = done_tx.send(BlockCompleted {
                    unique_keys: block.unique_keys,
                    items: block.batch.items.len(),
                });
                return;
            }
            Err(e) => {
                warn!(
                    batch_id = %batch.batch_id,
                    attempt,
                    "Batch dispatch failed, retrying in {:?}: {}",
                    ctx.config.retry_delay,
                    e
                );
                ctx.status.set_last_error(e.to_string());
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(ctx.config.retry_delay) => {}
        }
        info!(batch_id = %batch.batch_id, attempt = attempt + 1, "Resubmitting batch");
    }
}

async fn publish_updates(ctx: &ControllerContext, batch: &UpdateBatch) {
    for (model_set_id, updates) in batch.updates_by_model_set() {
        match ctx.registry.key_for_id(model_set_id).await {
            Ok(Some(model_set_key)) => {
                ctx.event_bus.emit_lossy(LiveDbEvent::RawValuesUpdated {
                    model_set_key,
                    updates,
                    timestamp: chrono::Utc::now(),
                });
            }
            Ok(None) => warn!(model_set_id, "Updates applied to unknown model set"),
            Err(e) => warn!(model_set_id, "Failed to resolve model set for notification: {}", e),
        }
    }
}
