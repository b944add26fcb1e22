//! LiveDB services
//!
//! - `QueueController`: drains the update queue through a `TaskExecutor`
//! - `ImportController`: creates rows for new keys
//! - `StatusNotifier`: rate-limited status publication
//! - `BulkReader`: chunked value reads
//! - `LiveDb`: facade over all of the above

pub mod bulk_reader;
pub mod executor;
pub mod import_controller;
pub mod livedb;
pub mod model_set_registry;
pub mod queue_controller;
pub mod status_notifier;

pub use bulk_reader::BulkReader;
pub use executor::{BatchItem, DispatchError, TaskExecutor, UpdateBatch, WorkerPoolExecutor};
pub use import_controller::ImportController;
pub use livedb::LiveDb;
pub use model_set_registry::ModelSetRegistry;
pub use queue_controller::{QueueBlock, QueueController};
pub use status_notifier::StatusNotifier;
