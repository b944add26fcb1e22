//! HTTP API handlers for livedb-server

pub mod health;
pub mod sse;
pub mod status;
pub mod values;

pub use health::health_routes;
pub use sse::event_stream;
pub use status::get_status;
pub use values::{import_items, prioritize, queue_raw_values, read_values, update_display_values};
