//! Process-wide status record for the update queue

use serde::{Deserialize, Serialize};

/// Observability state published to status subscribers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// True while the queue controller is polling normally
    pub raw_value_queue_running: bool,
    /// Batches dispatched but not yet acknowledged
    pub raw_value_queue_size: usize,
    /// Update items applied since startup
    pub raw_value_processed_total: u64,
    /// Last error reported by the controller
    pub raw_value_last_error: Option<String>,
}
