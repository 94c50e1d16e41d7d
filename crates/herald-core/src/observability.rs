use serde::{Deserialize, Serialize};

/// Job counts for one queue, by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead: usize,
}

impl QueueCounts {
    /// Jobs that still hold their idempotency key.
    pub fn outstanding(&self) -> usize {
        self.pending + self.active + self.failed
    }
}
