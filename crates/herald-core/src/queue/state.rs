//! Job status state machine for the queue.

use serde::{Deserialize, Serialize};

/// Job status.
///
/// State transitions:
/// - Pending -> Active -> Completed
/// - Pending -> Active -> Failed -> Pending (backoff, loop until max_attempts)
/// - Pending -> Active -> Dead (attempts exhausted, or buried by the handler)
/// - Active -> Pending (lease expired, stalled job recovery)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Dequeuable once `not_before` has passed.
    Pending,

    /// Leased by a worker.
    Active,

    /// Acked.
    Completed,

    /// Last attempt failed; waiting for `not_before` before becoming pending.
    Failed,

    /// No further attempts.
    Dead,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Dead)
    }

    /// Holds its idempotency key: a second enqueue with the same key is
    /// rejected while the job is in one of these states.
    pub fn is_outstanding(self) -> bool {
        !self.is_terminal()
    }
}
