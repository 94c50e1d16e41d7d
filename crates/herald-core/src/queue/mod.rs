//! Queue module: job state, retry policy, and the local durable implementation.

mod local;
mod record;
mod retry;
mod state;

pub use local::{LocalQueue, LocalQueueOptions};
pub use record::{JobRecord, LeaseInfo};
pub(crate) use record::LEASE_EXPIRED;
pub use retry::RetryPolicy;
pub use state::JobStatus;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{JobId, JobType, LeaseId, QueueName};
use crate::error::QueueError;
use crate::observability::QueueCounts;

/// Per-enqueue options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Not dequeuable before `now + delay`.
    pub delay: Duration,
    pub max_attempts: u32,
    /// At most one outstanding job per key.
    pub idempotency_key: Option<String>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            max_attempts: 3,
            idempotency_key: None,
        }
    }
}

/// A dequeued job. The worker holding it must `ack`, `fail` or `bury` before
/// `expires_at`, or the queue hands the job to someone else.
#[derive(Debug, Clone)]
pub struct Lease {
    pub job: JobRecord,
    pub lease_id: LeaseId,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn job_id(&self) -> JobId {
        self.job.id
    }
}

/// What the queue decided after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// `attempt` is the number of the next attempt.
    Retrying {
        attempt: u32,
        not_before: DateTime<Utc>,
    },
    Dead,
}

/// A job whose lease expired, after recovery.
#[derive(Debug, Clone)]
pub struct StalledJob {
    pub job: JobRecord,
    pub outcome: FailOutcome,
}

/// Queue port.
///
/// Design intent:
/// - Queue manages status transitions (pending -> active -> ...).
/// - Workers execute side effects and report the result with the lease.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Persist a new job. Never waits for a worker.
    async fn enqueue(
        &self,
        queue: &QueueName,
        job_type: JobType,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<JobId, QueueError>;

    /// Lease one ready job, or `None` if nothing is due.
    async fn dequeue(&self, queue: &QueueName) -> Result<Option<Lease>, QueueError>;

    /// Mark success.
    async fn ack(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Mark failure; the queue decides retry vs dead.
    async fn fail(&self, lease: &Lease, error: String) -> Result<FailOutcome, QueueError>;

    /// Mark dead without further attempts.
    async fn bury(&self, lease: &Lease, error: String) -> Result<(), QueueError>;

    /// Return expired leases to pending (or dead when out of attempts).
    async fn recover_stalled(&self) -> Result<Vec<StalledJob>, QueueError>;

    /// Delete completed/dead jobs finished before `older_than`.
    async fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<usize, QueueError>;

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, QueueError>;

    async fn counts(&self, queue: &QueueName) -> Result<QueueCounts, QueueError>;

    /// Idle wait used by workers between empty polls. Implementations may
    /// return early when new work arrives.
    async fn wait_for_work(&self, max_wait: Duration) {
        tokio::time::sleep(max_wait).await;
    }
}
