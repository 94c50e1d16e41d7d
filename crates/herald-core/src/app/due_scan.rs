//! DueScan - 期限の来た target を publish ジョブとして投入
//!
//! Runs as the `due_content_scan` trigger. Double enqueues are prevented by
//! the queue's idempotency key, derived from `(content, platform,
//! scheduled_at)`: a reschedule yields a new key, a rescan of the same intent
//! does not.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::domain::{DueTarget, JobType, PublishPayload, QueueName};
use crate::error::{QueueError, StoreError};
use crate::ports::{Clock, ContentStore};
use crate::queue::{EnqueueOptions, Queue};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub due: usize,
    pub enqueued: usize,
    /// Targets that already had an outstanding job.
    pub duplicates: usize,
    pub errors: usize,
}

pub struct DueScan {
    store: Arc<dyn ContentStore>,
    queue: Arc<dyn Queue>,
    clock: Arc<dyn Clock>,
}

impl DueScan {
    pub fn new(store: Arc<dyn ContentStore>, queue: Arc<dyn Queue>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            queue,
            clock,
        }
    }

    pub async fn run_once(&self) -> Result<ScanReport, StoreError> {
        let now = self.clock.now();
        let due = self.store.find_due_targets(now).await?;
        let mut report = ScanReport {
            due: due.len(),
            ..ScanReport::default()
        };
        if due.is_empty() {
            debug!("due scan: nothing due");
            return Ok(report);
        }

        let mut set = JoinSet::new();
        for target in due {
            let queue = Arc::clone(&self.queue);
            set.spawn(async move { enqueue_publish(queue.as_ref(), target).await });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => report.enqueued += 1,
                Ok(Err(QueueError::Duplicate { .. })) => report.duplicates += 1,
                Ok(Err(e)) => {
                    error!(error = %e, "due scan: enqueue failed");
                    report.errors += 1;
                }
                Err(e) => {
                    error!(error = %e, "due scan: enqueue task failed");
                    report.errors += 1;
                }
            }
        }

        info!(
            due = report.due,
            enqueued = report.enqueued,
            duplicates = report.duplicates,
            errors = report.errors,
            "due scan done"
        );
        Ok(report)
    }
}

async fn enqueue_publish(queue: &dyn Queue, target: DueTarget) -> Result<(), QueueError> {
    let payload = PublishPayload {
        content_id: target.content_id,
        platform: target.platform,
        scheduled_at: target.scheduled_at,
    };
    let options = EnqueueOptions {
        max_attempts: target.max_retries.max(1),
        idempotency_key: Some(payload.idempotency_key()),
        ..EnqueueOptions::default()
    };
    let value = serde_json::to_value(&payload)?;
    queue
        .enqueue(&QueueName::content(), JobType::Publish, value, options)
        .await?;
    Ok(())
}
