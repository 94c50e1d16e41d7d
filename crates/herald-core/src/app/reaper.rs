//! Reaper - lease 切れジョブの回収
//!
//! Runs as a scheduler trigger. Jobs whose worker vanished go back to pending;
//! jobs that ran out of attempts this way are dead and their handler is told.

use std::sync::Arc;

use tracing::{debug, info};

use super::registry::HandlerRegistry;
use crate::error::QueueError;
use crate::queue::{FailOutcome, LEASE_EXPIRED, Queue};

pub struct Reaper {
    queue: Arc<dyn Queue>,
    registry: Arc<HandlerRegistry>,
}

impl Reaper {
    pub fn new(queue: Arc<dyn Queue>, registry: Arc<HandlerRegistry>) -> Self {
        Self { queue, registry }
    }

    /// One sweep. Returns how many leases were reclaimed.
    pub async fn run_once(&self) -> Result<usize, QueueError> {
        let stalled = self.queue.recover_stalled().await?;
        if stalled.is_empty() {
            debug!("reaper: nothing stalled");
            return Ok(0);
        }

        for s in &stalled {
            if s.outcome != FailOutcome::Dead {
                continue;
            }
            if let Some(handler) = self.registry.get(s.job.job_type) {
                let reason = s.job.last_error.as_deref().unwrap_or(LEASE_EXPIRED);
                handler.on_dead(&s.job, reason).await;
            }
        }
        info!(reclaimed = stalled.len(), "reaper sweep done");
        Ok(stalled.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::registry::{HandlerOutcome, JobHandler};
    use crate::domain::{JobId, JobType, QueueName};
    use crate::error::HandlerError;
    use crate::ports::FixedClock;
    use crate::queue::{EnqueueOptions, JobRecord, JobStatus, LocalQueue, LocalQueueOptions, RetryPolicy};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct DeadLog(Mutex<Vec<(JobId, String)>>);

    #[async_trait]
    impl JobHandler for DeadLog {
        async fn handle(&self, _job: &JobRecord) -> Result<HandlerOutcome, HandlerError> {
            Ok(HandlerOutcome::Completed)
        }

        async fn on_dead(&self, job: &JobRecord, reason: &str) {
            self.0.lock().unwrap().push((job.id, reason.to_string()));
        }
    }

    #[tokio::test]
    async fn reclaims_expired_leases_and_reports_dead_jobs() {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let options = LocalQueueOptions::new(RetryPolicy::default(), Duration::from_secs(60))
            .with_clock(clock.clone());
        let queue = Arc::new(LocalQueue::in_memory(options).await.unwrap());
        let log = Arc::new(DeadLog::default());
        let mut registry = HandlerRegistry::new();
        registry.register(JobType::Publish, log.clone()).unwrap();
        let reaper = Reaper::new(queue.clone(), Arc::new(registry));

        let q = QueueName::content();
        let mut ids = Vec::new();
        for max_attempts in [1, 2] {
            let id = queue
                .enqueue(
                    &q,
                    JobType::Publish,
                    serde_json::json!({}),
                    EnqueueOptions {
                        max_attempts,
                        ..EnqueueOptions::default()
                    },
                )
                .await
                .unwrap();
            ids.push(id);
            queue.dequeue(&q).await.unwrap().unwrap();
        }

        assert_eq!(reaper.run_once().await.unwrap(), 0);
        clock.advance(Duration::from_secs(61));
        assert_eq!(reaper.run_once().await.unwrap(), 2);

        let single = queue.get(ids[0]).await.unwrap().unwrap();
        assert_eq!(single.status, JobStatus::Dead);
        let twice = queue.get(ids[1]).await.unwrap().unwrap();
        assert_eq!(twice.status, JobStatus::Pending);
        assert_eq!(twice.attempt, 2);

        let dead = log.0.lock().unwrap().clone();
        assert_eq!(dead, vec![(ids[0], "lease expired".to_string())]);
    }
}
