//! WorkerPool - 固定サイズのワーカー群
//!
//! Each worker loops: dequeue -> run handler (with timeout) -> ack / fail /
//! bury. The pool knows nothing about the domain; the handler owns all side
//! effects.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::registry::{HandlerOutcome, HandlerRegistry};
use crate::domain::QueueName;
use crate::queue::{FailOutcome, Lease, Queue};

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub handler_timeout: Duration,
    /// Idle polling starts at `poll_min` and doubles up to `poll_max`.
    pub poll_min: Duration,
    pub poll_max: Duration,
}

/// Adaptive idle backoff: reset on work, double (with jitter) when idle.
#[derive(Debug, Clone)]
struct IdlePoll {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl IdlePoll {
    fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }

    fn reset(&mut self) {
        self.current = self.min;
    }

    /// Interval to wait now; the next one is doubled.
    fn idle(&mut self) -> Duration {
        let wait = self.current;
        self.current = (self.current * 2).min(self.max);
        // +/-10% so idle workers do not poll in lockstep
        let jitter = rand::random::<f64>().mul_add(0.2, 0.9);
        wait.mul_f64(jitter)
    }
}

/// Worker group handle.
/// - `shutdown_and_join()` で新しい lease の取得を止め、実行中の handler の完了を待つ
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.workers` workers on `queue_name`.
    pub fn spawn(
        queue_name: QueueName,
        config: WorkerPoolConfig,
        queue: Arc<dyn Queue>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            let worker = Worker {
                id: worker_id,
                queue_name: queue_name.clone(),
                config: config.clone(),
                queue: Arc::clone(&queue),
                registry: Arc::clone(&registry),
            };
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(worker.run(rx)));
        }
        info!(queue = %queue_name, workers = config.workers, "worker pool started");

        Self { shutdown_tx, joins }
    }

    /// Stop taking new leases. In-flight handlers are not cancelled.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "worker task failed");
            }
        }
        info!("worker pool stopped");
    }
}

enum Verdict {
    Ack,
    Fail(String),
    Bury(String),
}

struct Worker {
    id: usize,
    queue_name: QueueName,
    config: WorkerPoolConfig,
    queue: Arc<dyn Queue>,
    registry: Arc<HandlerRegistry>,
}

impl Worker {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut poll = IdlePoll::new(self.config.poll_min, self.config.poll_max);
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let lease = match self.queue.dequeue(&self.queue_name).await {
                Ok(lease) => lease,
                Err(e) => {
                    error!(worker = self.id, error = %e, "dequeue failed");
                    None
                }
            };

            let Some(lease) = lease else {
                let wait = poll.idle();
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = self.queue.wait_for_work(wait) => {}
                }
                continue;
            };

            poll.reset();
            self.process(lease).await;
        }
        debug!(worker = self.id, "worker exited");
    }

    async fn process(&self, lease: Lease) {
        let job = lease.job.clone();
        let Some(handler) = self.registry.get(job.job_type) else {
            let reason = format!("no handler for job_type={}", job.job_type);
            error!(worker = self.id, job_id = %job.id, "{reason}");
            if let Err(e) = self.queue.bury(&lease, reason).await {
                warn!(worker = self.id, job_id = %job.id, error = %e, "bury failed");
            }
            return;
        };

        // 別タスクで実行: panic は JoinError になり、timeout 時は abort できる
        let task = {
            let handler = Arc::clone(&handler);
            let job = job.clone();
            tokio::spawn(async move { handler.handle(&job).await })
        };
        let abort = task.abort_handle();

        let verdict = match tokio::time::timeout(self.config.handler_timeout, task).await {
            Ok(Ok(Ok(HandlerOutcome::Completed))) => Verdict::Ack,
            Ok(Ok(Ok(HandlerOutcome::Retry(reason)))) => Verdict::Fail(reason),
            Ok(Ok(Ok(HandlerOutcome::GiveUp(reason)))) => Verdict::Bury(reason),
            Ok(Ok(Err(e))) => Verdict::Fail(e.to_string()),
            Ok(Err(join_err)) => {
                error!(worker = self.id, job_id = %job.id, error = %join_err, "handler panicked");
                Verdict::Fail(format!("handler panicked: {join_err}"))
            }
            Err(_) => {
                abort.abort();
                warn!(worker = self.id, job_id = %job.id, timeout = ?self.config.handler_timeout, "handler timed out");
                Verdict::Fail(format!(
                    "handler timed out after {:?}",
                    self.config.handler_timeout
                ))
            }
        };

        let reported = match verdict {
            Verdict::Ack => self.queue.ack(&lease).await,
            Verdict::Bury(reason) => self.queue.bury(&lease, reason).await,
            Verdict::Fail(reason) => match self.queue.fail(&lease, reason.clone()).await {
                Ok(FailOutcome::Dead) => {
                    handler.on_dead(&job, &reason).await;
                    Ok(())
                }
                Ok(FailOutcome::Retrying { .. }) => Ok(()),
                Err(e) => Err(e),
            },
        };
        if let Err(e) = reported {
            // LeaseLost: the reaper already handed the job to someone else
            warn!(worker = self.id, job_id = %job.id, error = %e, "could not report job outcome");
        }
    }
}
