//! Local durable queue.
//!
//! The index (ready lists, backoff heap, active set, idempotency keys) lives in
//! memory behind one mutex. Every record change is written through the
//! `JobStore` before the call returns, so `open` can rebuild the index after
//! a restart.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use super::record::LEASE_EXPIRED;
use super::{
    EnqueueOptions, FailOutcome, JobRecord, JobStatus, Lease, LeaseInfo, Queue, RetryPolicy,
    StalledJob,
};
use crate::domain::{JobId, JobType, PipelineEvent, QueueName};
use crate::error::QueueError;
use crate::impls::{MemoryJobStore, NoopEventSink};
use crate::observability::QueueCounts;
use crate::ports::clock::after;
use crate::ports::{Clock, EventSink, IdGenerator, JobStore, SystemClock, UlidGenerator};

/// Backoff heap entry.
///
/// Reverse ordering so `BinaryHeap` acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledJob {
    not_before: DateTime<Utc>,
    job_id: JobId,
}

impl PartialOrd for ScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledJob {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .not_before
            .cmp(&self.not_before)
            .then_with(|| other.job_id.cmp(&self.job_id))
    }
}

#[derive(Default)]
struct LocalQueueState {
    /// All job records (single source of truth).
    jobs: HashMap<JobId, JobRecord>,

    /// Pending jobs whose `not_before` has passed.
    ready: HashMap<QueueName, VecDeque<JobId>>,

    /// Delayed pending jobs and failed jobs waiting for backoff.
    scheduled: HashMap<QueueName, BinaryHeap<ScheduledJob>>,

    active: HashSet<JobId>,

    /// idempotency key -> outstanding job.
    keys: HashMap<String, JobId>,
}

impl LocalQueueState {
    /// Place a record in the index structures matching its status.
    fn index(&mut self, job: &JobRecord, now: DateTime<Utc>) {
        match job.status {
            JobStatus::Pending if job.not_before <= now => {
                self.ready
                    .entry(job.queue.clone())
                    .or_default()
                    .push_back(job.id);
            }
            JobStatus::Pending | JobStatus::Failed => {
                self.schedule(job);
            }
            JobStatus::Active => {
                self.active.insert(job.id);
            }
            JobStatus::Completed | JobStatus::Dead => {}
        }
        if job.status.is_outstanding()
            && let Some(key) = &job.idempotency_key
        {
            self.keys.insert(key.clone(), job.id);
        }
    }

    fn schedule(&mut self, job: &JobRecord) {
        self.scheduled
            .entry(job.queue.clone())
            .or_default()
            .push(ScheduledJob {
                not_before: job.not_before,
                job_id: job.id,
            });
    }

    fn release_key(&mut self, job: &JobRecord) {
        if let Some(key) = &job.idempotency_key
            && self.keys.get(key) == Some(&job.id)
        {
            self.keys.remove(key);
        }
    }

    fn outstanding_for(&self, key: &str) -> Option<JobId> {
        let id = self.keys.get(key)?;
        self.jobs
            .get(id)
            .filter(|job| job.status.is_outstanding())
            .map(|job| job.id)
    }

    fn pop_due(&mut self, queue: &QueueName, now: DateTime<Utc>) -> Option<ScheduledJob> {
        let heap = self.scheduled.get_mut(queue)?;
        if heap.peek()?.not_before > now {
            return None;
        }
        heap.pop()
    }

    /// Clone of the job `lease` refers to, if the lease still owns it.
    fn owned(&self, lease: &Lease) -> Result<JobRecord, QueueError> {
        let job = self
            .jobs
            .get(&lease.job.id)
            .ok_or(QueueError::UnknownJob(lease.job.id))?;
        if !job.is_leased_by(lease.lease_id) {
            return Err(QueueError::LeaseLost {
                job_id: lease.job.id,
                lease_id: lease.lease_id,
            });
        }
        Ok(job.clone())
    }

    fn counts(&self, queue: &QueueName) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for job in self.jobs.values().filter(|j| &j.queue == queue) {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Active => counts.active += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Dead => counts.dead += 1,
            }
        }
        counts
    }
}

/// Collaborators and policy for a `LocalQueue`.
pub struct LocalQueueOptions {
    pub retry_policy: RetryPolicy,
    pub lease_timeout: Duration,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventSink>,
    pub ids: Arc<dyn IdGenerator>,
}

impl LocalQueueOptions {
    pub fn new(retry_policy: RetryPolicy, lease_timeout: Duration) -> Self {
        Self {
            retry_policy,
            lease_timeout,
            clock: Arc::new(SystemClock),
            events: Arc::new(NoopEventSink),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }
}

pub struct LocalQueue {
    state: Mutex<LocalQueueState>,
    notify: Notify,
    store: Arc<dyn JobStore>,
    retry_policy: RetryPolicy,
    lease_timeout: Duration,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    ids: Arc<dyn IdGenerator>,
}

impl LocalQueue {
    /// Load every stored job and rebuild the index.
    ///
    /// Jobs that were active when the previous process died keep their lease;
    /// stalled-job recovery returns them to pending once it expires.
    pub async fn open(
        store: Arc<dyn JobStore>,
        options: LocalQueueOptions,
    ) -> Result<Self, QueueError> {
        let mut jobs = store.load_all().await?;
        jobs.sort_by_key(|j| j.id);

        let now = options.clock.now();
        let mut state = LocalQueueState::default();
        for job in jobs {
            state.index(&job, now);
            state.jobs.insert(job.id, job);
        }
        info!(
            jobs = state.jobs.len(),
            active = state.active.len(),
            "job queue opened"
        );

        Ok(Self {
            state: Mutex::new(state),
            notify: Notify::new(),
            store,
            retry_policy: options.retry_policy,
            lease_timeout: options.lease_timeout,
            clock: options.clock,
            events: options.events,
            ids: options.ids,
        })
    }

    /// Non-durable queue backed by `MemoryJobStore`.
    pub async fn in_memory(options: LocalQueueOptions) -> Result<Self, QueueError> {
        Self::open(Arc::new(MemoryJobStore::new()), options).await
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Write-through: persist first, then update the in-memory record.
    async fn commit(&self, state: &mut LocalQueueState, job: JobRecord) -> Result<(), QueueError> {
        self.store.save(&job).await?;
        state.jobs.insert(job.id, job);
        Ok(())
    }
}

#[async_trait]
impl Queue for LocalQueue {
    async fn enqueue(
        &self,
        queue: &QueueName,
        job_type: JobType,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<JobId, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if let Some(key) = &options.idempotency_key
            && let Some(existing) = state.outstanding_for(key)
        {
            drop(state);
            debug!(%queue, key = %key, %existing, "duplicate enqueue rejected");
            self.events.emit(PipelineEvent::JobDuplicateRejected {
                queue: queue.clone(),
                idempotency_key: key.clone(),
                existing,
            });
            return Err(QueueError::Duplicate {
                key: key.clone(),
                existing,
            });
        }

        let job = JobRecord::new(
            self.ids.job_id(),
            queue.clone(),
            job_type,
            payload,
            options.max_attempts,
            after(now, options.delay),
            options.idempotency_key,
            now,
        );
        let id = job.id;
        let not_before = job.not_before;
        let idempotency_key = job.idempotency_key.clone();

        state.index(&job, now);
        if let Err(e) = self.commit(&mut state, job).await {
            // Roll the index back so the key is not held by a job that was never stored.
            if let Some(key) = &idempotency_key {
                state.keys.remove(key);
            }
            if let Some(ready) = state.ready.get_mut(queue) {
                ready.retain(|j| *j != id);
            }
            return Err(e);
        }
        drop(state);

        // Notify outside the lock
        self.notify.notify_one();
        debug!(job_id = %id, %queue, %job_type, "job enqueued");
        self.events.emit(PipelineEvent::JobEnqueued {
            job_id: id,
            queue: queue.clone(),
            job_type,
            idempotency_key,
            not_before,
        });
        Ok(id)
    }

    async fn dequeue(&self, queue: &QueueName) -> Result<Option<Lease>, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        // Move due entries from the backoff heap to the ready list.
        while let Some(entry) = state.pop_due(queue, now) {
            let Some(job) = state.jobs.get(&entry.job_id) else {
                continue;
            };
            match job.status {
                JobStatus::Pending => {}
                JobStatus::Failed => {
                    let mut job = job.clone();
                    job.requeue(now);
                    if let Err(e) = self.commit(&mut state, job).await {
                        state.scheduled.entry(queue.clone()).or_default().push(entry);
                        return Err(e);
                    }
                }
                _ => continue,
            }
            state
                .ready
                .entry(queue.clone())
                .or_default()
                .push_back(entry.job_id);
        }

        loop {
            let Some(id) = state.ready.get_mut(queue).and_then(|r| r.pop_front()) else {
                return Ok(None);
            };
            let Some(job) = state.jobs.get(&id).filter(|j| j.status == JobStatus::Pending) else {
                continue;
            };

            let mut job = job.clone();
            let lease = LeaseInfo {
                lease_id: self.ids.lease_id(),
                expires_at: after(now, self.lease_timeout),
            };
            job.start_attempt(lease.clone(), now);
            if let Err(e) = self.commit(&mut state, job.clone()).await {
                state.ready.entry(queue.clone()).or_default().push_front(id);
                return Err(e);
            }
            state.active.insert(id);

            debug!(job_id = %id, attempt = job.attempt, lease_id = %lease.lease_id, "job leased");
            return Ok(Some(Lease {
                job,
                lease_id: lease.lease_id,
                expires_at: lease.expires_at,
            }));
        }
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut job = state.owned(lease)?;

        job.mark_completed(now);
        let (id, job_type, attempt) = (job.id, job.job_type, job.attempt);
        state.release_key(&job);
        self.commit(&mut state, job).await?;
        state.active.remove(&id);
        drop(state);

        debug!(job_id = %id, attempt, "job completed");
        self.events.emit(PipelineEvent::JobCompleted {
            job_id: id,
            job_type,
            attempt,
        });
        Ok(())
    }

    async fn fail(&self, lease: &Lease, error: String) -> Result<FailOutcome, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut job = state.owned(lease)?;
        let id = job.id;

        if job.has_attempts_left() {
            let delay = self.retry_policy.next_delay(job.attempt);
            let not_before = after(now, delay);
            job.schedule_retry(not_before, error.clone(), now);
            let attempt = job.attempt;
            state.schedule(&job);
            self.commit(&mut state, job).await?;
            state.active.remove(&id);
            drop(state);

            self.notify.notify_one();
            info!(job_id = %id, attempt, ?delay, error = %error, "job retry scheduled");
            self.events.emit(PipelineEvent::JobRetryScheduled {
                job_id: id,
                attempt,
                not_before,
                error,
            });
            Ok(FailOutcome::Retrying {
                attempt,
                not_before,
            })
        } else {
            job.mark_dead(error.clone(), now);
            let (job_type, attempt) = (job.job_type, job.attempt);
            state.release_key(&job);
            self.commit(&mut state, job).await?;
            state.active.remove(&id);
            drop(state);

            warn!(job_id = %id, attempt, error = %error, "job dead: attempts exhausted");
            self.events.emit(PipelineEvent::JobDead {
                job_id: id,
                job_type,
                attempt,
                error,
            });
            Ok(FailOutcome::Dead)
        }
    }

    async fn bury(&self, lease: &Lease, error: String) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut job = state.owned(lease)?;

        job.mark_dead(error.clone(), now);
        let (id, job_type, attempt) = (job.id, job.job_type, job.attempt);
        state.release_key(&job);
        self.commit(&mut state, job).await?;
        state.active.remove(&id);
        drop(state);

        warn!(job_id = %id, attempt, error = %error, "job buried");
        self.events.emit(PipelineEvent::JobDead {
            job_id: id,
            job_type,
            attempt,
            error,
        });
        Ok(())
    }

    async fn recover_stalled(&self) -> Result<Vec<StalledJob>, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let mut expired: Vec<JobId> = state
            .active
            .iter()
            .filter(|id| state.jobs.get(*id).is_some_and(|j| j.lease_expired(now)))
            .copied()
            .collect();
        expired.sort();

        let mut recovered = Vec::with_capacity(expired.len());
        for id in expired {
            let Some(job) = state.jobs.get(&id) else {
                continue;
            };
            let mut job = job.clone();
            let outcome = if job.has_attempts_left() {
                job.recover(now);
                FailOutcome::Retrying {
                    attempt: job.attempt,
                    not_before: now,
                }
            } else {
                job.mark_dead(LEASE_EXPIRED.to_string(), now);
                state.release_key(&job);
                FailOutcome::Dead
            };
            self.commit(&mut state, job.clone()).await?;
            state.active.remove(&id);
            if matches!(outcome, FailOutcome::Retrying { .. }) {
                state
                    .ready
                    .entry(job.queue.clone())
                    .or_default()
                    .push_back(id);
            }
            recovered.push(StalledJob { job, outcome });
        }
        drop(state);

        for stalled in &recovered {
            let job = &stalled.job;
            match stalled.outcome {
                FailOutcome::Retrying { attempt, .. } => {
                    self.notify.notify_one();
                    warn!(job_id = %job.id, attempt, "stalled job recovered");
                    self.events.emit(PipelineEvent::JobRecovered {
                        job_id: job.id,
                        attempt,
                    });
                }
                FailOutcome::Dead => {
                    warn!(job_id = %job.id, attempt = job.attempt, "stalled job dead: attempts exhausted");
                    self.events.emit(PipelineEvent::JobDead {
                        job_id: job.id,
                        job_type: job.job_type,
                        attempt: job.attempt,
                        error: LEASE_EXPIRED.to_string(),
                    });
                }
            }
        }
        Ok(recovered)
    }

    async fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut state = self.state.lock().await;
        let finished: Vec<JobId> = state
            .jobs
            .values()
            .filter(|j| j.status.is_terminal() && j.finished_at.is_some_and(|t| t < older_than))
            .map(|j| j.id)
            .collect();

        for id in &finished {
            self.store.remove(*id).await?;
            state.jobs.remove(id);
        }
        drop(state);

        let count = finished.len();
        if count > 0 {
            info!(count, %older_than, "finished jobs purged");
            self.events.emit(PipelineEvent::JobsPurged { count });
        }
        Ok(count)
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, QueueError> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&id).cloned())
    }

    async fn counts(&self, queue: &QueueName) -> Result<QueueCounts, QueueError> {
        let state = self.state.lock().await;
        Ok(state.counts(queue))
    }

    async fn wait_for_work(&self, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.notify.notified()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::RecordingEventSink;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    const LEASE: Duration = Duration::from_secs(300);

    struct Fixture {
        queue: LocalQueue,
        clock: Arc<FixedClock>,
        store: Arc<MemoryJobStore>,
        events: Arc<RecordingEventSink>,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryJobStore::new());
        let events = Arc::new(RecordingEventSink::new());
        let queue = open_with(&store, &clock, &events).await;
        Fixture {
            queue,
            clock,
            store,
            events,
        }
    }

    async fn open_with(
        store: &Arc<MemoryJobStore>,
        clock: &Arc<FixedClock>,
        events: &Arc<RecordingEventSink>,
    ) -> LocalQueue {
        let options = LocalQueueOptions::new(RetryPolicy::default(), LEASE)
            .with_clock(clock.clone())
            .with_events(events.clone());
        LocalQueue::open(store.clone(), options).await.unwrap()
    }

    fn keyed(key: &str) -> EnqueueOptions {
        EnqueueOptions {
            idempotency_key: Some(key.to_string()),
            ..EnqueueOptions::default()
        }
    }

    async fn put(f: &Fixture, options: EnqueueOptions) -> JobId {
        f.queue
            .enqueue(
                &QueueName::content(),
                JobType::Publish,
                serde_json::json!({"n": 1}),
                options,
            )
            .await
            .unwrap()
    }

    async fn take(f: &Fixture) -> Option<Lease> {
        f.queue.dequeue(&QueueName::content()).await.unwrap()
    }

    #[tokio::test]
    async fn enqueue_dequeue_ack() {
        let f = fixture().await;
        let id = put(&f, EnqueueOptions::default()).await;

        let counts = f.queue.counts(&QueueName::content()).await.unwrap();
        assert_eq!(counts.pending, 1);

        let lease = take(&f).await.unwrap();
        assert_eq!(lease.job_id(), id);
        assert_eq!(lease.job.attempt, 1);
        assert_eq!(lease.expires_at, f.clock.now() + chrono::Duration::seconds(300));

        let counts = f.queue.counts(&QueueName::content()).await.unwrap();
        assert_eq!(counts.active, 1);
        assert_eq!(counts.pending, 0);

        f.queue.ack(&lease).await.unwrap();
        let job = f.queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(f.events.names().contains(&"job_completed"));
    }

    #[tokio::test]
    async fn a_job_is_leased_at_most_once() {
        let f = fixture().await;
        put(&f, EnqueueOptions::default()).await;

        assert!(take(&f).await.is_some());
        assert!(take(&f).await.is_none());
    }

    #[tokio::test]
    async fn other_queues_are_isolated() {
        let f = fixture().await;
        put(&f, EnqueueOptions::default()).await;
        assert!(
            f.queue
                .dequeue(&QueueName::new("housekeeping"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn duplicate_key_is_rejected_while_outstanding() {
        let f = fixture().await;
        let first = put(&f, keyed("k")).await;

        // pending
        let err = f
            .queue
            .enqueue(&QueueName::content(), JobType::Publish, serde_json::Value::Null, keyed("k"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Duplicate { existing, .. } if existing == first));

        // failed (waiting for backoff)
        let lease = take(&f).await.unwrap();
        f.queue.fail(&lease, "transient".into()).await.unwrap();
        assert!(
            f.queue
                .enqueue(&QueueName::content(), JobType::Publish, serde_json::Value::Null, keyed("k"))
                .await
                .is_err()
        );

        // completed releases the key
        f.clock.advance(Duration::from_secs(3600));
        let lease = take(&f).await.unwrap();
        f.queue.ack(&lease).await.unwrap();
        let second = put(&f, keyed("k")).await;
        assert_ne!(first, second);
        assert!(f.events.names().contains(&"job_duplicate_rejected"));
    }

    #[tokio::test]
    async fn delayed_job_waits_for_not_before() {
        let f = fixture().await;
        put(
            &f,
            EnqueueOptions {
                delay: Duration::from_secs(10),
                ..EnqueueOptions::default()
            },
        )
        .await;

        assert!(take(&f).await.is_none());
        f.clock.advance(Duration::from_secs(10));
        assert!(take(&f).await.is_some());
    }

    #[tokio::test]
    async fn fail_backs_off_then_dies() {
        let f = fixture().await;
        let id = put(&f, EnqueueOptions::default()).await;

        let mut not_befores = Vec::new();
        for expected_next in [2, 3] {
            let lease = take(&f).await.unwrap();
            let outcome = f.queue.fail(&lease, "503".into()).await.unwrap();
            let FailOutcome::Retrying {
                attempt,
                not_before,
            } = outcome
            else {
                panic!("expected retry, got {outcome:?}");
            };
            assert_eq!(attempt, expected_next);
            assert_eq!(
                f.queue.get(id).await.unwrap().unwrap().status,
                JobStatus::Failed
            );

            // not dequeuable during backoff
            assert!(take(&f).await.is_none());
            not_befores.push(not_before);
            f.clock.set(not_before);
        }
        assert!(not_befores[1] > not_befores[0]);

        let lease = take(&f).await.unwrap();
        assert_eq!(lease.job.attempt, 3);
        assert_eq!(
            f.queue.fail(&lease, "503".into()).await.unwrap(),
            FailOutcome::Dead
        );
        let job = f.queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Dead);
        assert_eq!(job.last_error.as_deref(), Some("503"));
    }

    #[tokio::test]
    async fn bury_kills_immediately() {
        let f = fixture().await;
        let id = put(&f, keyed("k")).await;
        let lease = take(&f).await.unwrap();

        f.queue.bury(&lease, "rejected".into()).await.unwrap();
        assert_eq!(
            f.queue.get(id).await.unwrap().unwrap().status,
            JobStatus::Dead
        );
        // key is free again
        put(&f, keyed("k")).await;
    }

    #[tokio::test]
    async fn expired_lease_is_recovered_once_per_timeout() {
        let f = fixture().await;
        let id = put(&f, EnqueueOptions::default()).await;
        let stale = take(&f).await.unwrap();

        assert!(f.queue.recover_stalled().await.unwrap().is_empty());

        f.clock.advance(LEASE);
        let recovered = f.queue.recover_stalled().await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert!(matches!(
            recovered[0].outcome,
            FailOutcome::Retrying { attempt: 2, .. }
        ));

        // the new lease is not recovered again until another timeout passes
        let fresh = take(&f).await.unwrap();
        assert_eq!(fresh.job_id(), id);
        assert!(f.queue.recover_stalled().await.unwrap().is_empty());

        // the crashed worker's lease no longer owns the job
        let err = f.queue.ack(&stale).await.unwrap_err();
        assert!(matches!(err, QueueError::LeaseLost { .. }));
        f.queue.ack(&fresh).await.unwrap();
    }

    #[tokio::test]
    async fn stalled_job_without_attempts_left_dies() {
        let f = fixture().await;
        put(
            &f,
            EnqueueOptions {
                max_attempts: 1,
                ..EnqueueOptions::default()
            },
        )
        .await;
        take(&f).await.unwrap();

        f.clock.advance(LEASE);
        let recovered = f.queue.recover_stalled().await.unwrap();
        assert_eq!(recovered[0].outcome, FailOutcome::Dead);
        assert_eq!(recovered[0].job.status, JobStatus::Dead);
        assert!(take(&f).await.is_none());
    }

    #[tokio::test]
    async fn reopen_restores_pending_and_active_jobs() {
        let f = fixture().await;
        let pending = put(&f, keyed("a")).await;
        let active = put(&f, keyed("b")).await;
        let lease = take(&f).await.unwrap();
        assert_eq!(lease.job_id(), pending);
        drop(f.queue);

        // "restart"
        let queue = open_with(&f.store, &f.clock, &f.events).await;
        let next = queue.dequeue(&QueueName::content()).await.unwrap().unwrap();
        assert_eq!(next.job_id(), active);

        // idempotency index survives
        let err = queue
            .enqueue(&QueueName::content(), JobType::Publish, serde_json::Value::Null, keyed("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Duplicate { .. }));

        // the job leased before the restart comes back after its lease expires
        f.clock.advance(LEASE);
        let recovered = queue.recover_stalled().await.unwrap();
        let ids: Vec<_> = recovered.iter().map(|s| s.job.id).collect();
        assert!(ids.contains(&pending));
    }

    #[tokio::test]
    async fn purge_removes_old_finished_jobs() {
        let f = fixture().await;
        let done = put(&f, EnqueueOptions::default()).await;
        let lease = take(&f).await.unwrap();
        f.queue.ack(&lease).await.unwrap();
        let open = put(&f, EnqueueOptions::default()).await;

        f.clock.advance(Duration::from_secs(60));
        let purged = f.queue.purge_finished(f.clock.now()).await.unwrap();
        assert_eq!(purged, 1);
        assert!(f.queue.get(done).await.unwrap().is_none());
        assert!(f.queue.get(open).await.unwrap().is_some());
        assert_eq!(f.store.len(), 1);
    }
}
