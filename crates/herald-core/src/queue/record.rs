//! Job record: metadata + payload.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::JobStatus;
use crate::domain::{JobId, JobType, LeaseId, QueueName};

/// Current claim on an active job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseInfo {
    pub lease_id: LeaseId,
    pub expires_at: DateTime<Utc>,
}

/// A job as the queue stores it.
///
/// Design:
/// - This is the "single source of truth" for job state; the ready/scheduled
///   structures in the queue hold `JobId` only.
/// - All status transitions happen through the methods here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub queue: QueueName,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub status: JobStatus,

    /// Current (or next) attempt number, starting at 1.
    pub attempt: u32,
    pub max_attempts: u32,

    /// Earliest dispatch time.
    pub not_before: DateTime<Utc>,

    pub idempotency_key: Option<String>,
    pub lease: Option<LeaseInfo>,
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set when the job reaches `Completed` or `Dead`. Retention uses this.
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: JobId,
        queue: QueueName,
        job_type: JobType,
        payload: serde_json::Value,
        max_attempts: u32,
        not_before: DateTime<Utc>,
        idempotency_key: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            queue,
            job_type,
            payload,
            status: JobStatus::Pending,
            attempt: 1,
            max_attempts: max_attempts.max(1),
            not_before,
            idempotency_key,
            lease: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Does `lease_id` still own this job?
    pub fn is_leased_by(&self, lease_id: LeaseId) -> bool {
        self.status == JobStatus::Active
            && self.lease.as_ref().is_some_and(|l| l.lease_id == lease_id)
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Active
            && self.lease.as_ref().is_some_and(|l| l.expires_at <= now)
    }

    /// Pending -> Active.
    pub fn start_attempt(&mut self, lease: LeaseInfo, now: DateTime<Utc>) {
        self.status = JobStatus::Active;
        self.lease = Some(lease);
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.lease = None;
        self.updated_at = now;
        self.finished_at = Some(now);
    }

    pub fn mark_dead(&mut self, error: String, now: DateTime<Utc>) {
        self.status = JobStatus::Dead;
        self.lease = None;
        self.last_error = Some(error);
        self.updated_at = now;
        self.finished_at = Some(now);
    }

    /// Active -> Failed, waiting for `not_before`.
    pub fn schedule_retry(&mut self, not_before: DateTime<Utc>, error: String, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.attempt += 1;
        self.not_before = not_before;
        self.lease = None;
        self.last_error = Some(error);
        self.updated_at = now;
    }

    /// Failed -> Pending once backoff has elapsed.
    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.updated_at = now;
    }

    /// Active -> Pending after the lease expired. Counts as a failed attempt.
    pub fn recover(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.attempt += 1;
        self.not_before = now;
        self.lease = None;
        self.last_error = Some(LEASE_EXPIRED.to_string());
        self.updated_at = now;
    }
}

pub(crate) const LEASE_EXPIRED: &str = "lease expired";
