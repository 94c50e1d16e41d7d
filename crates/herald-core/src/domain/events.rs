//! Pipeline events.
//!
//! Emitted through `EventSink` for external logging / metrics. The pipeline
//! never stores them itself.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::content::OverallStatus;
use super::ids::{ContentId, JobId};
use super::job::{JobType, QueueName};
use super::platform::{Platform, PlatformPostId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    JobEnqueued {
        job_id: JobId,
        queue: QueueName,
        job_type: JobType,
        idempotency_key: Option<String>,
        not_before: DateTime<Utc>,
    },
    JobDuplicateRejected {
        queue: QueueName,
        idempotency_key: String,
        existing: JobId,
    },
    JobCompleted {
        job_id: JobId,
        job_type: JobType,
        attempt: u32,
    },
    /// `attempt` is the number of the next attempt.
    JobRetryScheduled {
        job_id: JobId,
        attempt: u32,
        not_before: DateTime<Utc>,
        error: String,
    },
    /// Lease expired without ack/fail; the job is dequeuable again.
    JobRecovered {
        job_id: JobId,
        attempt: u32,
    },
    JobDead {
        job_id: JobId,
        job_type: JobType,
        attempt: u32,
        error: String,
    },
    JobsPurged {
        count: usize,
    },
    TargetPublishing {
        content_id: ContentId,
        platform: Platform,
        attempt: u32,
    },
    TargetPublished {
        content_id: ContentId,
        platform: Platform,
        platform_post_id: PlatformPostId,
        overall_status: OverallStatus,
    },
    TargetRetrying {
        content_id: ContentId,
        platform: Platform,
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
        error_code: String,
    },
    TargetFailed {
        content_id: ContentId,
        platform: Platform,
        retry_count: u32,
        error_code: String,
        overall_status: OverallStatus,
    },
    /// Job ran but the content no longer asks for this publish.
    TargetSkipped {
        content_id: ContentId,
        platform: Platform,
        reason: String,
    },
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::JobEnqueued { .. } => "job_enqueued",
            PipelineEvent::JobDuplicateRejected { .. } => "job_duplicate_rejected",
            PipelineEvent::JobCompleted { .. } => "job_completed",
            PipelineEvent::JobRetryScheduled { .. } => "job_retry_scheduled",
            PipelineEvent::JobRecovered { .. } => "job_recovered",
            PipelineEvent::JobDead { .. } => "job_dead",
            PipelineEvent::JobsPurged { .. } => "jobs_purged",
            PipelineEvent::TargetPublishing { .. } => "target_publishing",
            PipelineEvent::TargetPublished { .. } => "target_published",
            PipelineEvent::TargetRetrying { .. } => "target_retrying",
            PipelineEvent::TargetFailed { .. } => "target_failed",
            PipelineEvent::TargetSkipped { .. } => "target_skipped",
        }
    }
}
