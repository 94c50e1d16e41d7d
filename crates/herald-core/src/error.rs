use std::path::PathBuf;

use thiserror::Error;

use crate::domain::{ContentId, JobId, JobType, LeaseId, TransitionError};

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("job store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt job record at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode job {job_id}: {source}")]
    Encode {
        job_id: JobId,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("duplicate idempotency key {key}: job {existing} is still outstanding")]
    Duplicate { key: String, existing: JobId },

    #[error("job not found: {0}")]
    UnknownJob(JobId),

    #[error("job payload encode failed: {0}")]
    Payload(#[from] serde_json::Error),

    /// The lease expired and was recovered, or the job was already settled.
    #[error("lease {lease_id} no longer owns job {job_id}")]
    LeaseLost { job_id: JobId, lease_id: LeaseId },

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("content not found: {0}")]
    NotFound(ContentId),

    #[error("version conflict on {content_id}: expected {expected}, found {actual}")]
    Conflict {
        content_id: ContentId,
        expected: u64,
        actual: u64,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("content store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("payload decode failed: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate handler for job_type={0}")]
    DuplicateHandler(JobType),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression {expr:?}: {source}")]
    InvalidCron {
        expr: String,
        #[source]
        source: cron::error::Error,
    },

    #[error("no trigger named {0:?}")]
    UnknownTrigger(String),

    #[error("trigger {0:?} has a zero interval")]
    InvalidInterval(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration could not be loaded: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("missing handlers for job types: {0:?}")]
    MissingHandlers(Vec<JobType>),

    #[error("no content store configured")]
    MissingContentStore,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Error)]
pub enum HeraldError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),
}
