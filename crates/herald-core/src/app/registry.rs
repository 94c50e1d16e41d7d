//! HandlerRegistry - JobType ごとの handler 登録

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::JobType;
use crate::error::{HandlerError, RegistryError};
use crate::queue::JobRecord;

/// What the handler wants the queue to do with the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// ack
    Completed,
    /// fail: the queue retries with backoff, or kills the job when out of attempts.
    Retry(String),
    /// bury: no further attempts regardless of the attempt budget.
    GiveUp(String),
}

/// A handler for one job type.
///
/// Side effects live here; the worker pool only maps the outcome onto the
/// queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobRecord) -> Result<HandlerOutcome, HandlerError>;

    /// Called after the queue declared the job dead without the handler
    /// deciding so (retries exhausted, timeout, expired lease).
    async fn on_dead(&self, _job: &JobRecord, _reason: &str) {}
}

/// Registry of handlers (job_type -> handler).
///
/// Built during initialization, read-only afterwards.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        job_type: JobType,
        handler: Arc<dyn JobHandler>,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(&job_type) {
            return Err(RegistryError::DuplicateHandler(job_type));
        }
        self.handlers.insert(job_type, handler);
        Ok(())
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    pub fn contains(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }

    /// Job types without a handler.
    pub fn missing(&self) -> Vec<JobType> {
        JobType::ALL
            .into_iter()
            .filter(|t| !self.handlers.contains_key(t))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
