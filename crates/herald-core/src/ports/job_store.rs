//! JobStore port - queue の永続化先
//!
//! `LocalQueue` keeps its index in memory and writes every record through
//! here before returning to the caller.

use async_trait::async_trait;

use crate::domain::JobId;
use crate::error::JobStoreError;
use crate::queue::JobRecord;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<JobRecord>, JobStoreError>;

    /// Insert or overwrite. Must be durable when it returns.
    async fn save(&self, job: &JobRecord) -> Result<(), JobStoreError>;

    /// Removing an unknown id is not an error.
    async fn remove(&self, id: JobId) -> Result<(), JobStoreError>;
}
