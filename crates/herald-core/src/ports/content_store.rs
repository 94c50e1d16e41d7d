//! ContentStore port - content items の正本
//!
//! The store is the single source of truth for publish intent. Every pipeline
//! write goes through `update_target`, which serializes mutations per item via
//! the item's `version`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ContentId, ContentItem, DueTarget, Platform, TargetPatch};
use crate::error::StoreError;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Targets with status `scheduled` and `scheduled_at <= now`.
    async fn find_due_targets(&self, now: DateTime<Utc>) -> Result<Vec<DueTarget>, StoreError>;

    async fn get(&self, id: ContentId) -> Result<Option<ContentItem>, StoreError>;

    /// Apply `patch` to one target.
    ///
    /// With `expected_version = Some(v)` the write fails with
    /// `StoreError::Conflict` unless the item is still at `v`. `None` writes
    /// unconditionally (the transition itself is still validated).
    async fn update_target(
        &self,
        id: ContentId,
        platform: Platform,
        patch: TargetPatch,
        expected_version: Option<u64>,
    ) -> Result<ContentItem, StoreError>;
}
