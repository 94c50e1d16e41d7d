//! InMemoryContentStore - 開発/テスト用の ContentStore
//!
//! Pipeline writes go through `ContentStore::update_target` with an optimistic
//! version check. The owner-side operations (`insert`, `schedule_target`,
//! `cancel_target`, `delete`) stand in for the CRUD layer that owns content in
//! a real deployment.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ContentId, ContentItem, DueTarget, Platform, TargetPatch, TargetStatus};
use crate::error::StoreError;
use crate::ports::{Clock, ContentStore};

pub struct InMemoryContentStore {
    items: RwLock<HashMap<ContentId, ContentItem>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryContentStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Insert or replace an item as-is.
    pub fn insert(&self, item: ContentItem) {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item.id, item);
    }

    pub fn snapshot(&self, id: ContentId) -> Option<ContentItem> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Schedule or reschedule one target.
    pub fn schedule_target(
        &self,
        id: ContentId,
        platform: Platform,
        at: DateTime<Utc>,
        max_retries: u32,
    ) -> Result<ContentItem, StoreError> {
        let now = self.clock.now();
        self.mutate(id, |item| item.schedule_target(platform, at, max_retries, now))
    }

    pub fn cancel_target(&self, id: ContentId, platform: Platform) -> Result<ContentItem, StoreError> {
        let now = self.clock.now();
        self.mutate(id, |item| item.cancel_target(platform, now))
    }

    /// Hard delete. Returns whether the item existed.
    pub fn delete(&self, id: ContentId) -> bool {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    fn mutate<E>(
        &self,
        id: ContentId,
        f: impl FnOnce(&mut ContentItem) -> Result<(), E>,
    ) -> Result<ContentItem, StoreError>
    where
        StoreError: From<E>,
    {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        let current = items.get(&id).ok_or(StoreError::NotFound(id))?;

        // Work on a copy so a rejected transition leaves the stored item untouched.
        let mut next = current.clone();
        f(&mut next)?;
        items.insert(id, next.clone());
        Ok(next)
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn find_due_targets(&self, now: DateTime<Utc>) -> Result<Vec<DueTarget>, StoreError> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        let mut due: Vec<DueTarget> = items
            .values()
            .flat_map(|item| {
                item.targets.iter().filter_map(move |t| match t.scheduled_at {
                    Some(at) if t.status == TargetStatus::Scheduled && at <= now => {
                        Some(DueTarget {
                            content_id: item.id,
                            platform: t.platform,
                            scheduled_at: at,
                            max_retries: t.max_retries,
                        })
                    }
                    _ => None,
                })
            })
            .collect();
        due.sort_by_key(|d| (d.scheduled_at, d.content_id, d.platform));
        Ok(due)
    }

    async fn get(&self, id: ContentId) -> Result<Option<ContentItem>, StoreError> {
        Ok(self.snapshot(id))
    }

    async fn update_target(
        &self,
        id: ContentId,
        platform: Platform,
        patch: TargetPatch,
        expected_version: Option<u64>,
    ) -> Result<ContentItem, StoreError> {
        let now = self.clock.now();
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        let current = items.get(&id).ok_or(StoreError::NotFound(id))?;

        if let Some(expected) = expected_version
            && expected != current.version
        {
            return Err(StoreError::Conflict {
                content_id: id,
                expected,
                actual: current.version,
            });
        }

        let mut next = current.clone();
        next.apply_target_patch(platform, patch, now)?;
        items.insert(id, next.clone());
        Ok(next)
    }
}
