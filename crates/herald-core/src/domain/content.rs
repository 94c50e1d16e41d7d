//! Content items and their per-platform publish targets.
//!
//! A `ContentItem` owns an ordered list of `PlatformTarget`s. Each target moves
//! through its own state machine and fails independently; the item's
//! `overall_status` is always derived from the targets, never set directly.
//!
//! Target state transitions:
//! - draft -> scheduled (owner schedules)
//! - scheduled -> publishing -> published
//! - scheduled -> publishing -> retrying -> publishing (loop until max_retries)
//! - scheduled | publishing | retrying -> failed
//! - draft | scheduled | retrying -> cancelled (owner cancels)
//!
//! Every mutation bumps `version`, which the content store uses for
//! optimistic concurrency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{ContentId, OrganizationId, UserId};
use super::platform::{Platform, PlatformPostId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Draft,
    Scheduled,
    Publishing,
    Retrying,
    Published,
    Failed,
    Cancelled,
}

impl TargetStatus {
    /// Pipeline-terminal: no job will move this target again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TargetStatus::Published | TargetStatus::Failed)
    }

    /// The pipeline currently owns this target (a job exists or is due).
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            TargetStatus::Scheduled | TargetStatus::Publishing | TargetStatus::Retrying
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetStatus::Draft => "draft",
            TargetStatus::Scheduled => "scheduled",
            TargetStatus::Publishing => "publishing",
            TargetStatus::Retrying => "retrying",
            TargetStatus::Published => "published",
            TargetStatus::Failed => "failed",
            TargetStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived status of the whole item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Draft,
    Scheduled,
    PartiallyPublished,
    Published,
    Failed,
}

impl OverallStatus {
    /// Derive from target statuses.
    ///
    /// - `Published` iff every target is published
    /// - `Failed` iff every target is failed
    /// - `PartiallyPublished` if some (not all) targets are published
    /// - `Scheduled` if any target is still owned by the pipeline
    /// - `Draft` otherwise (no targets, or only draft/cancelled/failed mixes)
    pub fn derive<'a>(statuses: impl IntoIterator<Item = &'a TargetStatus>) -> Self {
        let mut total = 0usize;
        let mut published = 0usize;
        let mut failed = 0usize;
        let mut in_flight = 0usize;
        for status in statuses {
            total += 1;
            match status {
                TargetStatus::Published => published += 1,
                TargetStatus::Failed => failed += 1,
                s if s.is_in_flight() => in_flight += 1,
                _ => {}
            }
        }

        if total == 0 {
            OverallStatus::Draft
        } else if published == total {
            OverallStatus::Published
        } else if failed == total {
            OverallStatus::Failed
        } else if published > 0 {
            OverallStatus::PartiallyPublished
        } else if in_flight > 0 {
            OverallStatus::Scheduled
        } else {
            OverallStatus::Draft
        }
    }
}

/// Error recorded on a target. `code` is stable and machine-readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetError {
    pub code: String,
    pub message: String,
}

impl TargetError {
    pub const INTERNAL_CONFLICT: &'static str = "internal_conflict";
    pub const JOB_DEAD: &'static str = "job_dead";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// One platform-specific publish intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformTarget {
    pub platform: Platform,
    pub status: TargetStatus,
    /// Next time the target is due. A retry moves it forward.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Time the owner asked for. Only `schedule_target` sets it; jobs carry it
    /// to prove which intent they serve.
    #[serde(default)]
    pub intent_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub platform_post_id: Option<PlatformPostId>,
    pub error: Option<TargetError>,
    /// Mirrors the queue attempt number of the last failed attempt.
    pub retry_count: u32,
    pub max_retries: u32,
}

impl PlatformTarget {
    /// Was this target scheduled for `at` by its owner (retries included)?
    pub fn serves_intent(&self, at: DateTime<Utc>) -> bool {
        self.intent_at == Some(at)
    }

    pub fn draft(platform: Platform, max_retries: u32) -> Self {
        Self {
            platform,
            status: TargetStatus::Draft,
            scheduled_at: None,
            intent_at: None,
            published_at: None,
            platform_post_id: None,
            error: None,
            retry_count: 0,
            max_retries,
        }
    }
}

/// Pipeline-owned mutation of a single target.
///
/// The pipeline only ever touches status, timestamps, post id, error and
/// retry count; everything else belongs to the owner of the content.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetPatch {
    Publishing,
    Published {
        at: DateTime<Utc>,
        post_id: PlatformPostId,
    },
    Retrying {
        next_attempt_at: DateTime<Utc>,
        retry_count: u32,
        error: TargetError,
    },
    Failed {
        retry_count: u32,
        error: TargetError,
    },
}

impl TargetPatch {
    pub fn target_status(&self) -> TargetStatus {
        match self {
            TargetPatch::Publishing => TargetStatus::Publishing,
            TargetPatch::Published { .. } => TargetStatus::Published,
            TargetPatch::Retrying { .. } => TargetStatus::Retrying,
            TargetPatch::Failed { .. } => TargetStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("content has no target for platform={0}")]
    UnknownTarget(Platform),

    #[error("target for platform={0} already exists")]
    DuplicateTarget(Platform),

    #[error("invalid transition for platform={platform}: {from} -> {to}")]
    Invalid {
        platform: Platform,
        from: TargetStatus,
        to: TargetStatus,
    },
}

/// Durable record of a post and its per-platform publish state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ContentId,
    pub organization_id: OrganizationId,
    pub author_id: UserId,

    /// Opaque payload (text, media references). Not interpreted here.
    pub body: serde_json::Value,

    pub targets: Vec<PlatformTarget>,
    pub overall_status: OverallStatus,

    /// Optimistic concurrency token, bumped on every mutation.
    pub version: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn new(
        id: ContentId,
        organization_id: OrganizationId,
        author_id: UserId,
        body: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            organization_id,
            author_id,
            body,
            targets: Vec::new(),
            overall_status: OverallStatus::Draft,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn target(&self, platform: Platform) -> Option<&PlatformTarget> {
        self.targets.iter().find(|t| t.platform == platform)
    }

    fn target_mut(&mut self, platform: Platform) -> Result<&mut PlatformTarget, TransitionError> {
        self.targets
            .iter_mut()
            .find(|t| t.platform == platform)
            .ok_or(TransitionError::UnknownTarget(platform))
    }

    /// Add a draft target. Targets keep insertion order.
    pub fn add_target(
        &mut self,
        platform: Platform,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.target(platform).is_some() {
            return Err(TransitionError::DuplicateTarget(platform));
        }
        self.targets.push(PlatformTarget::draft(platform, max_retries));
        self.touch(now);
        Ok(())
    }

    /// Owner operation: schedule (or reschedule) a target.
    ///
    /// Resets retry bookkeeping. Not allowed while a publish is in progress or
    /// once the target is published.
    pub fn schedule_target(
        &mut self,
        platform: Platform,
        at: DateTime<Utc>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let target = self.target_mut(platform)?;
        if matches!(
            target.status,
            TargetStatus::Publishing | TargetStatus::Published
        ) {
            return Err(TransitionError::Invalid {
                platform,
                from: target.status,
                to: TargetStatus::Scheduled,
            });
        }
        target.status = TargetStatus::Scheduled;
        target.scheduled_at = Some(at);
        target.intent_at = Some(at);
        target.max_retries = max_retries;
        target.retry_count = 0;
        target.error = None;
        self.touch(now);
        Ok(())
    }

    /// Owner operation: withdraw a target that has not started publishing.
    pub fn cancel_target(
        &mut self,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let target = self.target_mut(platform)?;
        if !matches!(
            target.status,
            TargetStatus::Draft | TargetStatus::Scheduled | TargetStatus::Retrying
        ) {
            return Err(TransitionError::Invalid {
                platform,
                from: target.status,
                to: TargetStatus::Cancelled,
            });
        }
        target.status = TargetStatus::Cancelled;
        self.touch(now);
        Ok(())
    }

    /// Apply a pipeline transition to one target and recompute the overall
    /// status.
    pub fn apply_target_patch(
        &mut self,
        platform: Platform,
        patch: TargetPatch,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let target = self.target_mut(platform)?;
        let from = target.status;
        let to = patch.target_status();

        let allowed = match to {
            TargetStatus::Publishing => matches!(
                from,
                TargetStatus::Scheduled | TargetStatus::Retrying | TargetStatus::Publishing
            ),
            TargetStatus::Published | TargetStatus::Retrying => from == TargetStatus::Publishing,
            TargetStatus::Failed => from.is_in_flight(),
            _ => false,
        };
        if !allowed {
            return Err(TransitionError::Invalid { platform, from, to });
        }

        match patch {
            TargetPatch::Publishing => {
                target.status = TargetStatus::Publishing;
            }
            TargetPatch::Published { at, post_id } => {
                target.status = TargetStatus::Published;
                target.published_at = Some(at);
                target.platform_post_id = Some(post_id);
                target.error = None;
            }
            TargetPatch::Retrying {
                next_attempt_at,
                retry_count,
                error,
            } => {
                target.status = TargetStatus::Retrying;
                target.scheduled_at = Some(next_attempt_at);
                target.retry_count = retry_count;
                target.error = Some(error);
            }
            TargetPatch::Failed { retry_count, error } => {
                target.status = TargetStatus::Failed;
                target.retry_count = retry_count;
                target.error = Some(error);
            }
        }
        self.touch(now);
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.overall_status = OverallStatus::derive(self.targets.iter().map(|t| &t.status));
        self.version += 1;
        self.updated_at = now;
    }
}

/// A `(content, platform)` pair whose scheduled time has arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueTarget {
    pub content_id: ContentId,
    pub platform: Platform,
    pub scheduled_at: DateTime<Utc>,
    pub max_retries: u32,
}
