//! Job types and payloads carried by the queue.
//!
//! The queue itself treats payloads as opaque JSON; the types here are what the
//! scheduler puts in and what handlers decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::ContentId;
use super::platform::Platform;

/// Closed set of job types. Each one must have a registered handler before the
/// pipeline starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Publish,
}

impl JobType {
    pub const ALL: [JobType; 1] = [JobType::Publish];

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Publish => "publish",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of a logical queue inside the job queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueName(String);

impl QueueName {
    pub const CONTENT: &'static str = "content";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The queue publish jobs go to.
    pub fn content() -> Self {
        Self::new(Self::CONTENT)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payload of a `publish` job: one `(content, platform)` pair at the
/// `scheduled_at` the scan observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishPayload {
    pub content_id: ContentId,
    pub platform: Platform,
    pub scheduled_at: DateTime<Utc>,
}

impl PublishPayload {
    /// `publish:{content}:{platform}:{scheduled_at_ms}`
    ///
    /// A reschedule changes `scheduled_at` and therefore the key, so a new
    /// intent is never blocked by a stale job for the old one.
    pub fn idempotency_key(&self) -> String {
        format!(
            "publish:{}:{}:{}",
            self.content_id.as_ulid(),
            self.platform,
            self.scheduled_at.timestamp_millis()
        )
    }
}
