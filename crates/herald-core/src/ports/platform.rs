//! PlatformAdapter port - one per social platform.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ContentItem, Platform, PlatformPostId};

/// Adapter-side classification of a publish failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network timeout, 5xx, rate limit. Worth retrying.
    Transient,
    /// Bad credentials, content rejected. Retrying will not help.
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} platform error [{code}]: {message}")]
pub struct PlatformError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
}

impl PlatformError {
    pub const ADAPTER_TIMEOUT: &'static str = "adapter_timeout";
    pub const NO_ADAPTER: &'static str = "no_adapter";

    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Publish `content`. `idempotency_key` is stable across redeliveries of
    /// the same intent so the platform can de-duplicate.
    async fn publish(
        &self,
        content: &ContentItem,
        idempotency_key: &str,
    ) -> Result<PlatformPostId, PlatformError>;
}
