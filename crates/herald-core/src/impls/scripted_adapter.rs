//! ScriptedAdapter - 台本どおりに成功/失敗する PlatformAdapter
//!
//! Used by the CLI demo and tests in place of a real platform API. Each call
//! pops the next scripted failure; once the script runs out every call
//! succeeds.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{ContentItem, Platform, PlatformPostId};
use crate::ports::{PlatformAdapter, PlatformError};

pub struct ScriptedAdapter {
    platform: Platform,
    latency: Duration,
    script: Mutex<VecDeque<PlatformError>>,
    keys: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            latency: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            keys: Mutex::new(Vec::new()),
        }
    }

    /// Next call fails with `error`.
    pub fn then_fail(self, error: PlatformError) -> Self {
        self.push(error);
        self
    }

    /// Next `n` calls fail with a transient 503.
    pub fn then_fail_transient(self, n: usize) -> Self {
        for i in 0..n {
            self.push(PlatformError::transient(
                "http_503",
                format!("service unavailable ({})", i + 1),
            ));
        }
        self
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn push(&self, error: PlatformError) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    pub fn calls(&self) -> usize {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Idempotency keys seen, in call order.
    pub fn keys(&self) -> Vec<String> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PlatformAdapter for ScriptedAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn publish(
        &self,
        content: &ContentItem,
        idempotency_key: &str,
    ) -> Result<PlatformPostId, PlatformError> {
        let call = {
            let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
            keys.push(idempotency_key.to_string());
            keys.len()
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        debug!(platform = %self.platform, content_id = %content.id, call, "scripted publish");
        match next {
            Some(e) => Err(e),
            None => Ok(PlatformPostId::new(format!(
                "{}-{}-{call}",
                self.platform,
                content.id.as_ulid()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContentId, OrganizationId, UserId};
    use chrono::Utc;

    #[tokio::test]
    async fn follows_script_then_succeeds() {
        let adapter = ScriptedAdapter::new(Platform::Twitter)
            .then_fail_transient(1)
            .then_fail(PlatformError::permanent("auth", "token revoked"));
        let item = ContentItem::new(
            ContentId::generate(),
            OrganizationId::generate(),
            UserId::generate(),
            serde_json::Value::Null,
            Utc::now(),
        );

        assert!(adapter.publish(&item, "k").await.unwrap_err().is_transient());
        assert!(!adapter.publish(&item, "k").await.unwrap_err().is_transient());
        let post = adapter.publish(&item, "k").await.unwrap();
        assert!(post.as_str().starts_with("twitter-"));
        assert_eq!(adapter.calls(), 3);
        assert_eq!(adapter.keys(), vec!["k", "k", "k"]);
    }
}
