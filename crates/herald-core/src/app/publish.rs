//! PublishHandler - publish ジョブの実行と target 状態遷移
//!
//! # フロー
//! 1. guard: content store を読み直し、まだこの publish が求められているか確認
//! 2. target を `publishing` にする（version 付き書き込み）
//! 3. PlatformAdapter を呼ぶ（adapter_timeout で打ち切り）
//! 4. 結果に応じて `published` / `retrying` / `failed` を書き込む
//!
//! The content store is ground truth. A job whose intent was cancelled,
//! rescheduled or deleted acknowledges as a no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::registry::{HandlerOutcome, JobHandler};
use crate::domain::{
    ContentItem, PipelineEvent, Platform, PlatformPostId, PlatformTarget, PublishPayload,
    TargetError, TargetPatch, TargetStatus,
};
use crate::error::{HandlerError, StoreError};
use crate::ports::clock::after;
use crate::ports::{Clock, ContentStore, EventSink, PlatformAdapter, PlatformError};
use crate::queue::{JobRecord, RetryPolicy};

/// Read-modify-write attempts before giving up on a contended item.
const MAX_STORE_ATTEMPTS: usize = 5;

enum Write {
    Written(ContentItem),
    /// The item or target no longer matches; nothing was written.
    Gone(String),
    Conflicted,
}

pub struct PublishHandler {
    store: Arc<dyn ContentStore>,
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
    retry_policy: RetryPolicy,
    adapter_timeout: Duration,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl PublishHandler {
    pub fn new(
        store: Arc<dyn ContentStore>,
        retry_policy: RetryPolicy,
        adapter_timeout: Duration,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            adapters: HashMap::new(),
            retry_policy,
            adapter_timeout,
            clock,
            events,
        }
    }

    /// One adapter per platform; a later adapter replaces an earlier one.
    pub fn with_adapter(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.adapters.insert(adapter.platform(), adapter);
        self
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.adapters.keys().copied().collect();
        platforms.sort();
        platforms
    }

    /// Guarded read-modify-write of one target.
    async fn write(
        &self,
        payload: &PublishPayload,
        patch: TargetPatch,
        allowed: impl Fn(&PlatformTarget) -> bool,
    ) -> Result<Write, StoreError> {
        let (id, platform) = (payload.content_id, payload.platform);
        for attempt in 1..=MAX_STORE_ATTEMPTS {
            let Some(item) = self.store.get(id).await? else {
                return Ok(Write::Gone("content deleted".to_string()));
            };
            let Some(target) = item.target(platform) else {
                return Ok(Write::Gone("target removed".to_string()));
            };
            if !allowed(target) {
                return Ok(Write::Gone(format!("target is {}", target.status)));
            }

            match self
                .store
                .update_target(id, platform, patch.clone(), Some(item.version))
                .await
            {
                Ok(updated) => return Ok(Write::Written(updated)),
                Err(StoreError::Conflict { .. }) => {
                    debug!(content_id = %id, %platform, attempt, "content write conflict, retrying");
                }
                Err(StoreError::NotFound(_)) => {
                    return Ok(Write::Gone("content deleted".to_string()));
                }
                Err(StoreError::Transition(e)) => return Ok(Write::Gone(e.to_string())),
                Err(e) => return Err(e),
            }
        }
        Ok(Write::Conflicted)
    }

    /// Unconditional terminal write after the item stayed contended.
    async fn force_fail(&self, payload: &PublishPayload, attempt: u32) {
        let error = TargetError::new(
            TargetError::INTERNAL_CONFLICT,
            format!("gave up after {MAX_STORE_ATTEMPTS} conflicting writes"),
        );
        let patch = TargetPatch::Failed {
            retry_count: attempt,
            error,
        };
        match self
            .store
            .update_target(payload.content_id, payload.platform, patch, None)
            .await
        {
            Ok(item) => self.emit_failed(&item, payload, attempt, TargetError::INTERNAL_CONFLICT),
            Err(e) => {
                error!(content_id = %payload.content_id, platform = %payload.platform, error = %e, "could not mark target failed");
            }
        }
    }

    fn skip(&self, payload: &PublishPayload, reason: String) -> HandlerOutcome {
        info!(content_id = %payload.content_id, platform = %payload.platform, %reason, "publish skipped");
        self.events.emit(PipelineEvent::TargetSkipped {
            content_id: payload.content_id,
            platform: payload.platform,
            reason,
        });
        HandlerOutcome::Completed
    }

    fn emit_failed(&self, item: &ContentItem, payload: &PublishPayload, attempt: u32, code: &str) {
        warn!(content_id = %payload.content_id, platform = %payload.platform, attempt, code, "target failed");
        self.events.emit(PipelineEvent::TargetFailed {
            content_id: payload.content_id,
            platform: payload.platform,
            retry_count: attempt,
            error_code: code.to_string(),
            overall_status: item.overall_status,
        });
    }

    async fn call_adapter(
        &self,
        item: &ContentItem,
        platform: Platform,
        key: &str,
    ) -> Result<PlatformPostId, PlatformError> {
        let Some(adapter) = self.adapters.get(&platform) else {
            return Err(PlatformError::permanent(
                PlatformError::NO_ADAPTER,
                format!("no adapter registered for {platform}"),
            ));
        };
        match tokio::time::timeout(self.adapter_timeout, adapter.publish(item, key)).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::transient(
                PlatformError::ADAPTER_TIMEOUT,
                format!("no answer within {:?}", self.adapter_timeout),
            )),
        }
    }

    async fn finish_failure(
        &self,
        job: &JobRecord,
        payload: &PublishPayload,
        err: PlatformError,
    ) -> Result<HandlerOutcome, HandlerError> {
        let reason = format!("{}: {}", err.code, err.message);
        let attempt = job.attempt;

        if err.is_transient() && job.has_attempts_left() {
            let next_attempt_at = after(self.clock.now(), self.retry_policy.next_delay(attempt));
            let patch = TargetPatch::Retrying {
                next_attempt_at,
                retry_count: attempt,
                error: TargetError::new(err.code.clone(), err.message.clone()),
            };
            return match self
                .write(payload, patch, |t| publishing_for(t, payload))
                .await?
            {
                Write::Written(_) => {
                    info!(content_id = %payload.content_id, platform = %payload.platform, attempt, %next_attempt_at, code = %err.code, "publish will be retried");
                    self.events.emit(PipelineEvent::TargetRetrying {
                        content_id: payload.content_id,
                        platform: payload.platform,
                        retry_count: attempt,
                        next_attempt_at,
                        error_code: err.code,
                    });
                    Ok(HandlerOutcome::Retry(reason))
                }
                Write::Gone(why) => Ok(self.skip(payload, why)),
                Write::Conflicted => {
                    self.force_fail(payload, attempt).await;
                    Ok(HandlerOutcome::GiveUp(reason))
                }
            };
        }

        let patch = TargetPatch::Failed {
            retry_count: attempt,
            error: TargetError::new(err.code.clone(), err.message.clone()),
        };
        match self
            .write(payload, patch, |t| {
                t.status.is_in_flight() && t.serves_intent(payload.scheduled_at)
            })
            .await?
        {
            Write::Written(item) => self.emit_failed(&item, payload, attempt, &err.code),
            Write::Gone(why) => {
                warn!(content_id = %payload.content_id, platform = %payload.platform, %why, "terminal failure not recorded");
            }
            Write::Conflicted => self.force_fail(payload, attempt).await,
        }
        Ok(HandlerOutcome::GiveUp(reason))
    }
}

/// Does the target still ask for the publish this job carries?
///
/// Redeliveries (after backoff, or after a worker died mid-publish) find the
/// target `retrying`/`publishing`; they proceed only while the owner's intent
/// is the one the job was enqueued for.
fn still_wanted(target: &PlatformTarget, payload: &PublishPayload) -> bool {
    let wanted = match target.status {
        TargetStatus::Scheduled => target.scheduled_at == Some(payload.scheduled_at),
        TargetStatus::Retrying | TargetStatus::Publishing => true,
        _ => false,
    };
    wanted && target.serves_intent(payload.scheduled_at)
}

/// The target is mid-publish for this job's intent.
fn publishing_for(target: &PlatformTarget, payload: &PublishPayload) -> bool {
    target.status == TargetStatus::Publishing && target.serves_intent(payload.scheduled_at)
}

#[async_trait]
impl JobHandler for PublishHandler {
    async fn handle(&self, job: &JobRecord) -> Result<HandlerOutcome, HandlerError> {
        let payload: PublishPayload = match job.decode_payload() {
            Ok(p) => p,
            Err(e) => return Ok(HandlerOutcome::GiveUp(format!("bad publish payload: {e}"))),
        };
        let key = job
            .idempotency_key
            .clone()
            .unwrap_or_else(|| payload.idempotency_key());

        let item = match self
            .write(&payload, TargetPatch::Publishing, |t| still_wanted(t, &payload))
            .await?
        {
            Write::Written(item) => item,
            Write::Gone(why) => return Ok(self.skip(&payload, why)),
            Write::Conflicted => {
                self.force_fail(&payload, job.attempt).await;
                return Ok(HandlerOutcome::GiveUp("content store contention".to_string()));
            }
        };
        debug!(content_id = %payload.content_id, platform = %payload.platform, attempt = job.attempt, "publishing");
        self.events.emit(PipelineEvent::TargetPublishing {
            content_id: payload.content_id,
            platform: payload.platform,
            attempt: job.attempt,
        });

        let post_id = match self.call_adapter(&item, payload.platform, &key).await {
            Ok(post_id) => post_id,
            Err(err) => return self.finish_failure(job, &payload, err).await,
        };

        let patch = TargetPatch::Published {
            at: self.clock.now(),
            post_id: post_id.clone(),
        };
        match self
            .write(&payload, patch, |t| publishing_for(t, &payload))
            .await?
        {
            Write::Written(item) => {
                info!(content_id = %payload.content_id, platform = %payload.platform, %post_id, overall = ?item.overall_status, "target published");
                self.events.emit(PipelineEvent::TargetPublished {
                    content_id: payload.content_id,
                    platform: payload.platform,
                    platform_post_id: post_id,
                    overall_status: item.overall_status,
                });
                Ok(HandlerOutcome::Completed)
            }
            Write::Gone(why) => {
                warn!(content_id = %payload.content_id, platform = %payload.platform, %post_id, %why, "published but could not record it");
                Ok(HandlerOutcome::Completed)
            }
            Write::Conflicted => {
                self.force_fail(&payload, job.attempt).await;
                Ok(HandlerOutcome::GiveUp("content store contention".to_string()))
            }
        }
    }

    async fn on_dead(&self, job: &JobRecord, reason: &str) {
        let Ok(payload) = job.decode_payload::<PublishPayload>() else {
            return;
        };
        let patch = TargetPatch::Failed {
            retry_count: job.attempt,
            error: TargetError::new(TargetError::JOB_DEAD, reason),
        };
        match self.write(&payload, patch, |t| still_wanted(t, &payload)).await {
            Ok(Write::Written(item)) => {
                self.emit_failed(&item, &payload, job.attempt, TargetError::JOB_DEAD);
            }
            Ok(Write::Gone(why)) => {
                debug!(content_id = %payload.content_id, platform = %payload.platform, %why, "dead job: target already settled");
            }
            Ok(Write::Conflicted) => self.force_fail(&payload, job.attempt).await,
            Err(e) => {
                error!(content_id = %payload.content_id, platform = %payload.platform, error = %e, "dead job: could not mark target failed");
            }
        }
    }
}
