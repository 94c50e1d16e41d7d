//! herald - end-to-end demo of the publishing pipeline.
//!
//! One post, two platforms: facebook accepts on the first try, twitter
//! answers 503 twice before accepting. Settings come from `HERALD_*`
//! environment variables; unset keys fall back to short demo timings.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_core::domain::{
    ContentId, ContentItem, OrganizationId, OverallStatus, Platform, TargetStatus, UserId,
};
use herald_core::impls::{InMemoryContentStore, ScriptedAdapter, TracingEventSink};
use herald_core::ports::{Clock, SystemClock};
use herald_core::{PipelineBuilder, PipelineConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const WAIT_LIMIT: Duration = Duration::from_secs(30);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // JSON logs, RUST_LOG で調整
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Short timings so the demo settles in seconds.
fn demo_defaults() -> PipelineConfig {
    PipelineConfig {
        backoff_base_ms: 200,
        backoff_cap_ms: 2_000,
        scan_interval_secs: 1,
        reaper_interval_secs: 1,
        workers: 2,
        lease_timeout_secs: 10,
        handler_timeout_secs: 5,
        adapter_timeout_secs: 2,
        poll_min_ms: 20,
        poll_max_ms: 200,
        ..PipelineConfig::default()
    }
}

fn new_post(now: DateTime<Utc>, max_retries: u32) -> Result<ContentItem, Box<dyn Error>> {
    let mut item = ContentItem::new(
        ContentId::generate(),
        OrganizationId::generate(),
        UserId::generate(),
        serde_json::json!({ "text": "We just shipped v2!" }),
        now,
    );
    for platform in [Platform::Facebook, Platform::Twitter] {
        item.add_target(platform, max_retries, now)?;
        item.schedule_target(platform, now, max_retries, now)?;
    }
    Ok(item)
}

fn settled(item: &ContentItem) -> bool {
    item.overall_status == OverallStatus::Published
        || item.targets.iter().any(|t| t.status == TargetStatus::Failed)
}

async fn wait_until_settled(store: &InMemoryContentStore, id: ContentId) -> Option<ContentItem> {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while tokio::time::Instant::now() < deadline {
        if let Some(item) = store.snapshot(id).filter(settled) {
            return Some(item);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    None
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let config = PipelineConfig::from_env_over(demo_defaults())?;
    info!(?config, "configuration loaded");
    let max_retries = config.max_retries;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(InMemoryContentStore::new(Arc::clone(&clock)));
    let pipeline = PipelineBuilder::new(config)
        .content_store(store.clone())
        .clock(Arc::clone(&clock))
        .events(Arc::new(TracingEventSink))
        .adapter(Arc::new(ScriptedAdapter::new(Platform::Facebook)))
        .adapter(Arc::new(
            ScriptedAdapter::new(Platform::Twitter).then_fail_transient(2),
        ))
        .build()
        .await?;

    let item = new_post(clock.now(), max_retries)?;
    let id = item.id;
    store.insert(item);
    info!(content_id = %id, "post scheduled for facebook and twitter");

    pipeline.start().await?;

    let outcome = tokio::select! {
        item = wait_until_settled(&store, id) => item,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            None
        }
    };

    pipeline.shutdown().await;

    match outcome {
        Some(item) => {
            info!(content_id = %id, overall = ?item.overall_status, "post settled");
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        None => warn!(content_id = %id, "post did not settle"),
    }
    info!(counts = ?pipeline.counts().await?, "final queue counts");
    Ok(())
}
