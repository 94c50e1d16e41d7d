//! End-to-end pipeline scenarios: due scan -> queue -> workers -> publish
//! handler -> content store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use herald_core::domain::{
    ContentId, ContentItem, OrganizationId, OverallStatus, PipelineEvent, Platform,
    PlatformTarget, QueueName, TargetPatch, TargetStatus, UserId,
};
use herald_core::impls::{FileJobStore, InMemoryContentStore, RecordingEventSink, ScriptedAdapter};
use herald_core::ports::{Clock, ContentStore, FixedClock, PlatformError, SystemClock};
use herald_core::queue::{JobStatus, Queue};
use herald_core::{Pipeline, PipelineBuilder, PipelineConfig};

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        backoff_base_ms: 10,
        backoff_cap_ms: 100,
        workers: 2,
        lease_timeout_secs: 5,
        handler_timeout_secs: 2,
        adapter_timeout_secs: 1,
        poll_min_ms: 5,
        poll_max_ms: 20,
        ..PipelineConfig::default()
    }
}

fn post(clock: &dyn Clock, platforms: &[Platform], max_retries: u32) -> ContentItem {
    let now = clock.now();
    let mut item = ContentItem::new(
        ContentId::generate(),
        OrganizationId::generate(),
        UserId::generate(),
        serde_json::json!({ "text": "hello" }),
        now,
    );
    for p in platforms {
        item.add_target(*p, max_retries, now).unwrap();
        item.schedule_target(*p, now, max_retries, now).unwrap();
    }
    item
}

async fn wait_for(
    store: &InMemoryContentStore,
    id: ContentId,
    done: impl Fn(&ContentItem) -> bool,
) -> ContentItem {
    for _ in 0..1000 {
        if let Some(item) = store.snapshot(id).filter(|i| done(i)) {
            return item;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("content {id} never settled: {:?}", store.snapshot(id));
}

fn target(item: &ContentItem, platform: Platform) -> &PlatformTarget {
    item.target(platform).unwrap()
}

async fn build(
    store: &Arc<InMemoryContentStore>,
    events: &Arc<RecordingEventSink>,
    adapters: Vec<Arc<ScriptedAdapter>>,
) -> Pipeline {
    let mut builder = PipelineBuilder::new(fast_config())
        .content_store(store.clone())
        .events(events.clone());
    for a in adapters {
        builder = builder.adapter(a);
    }
    builder.build().await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_platform_succeeds_other_recovers_after_transient_failures() {
    let store = Arc::new(InMemoryContentStore::new(Arc::new(SystemClock)));
    let events = Arc::new(RecordingEventSink::new());
    let facebook = Arc::new(ScriptedAdapter::new(Platform::Facebook));
    let twitter = Arc::new(ScriptedAdapter::new(Platform::Twitter).then_fail_transient(2));
    let pipeline = build(&store, &events, vec![facebook.clone(), twitter.clone()]).await;

    let item = post(&SystemClock, &[Platform::Facebook, Platform::Twitter], 3);
    let id = item.id;
    store.insert(item);
    assert_eq!(
        store.snapshot(id).unwrap().overall_status,
        OverallStatus::Scheduled
    );

    pipeline.start().await.unwrap();
    assert_eq!(pipeline.scan_now().await.unwrap().enqueued, 2);

    let item = wait_for(&store, id, |i| i.overall_status == OverallStatus::Published).await;
    pipeline.shutdown().await;

    assert_eq!(target(&item, Platform::Facebook).retry_count, 0);
    let tw = target(&item, Platform::Twitter);
    assert_eq!(tw.status, TargetStatus::Published);
    assert_eq!(tw.retry_count, 2);
    assert!(tw.platform_post_id.is_some());

    assert_eq!(facebook.calls(), 1);
    assert_eq!(twitter.calls(), 3);
    // every redelivery carries the same key
    let keys = twitter.keys();
    assert!(keys.iter().all(|k| k == &keys[0]));

    assert_eq!(events.count("target_retrying"), 2);
    // scheduled -> partially_published -> published
    let overall: Vec<(Platform, OverallStatus)> = events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::TargetPublished {
                platform,
                overall_status,
                ..
            } => Some((platform, overall_status)),
            _ => None,
        })
        .collect();
    assert_eq!(
        overall,
        vec![
            (Platform::Facebook, OverallStatus::PartiallyPublished),
            (Platform::Twitter, OverallStatus::Published),
        ]
    );
    let counts = pipeline.counts().await.unwrap();
    assert_eq!(counts.completed, 2);
    assert_eq!(counts.outstanding(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exhausted_retries_fail_the_target_and_kill_the_job() {
    let store = Arc::new(InMemoryContentStore::new(Arc::new(SystemClock)));
    let events = Arc::new(RecordingEventSink::new());
    let facebook = Arc::new(ScriptedAdapter::new(Platform::Facebook));
    let twitter = Arc::new(ScriptedAdapter::new(Platform::Twitter).then_fail_transient(10));
    let pipeline = build(&store, &events, vec![facebook.clone(), twitter.clone()]).await;

    let item = post(&SystemClock, &[Platform::Facebook, Platform::Twitter], 3);
    let id = item.id;
    store.insert(item);

    pipeline.start().await.unwrap();
    pipeline.scan_now().await.unwrap();
    let item = wait_for(&store, id, |i| {
        i.target(Platform::Twitter)
            .is_some_and(|t| t.status == TargetStatus::Failed)
            && i.target(Platform::Facebook)
                .is_some_and(|t| t.status == TargetStatus::Published)
    })
    .await;
    pipeline.shutdown().await;

    assert_eq!(twitter.calls(), 3);
    let tw = target(&item, Platform::Twitter);
    assert_eq!(tw.retry_count, 3);
    assert_eq!(tw.error.as_ref().unwrap().code, "http_503");
    assert_eq!(item.overall_status, OverallStatus::PartiallyPublished);

    let counts = pipeline.counts().await.unwrap();
    assert_eq!(counts.dead, 1);
    assert_eq!(counts.completed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn permanent_error_fails_after_one_call() {
    let store = Arc::new(InMemoryContentStore::new(Arc::new(SystemClock)));
    let events = Arc::new(RecordingEventSink::new());
    let linkedin = Arc::new(
        ScriptedAdapter::new(Platform::Linkedin)
            .then_fail(PlatformError::permanent("content_rejected", "policy violation")),
    );
    let pipeline = build(&store, &events, vec![linkedin.clone()]).await;

    let item = post(&SystemClock, &[Platform::Linkedin], 3);
    let id = item.id;
    store.insert(item);

    pipeline.start().await.unwrap();
    pipeline.scan_now().await.unwrap();
    let item = wait_for(&store, id, |i| i.overall_status == OverallStatus::Failed).await;
    pipeline.shutdown().await;

    assert_eq!(linkedin.calls(), 1);
    assert_eq!(target(&item, Platform::Linkedin).retry_count, 1);
    assert_eq!(pipeline.counts().await.unwrap().dead, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rescheduled_target_makes_the_queued_job_a_no_op() {
    let store = Arc::new(InMemoryContentStore::new(Arc::new(SystemClock)));
    let events = Arc::new(RecordingEventSink::new());
    let instagram = Arc::new(ScriptedAdapter::new(Platform::Instagram));
    let pipeline = build(&store, &events, vec![instagram.clone()]).await;

    let item = post(&SystemClock, &[Platform::Instagram], 3);
    let id = item.id;
    store.insert(item);
    assert_eq!(pipeline.scan_now().await.unwrap().enqueued, 1);

    // owner moves the post an hour out before any worker runs
    let later = Utc::now() + chrono::Duration::hours(1);
    store
        .schedule_target(id, Platform::Instagram, later, 3)
        .unwrap();

    pipeline.start().await.unwrap();
    for _ in 0..500 {
        if pipeline.counts().await.unwrap().completed == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    pipeline.shutdown().await;

    assert_eq!(pipeline.counts().await.unwrap().completed, 1);
    assert_eq!(instagram.calls(), 0);
    assert_eq!(events.count("target_skipped"), 1);
    let item = store.snapshot(id).unwrap();
    let t = target(&item, Platform::Instagram);
    assert_eq!(t.status, TargetStatus::Scheduled);
    assert_eq!(t.scheduled_at, Some(later));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queued_jobs_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryContentStore::new(Arc::new(SystemClock)));
    let tiktok = Arc::new(ScriptedAdapter::new(Platform::Tiktok));

    let item = post(&SystemClock, &[Platform::Tiktok], 3);
    let id = item.id;
    store.insert(item);

    {
        let job_store = Arc::new(FileJobStore::open(dir.path()).await.unwrap());
        let first = PipelineBuilder::new(fast_config())
            .content_store(store.clone())
            .adapter(tiktok.clone())
            .job_store(job_store)
            .build()
            .await
            .unwrap();
        assert_eq!(first.scan_now().await.unwrap().enqueued, 1);
        // process exits before any worker ran
    }

    let job_store = Arc::new(FileJobStore::open(dir.path()).await.unwrap());
    let second = PipelineBuilder::new(fast_config())
        .content_store(store.clone())
        .adapter(tiktok.clone())
        .job_store(job_store)
        .build()
        .await
        .unwrap();
    // the persisted job still holds its idempotency key
    assert_eq!(second.scan_now().await.unwrap().duplicates, 1);

    second.start().await.unwrap();
    let item = wait_for(&store, id, |i| i.overall_status == OverallStatus::Published).await;
    second.shutdown().await;

    assert_eq!(tiktok.calls(), 1);
    assert!(target(&item, Platform::Tiktok).platform_post_id.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_of_a_crashed_worker_is_recovered_and_published() {
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
    ));
    let store = Arc::new(InMemoryContentStore::new(clock.clone()));
    let facebook = Arc::new(ScriptedAdapter::new(Platform::Facebook));
    let pipeline = PipelineBuilder::new(fast_config())
        .content_store(store.clone())
        .clock(clock.clone())
        .adapter(facebook.clone())
        .build()
        .await
        .unwrap();

    let item = post(clock.as_ref(), &[Platform::Facebook], 3);
    let id = item.id;
    store.insert(item);
    pipeline.scan_now().await.unwrap();

    // a worker leased the job, marked the target and died
    let queue = pipeline.queue();
    let lease = queue
        .dequeue(&QueueName::content())
        .await
        .unwrap()
        .unwrap();
    store
        .update_target(id, Platform::Facebook, TargetPatch::Publishing, None)
        .await
        .unwrap();

    clock.advance(Duration::from_secs(6));
    assert_eq!(pipeline.reap_now().await.unwrap(), 1);
    let job = queue.get(lease.job_id()).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempt, 2);

    pipeline.start().await.unwrap();
    let item = wait_for(&store, id, |i| i.overall_status == OverallStatus::Published).await;
    pipeline.shutdown().await;

    assert_eq!(facebook.calls(), 1);
    assert_eq!(target(&item, Platform::Facebook).status, TargetStatus::Published);
    // the dead worker's lease can no longer settle the job
    assert!(queue.ack(&lease).await.is_err());
}
