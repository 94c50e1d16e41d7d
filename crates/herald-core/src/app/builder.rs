//! PipelineBuilder - パイプラインの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - build() 時に config を検証
//! - 全 JobType に handler が登録されているかチェック
//! - 不足があれば BuildError を返す

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info};

use super::due_scan::{DueScan, ScanReport};
use super::publish::PublishHandler;
use super::reaper::Reaper;
use super::registry::{HandlerRegistry, JobHandler};
use super::scheduler::Scheduler;
use super::worker_pool::{WorkerPool, WorkerPoolConfig};
use crate::config::PipelineConfig;
use crate::domain::{JobType, QueueName};
use crate::error::{BuildError, QueueError, SchedulerError, StoreError};
use crate::impls::{FileJobStore, MemoryJobStore, NoopEventSink};
use crate::observability::QueueCounts;
use crate::ports::{
    Clock, ContentStore, EventSink, JobStore, PlatformAdapter, SystemClock, UlidGenerator,
};
use crate::queue::{LocalQueue, LocalQueueOptions, Queue};

/// Built-in trigger names.
pub const DUE_CONTENT_SCAN: &str = "due_content_scan";
pub const LEASE_REAPER: &str = "lease_reaper";
pub const JOB_RETENTION: &str = "job_retention";

/// PipelineBuilder
///
/// # 使用例
/// ```ignore
/// let pipeline = PipelineBuilder::new(PipelineConfig::from_env()?)
///     .content_store(store)
///     .adapter(Arc::new(TwitterAdapter::new(...)))
///     .build()
///     .await?;
/// pipeline.start().await?;
/// ```
///
/// Without an explicit `publish` handler, one is built from the content
/// store and the registered adapters. No adapters and no handler is a
/// `MissingHandlers` error.
pub struct PipelineBuilder {
    config: PipelineConfig,
    content_store: Option<Arc<dyn ContentStore>>,
    adapters: Vec<Arc<dyn PlatformAdapter>>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    job_store: Option<Arc<dyn JobStore>>,
    registry: HandlerRegistry,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            content_store: None,
            adapters: Vec::new(),
            events: Arc::new(NoopEventSink),
            clock: Arc::new(SystemClock),
            job_store: None,
            registry: HandlerRegistry::new(),
        }
    }

    pub fn content_store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.content_store = Some(store);
        self
    }

    pub fn adapter(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Overrides `queue_dir`.
    pub fn job_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.job_store = Some(store);
        self
    }

    /// Custom handler for `job_type`. Registering the same type twice is an error.
    pub fn register(
        mut self,
        job_type: JobType,
        handler: Arc<dyn JobHandler>,
    ) -> Result<Self, BuildError> {
        self.registry.register(job_type, handler)?;
        Ok(self)
    }

    pub async fn build(self) -> Result<Pipeline, BuildError> {
        let config = self.config;
        config.validate()?;
        let store = self.content_store.ok_or(BuildError::MissingContentStore)?;

        let job_store: Arc<dyn JobStore> = match (self.job_store, &config.queue_dir) {
            (Some(js), _) => js,
            (None, Some(dir)) => Arc::new(
                FileJobStore::open(dir.clone())
                    .await
                    .map_err(QueueError::from)?,
            ),
            (None, None) => Arc::new(MemoryJobStore::new()),
        };
        let options = LocalQueueOptions::new(config.retry_policy(), config.lease_timeout())
            .with_clock(Arc::clone(&self.clock))
            .with_events(Arc::clone(&self.events))
            .with_ids(Arc::new(UlidGenerator::new(Arc::clone(&self.clock))));
        let queue: Arc<dyn Queue> = Arc::new(LocalQueue::open(job_store, options).await?);

        let mut registry = self.registry;
        if !registry.contains(JobType::Publish) && !self.adapters.is_empty() {
            let handler = self.adapters.into_iter().fold(
                PublishHandler::new(
                    Arc::clone(&store),
                    config.retry_policy(),
                    config.adapter_timeout(),
                    Arc::clone(&self.clock),
                    Arc::clone(&self.events),
                ),
                PublishHandler::with_adapter,
            );
            info!(platforms = ?handler.platforms(), "publish handler ready");
            registry.register(JobType::Publish, Arc::new(handler))?;
        }
        let missing = registry.missing();
        if !missing.is_empty() {
            return Err(BuildError::MissingHandlers(missing));
        }
        let registry = Arc::new(registry);

        Ok(Pipeline {
            scan: Arc::new(DueScan::new(
                store,
                Arc::clone(&queue),
                Arc::clone(&self.clock),
            )),
            reaper: Arc::new(Reaper::new(Arc::clone(&queue), Arc::clone(&registry))),
            scheduler: Scheduler::new(Arc::clone(&self.clock)),
            workers: Mutex::new(None),
            clock: self.clock,
            config,
            queue,
            registry,
        })
    }
}

/// Wired pipeline: queue, workers, scheduler and the built-in triggers.
pub struct Pipeline {
    config: PipelineConfig,
    queue: Arc<dyn Queue>,
    registry: Arc<HandlerRegistry>,
    scheduler: Scheduler,
    scan: Arc<DueScan>,
    reaper: Arc<Reaper>,
    clock: Arc<dyn Clock>,
    workers: Mutex<Option<WorkerPool>>,
}

impl Pipeline {
    /// Register the built-in triggers, spawn the workers and start the
    /// scheduler. Calling it again re-registers the triggers and is otherwise
    /// a no-op.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let scan = Arc::clone(&self.scan);
        self.scheduler
            .schedule_interval(DUE_CONTENT_SCAN, self.config.scan_interval(), move || {
                let scan = Arc::clone(&scan);
                async move {
                    if let Err(e) = scan.run_once().await {
                        error!(error = %e, "due scan failed");
                    }
                }
            })?;

        let reaper = Arc::clone(&self.reaper);
        self.scheduler
            .schedule_interval(LEASE_REAPER, self.config.reaper_interval(), move || {
                let reaper = Arc::clone(&reaper);
                async move {
                    if let Err(e) = reaper.run_once().await {
                        error!(error = %e, "reaper sweep failed");
                    }
                }
            })?;

        let queue = Arc::clone(&self.queue);
        let clock = Arc::clone(&self.clock);
        let retention = self.config.retention();
        self.scheduler.schedule_interval(
            JOB_RETENTION,
            self.config.housekeeping_interval(),
            move || {
                let queue = Arc::clone(&queue);
                let cutoff = retention_cutoff(clock.now(), retention);
                async move {
                    if let Err(e) = queue.purge_finished(cutoff).await {
                        error!(error = %e, "job retention failed");
                    }
                }
            },
        )?;

        {
            let mut workers = self.workers.lock().await;
            if workers.is_none() {
                *workers = Some(WorkerPool::spawn(
                    QueueName::content(),
                    WorkerPoolConfig {
                        workers: self.config.workers,
                        handler_timeout: self.config.handler_timeout(),
                        poll_min: self.config.poll_min(),
                        poll_max: self.config.poll_max(),
                    },
                    Arc::clone(&self.queue),
                    Arc::clone(&self.registry),
                ));
            }
        }

        self.scheduler.start().await;
        info!("pipeline started");
        Ok(())
    }

    /// Stop the scheduler (in-flight trigger bodies finish), then drain the
    /// workers.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        let workers = self.workers.lock().await.take();
        if let Some(pool) = workers {
            pool.shutdown_and_join().await;
        }
        info!("pipeline stopped");
    }

    /// For owner-registered triggers.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn queue(&self) -> Arc<dyn Queue> {
        Arc::clone(&self.queue)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the due scan immediately, outside the trigger schedule.
    pub async fn scan_now(&self) -> Result<ScanReport, StoreError> {
        self.scan.run_once().await
    }

    pub async fn reap_now(&self) -> Result<usize, QueueError> {
        self.reaper.run_once().await
    }

    pub async fn counts(&self) -> Result<QueueCounts, QueueError> {
        self.queue.counts(&QueueName::content()).await
    }
}

fn retention_cutoff(now: DateTime<Utc>, retention: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(retention)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::registry::HandlerOutcome;
    use crate::domain::Platform;
    use crate::error::{ConfigError, HandlerError, RegistryError};
    use crate::impls::{InMemoryContentStore, ScriptedAdapter};
    use crate::queue::JobRecord;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn handle(&self, _job: &JobRecord) -> Result<HandlerOutcome, HandlerError> {
            Ok(HandlerOutcome::Completed)
        }
    }

    fn store() -> Arc<dyn ContentStore> {
        Arc::new(InMemoryContentStore::new(Arc::new(SystemClock)))
    }

    #[tokio::test]
    async fn build_without_adapters_or_handler_fails_fast() {
        let err = PipelineBuilder::new(PipelineConfig::default())
            .content_store(store())
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::MissingHandlers(m) if m == vec![JobType::Publish]));
    }

    #[tokio::test]
    async fn build_requires_a_content_store() {
        let err = PipelineBuilder::new(PipelineConfig::default())
            .adapter(Arc::new(ScriptedAdapter::new(Platform::Twitter)))
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::MissingContentStore));
    }

    #[tokio::test]
    async fn build_validates_config() {
        let config = PipelineConfig {
            workers: 0,
            ..PipelineConfig::default()
        };
        let err = PipelineBuilder::new(config)
            .content_store(store())
            .adapter(Arc::new(ScriptedAdapter::new(Platform::Twitter)))
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            BuildError::Config(ConfigError::Inconsistent(_))
        ));
    }

    #[test]
    fn registering_twice_is_an_error() {
        let err = PipelineBuilder::new(PipelineConfig::default())
            .register(JobType::Publish, Arc::new(Noop))
            .unwrap()
            .register(JobType::Publish, Arc::new(Noop))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            BuildError::Registry(RegistryError::DuplicateHandler(JobType::Publish))
        ));
    }

    #[tokio::test]
    async fn queue_dir_selects_the_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let queue_dir = dir.path().join("jobs");
        let config = PipelineConfig {
            queue_dir: Some(queue_dir.clone()),
            ..PipelineConfig::default()
        };
        let pipeline = PipelineBuilder::new(config)
            .content_store(store())
            .register(JobType::Publish, Arc::new(Noop))
            .unwrap()
            .build()
            .await
            .unwrap();
        assert!(queue_dir.is_dir());
        assert_eq!(pipeline.counts().await.unwrap(), QueueCounts::default());
    }

    #[tokio::test]
    async fn start_registers_builtin_triggers_and_shutdown_stops() {
        let pipeline = PipelineBuilder::new(PipelineConfig::default())
            .content_store(store())
            .adapter(Arc::new(ScriptedAdapter::new(Platform::Facebook)))
            .build()
            .await
            .unwrap();

        pipeline.start().await.unwrap();
        assert!(pipeline.scheduler().is_running().await);
        assert_eq!(
            pipeline.scheduler().trigger_names(),
            vec![DUE_CONTENT_SCAN, JOB_RETENTION, LEASE_REAPER]
        );
        // idempotent
        pipeline.start().await.unwrap();

        pipeline.shutdown().await;
        assert!(!pipeline.scheduler().is_running().await);
    }

    #[test]
    fn retention_cutoff_saturates() {
        let now = Utc::now();
        assert_eq!(
            retention_cutoff(now, std::time::Duration::from_secs(60)),
            now - chrono::Duration::seconds(60)
        );
        assert_eq!(
            retention_cutoff(now, std::time::Duration::MAX),
            DateTime::<Utc>::MIN_UTC
        );
    }
}
