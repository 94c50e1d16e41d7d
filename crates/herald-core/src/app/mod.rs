//! App - アプリケーション層
//!
//! ports と queue を組み合わせてパイプラインを実装します。
//!
//! # 主要コンポーネント
//! - **PipelineBuilder / Pipeline**: 構築とワイヤリング、起動と停止
//! - **WorkerPool**: dequeue→handle→ack/fail/bury
//! - **Scheduler**: 名前付きトリガー（interval / once / cron）
//! - **DueScan**: 期限の来た target を publish ジョブに変換
//! - **PublishHandler**: target の状態遷移と PlatformAdapter 呼び出し
//! - **Reaper**: lease 期限切れの回収

pub mod builder;
pub mod due_scan;
pub mod publish;
pub mod reaper;
pub mod registry;
pub mod scheduler;
pub mod worker_pool;

pub use self::builder::{DUE_CONTENT_SCAN, JOB_RETENTION, LEASE_REAPER, Pipeline, PipelineBuilder};
pub use self::due_scan::{DueScan, ScanReport};
pub use self::publish::PublishHandler;
pub use self::reaper::Reaper;
pub use self::registry::{HandlerOutcome, HandlerRegistry, JobHandler};
pub use self::scheduler::{Schedule, Scheduler, Trigger, TriggerState};
pub use self::worker_pool::{WorkerPool, WorkerPoolConfig};
