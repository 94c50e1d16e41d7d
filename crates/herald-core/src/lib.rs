//! herald-core
//!
//! Content scheduling and publishing pipeline.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, content/targets, platform, job payloads, events）
//! - **ports**: 抽象化レイヤー（Clock, ContentStore, PlatformAdapter, JobStore, EventSink, など）
//! - **queue**: Queue trait + LocalQueue（永続化付き、lease / backoff / idempotency key）
//! - **app**: アプリケーションロジック（builder, worker pool, scheduler, publish handler, など）
//! - **impls**: ports の実装（InMemoryContentStore, FileJobStore など開発用）
//! - **config**: 環境変数からの設定読み込み
//! - **error**: エラー型
//! - **observability**: queue の状態集計

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

pub use app::{Pipeline, PipelineBuilder};
pub use config::PipelineConfig;
pub use error::HeraldError;
