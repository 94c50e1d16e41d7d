//! Ports - 抽象化レイヤー
//!
//! 各 trait はパイプラインの外側（content DB, platform API, queue の永続化先,
//! ログ/メトリクス）へのインターフェース。実装は `impls` にある。

pub mod clock;
pub mod content_store;
pub mod event_sink;
pub mod id_generator;
pub mod job_store;
pub mod platform;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::content_store::ContentStore;
pub use self::event_sink::EventSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::JobStore;
pub use self::platform::{ErrorKind, PlatformAdapter, PlatformError};
