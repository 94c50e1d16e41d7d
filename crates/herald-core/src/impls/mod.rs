//! Impls - ports の実装（開発用 / 単一プロセス用）

pub mod event_sinks;
pub mod inmem_content;
pub mod job_stores;
pub mod scripted_adapter;

pub use self::event_sinks::{NoopEventSink, RecordingEventSink, TracingEventSink};
pub use self::inmem_content::InMemoryContentStore;
pub use self::job_stores::{FileJobStore, MemoryJobStore};
pub use self::scripted_adapter::ScriptedAdapter;
