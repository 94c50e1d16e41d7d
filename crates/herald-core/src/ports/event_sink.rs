//! EventSink port - パイプラインイベントの出口
//!
//! Implementations live in `impls::event_sinks` (tracing, recording, noop).

use crate::domain::PipelineEvent;

/// Receives pipeline events. Must not block; called from queue and handler
/// code paths.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}
