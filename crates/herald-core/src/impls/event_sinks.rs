//! EventSink 実装

use std::sync::{Mutex, PoisonError};

use tracing::info;

use crate::domain::PipelineEvent;
use crate::ports::EventSink;

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: PipelineEvent) {}
}

/// Logs each event as one structured line under the `herald::events` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: PipelineEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => info!(target: "herald::events", event = event.name(), payload = %json),
            Err(_) => info!(target: "herald::events", event = event.name(), payload = ?event),
        }
    }
}

/// Keeps events in memory for inspection.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(PipelineEvent::name)
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_counts_by_name() {
        let sink = RecordingEventSink::new();
        sink.emit(PipelineEvent::JobsPurged { count: 1 });
        sink.emit(PipelineEvent::JobsPurged { count: 4 });
        TracingEventSink.emit(PipelineEvent::JobsPurged { count: 2 });

        assert_eq!(sink.count("jobs_purged"), 2);
        assert_eq!(sink.events().len(), 2);
    }
}
