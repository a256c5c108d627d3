//! Event sink trait and implementations.

use async_trait::async_trait;
use parking_lot::RwLock;
use super::event_types;
use tracing::{debug, info, warn, Level};

/// Trait for event sinks that receive run lifecycle events.
///
/// The executor emits one event per state transition. Sinks must never
/// fail the run: errors inside a sink are logged and suppressed.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "stage.started")
    /// * `data` - Optional event data
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Tries to emit an event without blocking.
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// A no-op event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// Writes events to `tracing`, lifting `run_id`, `stage` and `attempt` out
/// of the payload into structured fields.
///
/// Failure and cancellation events are logged at `WARN` unless the sink is
/// configured for `DEBUG` or finer.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: Option<&serde_json::Value>) {
        let field = |key: &str| {
            data.and_then(|d| d.get(key))
                .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
                .unwrap_or_default()
        };
        let run_id = field("run_id");
        let stage = field("stage");
        let attempt = data.and_then(|d| d.get("attempt")).and_then(serde_json::Value::as_u64);

        if self.level >= Level::DEBUG {
            debug!(event_type, run_id = %run_id, stage = %stage, attempt, event_data = ?data, "{event_type}");
        } else if is_warning(event_type) {
            warn!(event_type, run_id = %run_id, stage = %stage, attempt, event_data = ?data, "{event_type}");
        } else {
            info!(event_type, run_id = %run_id, stage = %stage, attempt, "{event_type}");
        }
    }
}

fn is_warning(event_type: &str) -> bool {
    matches!(
        event_type,
        event_types::STAGE_ATTEMPT_FAILED | event_types::STAGE_FAILED | event_types::STAGE_CANCELLED
    )
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// A collecting event sink for testing and auditing.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<(String, Option<serde_json::Value>)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<serde_json::Value>)> {
        self.events.read().clone()
    }

    /// Returns the collected event types in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|(t, _)| t.clone()).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns the event types recorded for one stage, in order.
    #[must_use]
    pub fn stage_history(&self, stage: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|(_, data)| {
                data.as_ref()
                    .and_then(|d| d.get("stage"))
                    .and_then(serde_json::Value::as_str)
                    == Some(stage)
            })
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events matching a type prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<(String, Option<serde_json::Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoOpEventSink;
        sink.emit("run.started", None).await;
        sink.try_emit("run.started", Some(serde_json::json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_logging_sink() {
        let sink = LoggingEventSink::default();
        sink.emit(
            event_types::STAGE_FAILED,
            Some(serde_json::json!({"run_id": "r1", "stage": "upload", "attempt": 3})),
        )
        .await;
        sink.try_emit(event_types::RUN_COMPLETED, Some(serde_json::json!({"run_id": 7})));
        LoggingEventSink::debug().try_emit(event_types::STAGE_STARTED, None);
    }

    #[test]
    fn test_failure_events_are_warnings() {
        assert!(is_warning(event_types::STAGE_ATTEMPT_FAILED));
        assert!(is_warning(event_types::STAGE_CANCELLED));
        assert!(!is_warning(event_types::STAGE_RETRYING));
        assert!(!is_warning(event_types::RUN_COMPLETED));
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit("run.started", None).await;
        sink.try_emit("stage.started", Some(serde_json::json!({"stage": "download"})));

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.event_types(), vec!["run.started", "stage.started"]);
    }

    #[tokio::test]
    async fn test_collecting_sink_filter_and_clear() {
        let sink = CollectingEventSink::new();
        sink.emit("stage.started", None).await;
        sink.emit("stage.succeeded", None).await;
        sink.emit("run.completed", None).await;

        assert_eq!(sink.events_of_type("stage.").len(), 2);
        assert_eq!(sink.events_of_type("run.").len(), 1);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_stage_history() {
        let sink = CollectingEventSink::new();
        let upload = || Some(serde_json::json!({"stage": "upload"}));
        sink.emit(event_types::RUN_STARTED, None).await;
        sink.emit(event_types::STAGE_STARTED, upload()).await;
        sink.emit(event_types::STAGE_STARTED, Some(serde_json::json!({"stage": "download"}))).await;
        sink.emit(event_types::STAGE_ATTEMPT_FAILED, upload()).await;
        sink.emit(event_types::STAGE_RETRYING, upload()).await;

        assert_eq!(
            sink.stage_history("upload"),
            vec!["stage.started", "stage.attempt_failed", "stage.retrying"]
        );
    }
}
