//! Run lifecycle events.
//!
//! The executor reports every state transition to an [`EventSink`]. Event
//! names are listed in [`event_types`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by the executor.
pub mod event_types {
    /// A run passed validation and started.
    pub const RUN_STARTED: &str = "run.started";
    /// A run reached a terminal state.
    pub const RUN_COMPLETED: &str = "run.completed";
    /// The final location was registered.
    pub const RUN_REGISTERED: &str = "run.registered";
    /// A stage attempt started.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage was skipped.
    pub const STAGE_SKIPPED: &str = "stage.skipped";
    /// A stage reused outputs from a previous run record.
    pub const STAGE_REUSED: &str = "stage.reused";
    /// A stage attempt failed.
    pub const STAGE_ATTEMPT_FAILED: &str = "stage.attempt_failed";
    /// A stage is waiting out a backoff before its next attempt.
    pub const STAGE_RETRYING: &str = "stage.retrying";
    /// A stage succeeded.
    pub const STAGE_SUCCEEDED: &str = "stage.succeeded";
    /// A stage failed permanently.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A stage observed the cancellation signal.
    pub const STAGE_CANCELLED: &str = "stage.cancelled";
}
