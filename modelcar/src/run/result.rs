//! Per-stage results and attempt history.

use crate::core::{StageOutputs, StageState};
use crate::errors::ErrorSummary;
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The body returned outputs.
    Succeeded,
    /// The body returned an error.
    Failed {
        /// The error.
        error: ErrorSummary,
    },
    /// The attempt exceeded its timeout.
    TimedOut {
        /// The configured timeout.
        timeout_ms: u64,
    },
    /// The attempt was aborted by cancellation.
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },
}

/// One execution attempt of a stage body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    /// When the attempt started.
    pub started_at: Timestamp,
    /// When the attempt ended.
    pub finished_at: Timestamp,
    /// How the attempt ended.
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
    /// Backoff scheduled after this attempt, if a retry followed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
}

/// The recorded result of one stage in a run.
///
/// Retries append attempt records to the same result; once the state is
/// terminal the result is not modified again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name.
    pub name: String,
    /// Current state.
    pub state: StageState,
    /// Attempts in order.
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    /// Outputs of the successful attempt.
    #[serde(default)]
    pub outputs: StageOutputs,
    /// The last error, if the stage failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,
    /// Why the stage was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// True if outputs were taken from a previous run instead of executing.
    #[serde(default)]
    pub reused: bool,
    /// When the first attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// When the stage reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
}

impl StageResult {
    /// Creates a result in the `NotStarted` state.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StageState::NotStarted,
            attempts: Vec::new(),
            outputs: StageOutputs::new(),
            error: None,
            skip_reason: None,
            reused: false,
            started_at: None,
            finished_at: None,
        }
    }

    /// Returns the number of attempts made.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }

    /// Returns the backoff delays scheduled between attempts.
    #[must_use]
    pub fn backoffs_ms(&self) -> Vec<u64> {
        self.attempts.iter().filter_map(|a| a.backoff_ms).collect()
    }

    pub(crate) fn begin(&mut self) {
        self.state = StageState::Running;
        self.started_at.get_or_insert_with(now_utc);
    }

    pub(crate) fn push_attempt(&mut self, record: AttemptRecord) {
        self.attempts.push(record);
    }

    pub(crate) fn set_last_backoff(&mut self, backoff_ms: u64) {
        if let Some(last) = self.attempts.last_mut() {
            last.backoff_ms = Some(backoff_ms);
        }
    }

    pub(crate) fn skip(&mut self, reason: impl Into<String>) {
        self.state = StageState::Skipped;
        self.skip_reason = Some(reason.into());
        self.finished_at = Some(now_utc());
    }

    pub(crate) fn succeed(&mut self, outputs: StageOutputs) {
        self.state = StageState::Succeeded;
        self.outputs = outputs;
        self.finished_at = Some(now_utc());
    }

    pub(crate) fn reuse(&mut self, previous: &Self) {
        self.state = StageState::Succeeded;
        self.outputs = previous.outputs.clone();
        self.reused = true;
        self.finished_at = Some(now_utc());
    }

    pub(crate) fn fail(&mut self, error: ErrorSummary) {
        self.state = StageState::Failed;
        self.error = Some(error);
        self.finished_at = Some(now_utc());
    }

    pub(crate) fn cancel(&mut self, error: ErrorSummary) {
        self.state = StageState::Cancelled;
        self.error = Some(error);
        self.finished_at = Some(now_utc());
    }
}
