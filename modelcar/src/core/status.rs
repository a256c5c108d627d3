//! Stage and run state enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The state of a single stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// The stage has not been scheduled yet.
    #[default]
    NotStarted,
    /// The run condition was false or the stage was disabled.
    Skipped,
    /// An attempt is in flight (or waiting out a backoff).
    Running,
    /// The stage produced its outputs.
    Succeeded,
    /// The stage failed permanently or exhausted its retry budget.
    Failed,
    /// The stage was interrupted by the cancellation signal.
    Cancelled,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Skipped => write!(f, "skipped"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StageState {
    /// Returns true once the stage result can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Skipped | Self::Succeeded | Self::Failed | Self::Cancelled
        )
    }

    /// Returns true if the stage does not block the run from succeeding.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

/// The overall state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created but not started.
    #[default]
    Pending,
    /// Stages are executing.
    Running,
    /// Every stage succeeded.
    Succeeded,
    /// A stage or the registration failed.
    Failed,
    /// The run succeeded with at least one stage skipped.
    PartiallySkipped,
    /// The run was stopped by the cancellation signal.
    Cancelled,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::PartiallySkipped => write!(f, "partially_skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl RunState {
    /// Returns true if the run has finished.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::PartiallySkipped | Self::Cancelled
        )
    }

    /// Returns true if the run finished successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::PartiallySkipped)
    }
}
