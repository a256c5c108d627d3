//! Run identity for tracking pipeline executions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies the run and stage an attempt belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// The unique ID of the run.
    pub run_id: Uuid,
    /// The pipeline definition name.
    pub pipeline: String,
    /// The stage being executed.
    pub stage: String,
    /// The 1-based attempt number.
    pub attempt: u32,
}

impl RunIdentity {
    /// Creates a run identity for the first attempt of a stage.
    #[must_use]
    pub fn new(run_id: Uuid, pipeline: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            run_id,
            pipeline: pipeline.into(),
            stage: stage.into(),
            attempt: 1,
        }
    }

    /// Sets the attempt number.
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}
