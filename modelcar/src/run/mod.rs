//! Runs: one execution of a pipeline definition against concrete parameters.
//!
//! The executor owns every [`Run`] and [`StageResult`] mutation. A run is
//! serializable as-is; the persisted form is called a [`RunRecord`] and is
//! what `RunStore` implementations save and what resumed runs read from.

mod request;
mod result;
mod store;

pub use request::{parse_stage_list, RunRequest};
pub use result::{AttemptOutcome, AttemptRecord, StageResult};
pub use store::{InMemoryRunStore, JsonFileRunStore, RunStore};

use crate::core::{ArtifactLocation, RunState, StageState};
use crate::errors::ErrorSummary;
use crate::registry::RegistrationRecord;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// The first fatal failure of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// The stage that failed.
    pub stage: String,
    /// Attempts made by that stage.
    pub attempts: u32,
    /// The last error.
    pub error: ErrorSummary,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stage '{}' failed after {} attempt(s): {}",
            self.stage, self.attempts, self.error
        )
    }
}

/// One execution instance of a pipeline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Run ID.
    pub id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// Resolved parameters.
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Hash of the resolved parameters.
    pub parameter_hash: String,
    /// Overall state.
    pub state: RunState,
    /// Stage results in execution order, registration last.
    pub stages: Vec<StageResult>,
    /// First fatal failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    /// Final published location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<ArtifactLocation>,
    /// Registry record written or confirmed by this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration: Option<RegistrationRecord>,
    /// Cancellation reason, if cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
}

/// The persisted form of a run.
pub type RunRecord = Run;

impl Run {
    /// Returns a stage result by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub(crate) fn stage_mut(&mut self, name: &str) -> Option<&mut StageResult> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    /// Counts stages in `state`.
    #[must_use]
    pub fn count_in(&self, state: StageState) -> usize {
        self.stages.iter().filter(|s| s.state == state).count()
    }

    /// Returns true if the run finished successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state.is_success()
    }

    /// Serializes the run as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Reads a run from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is not a run record.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Returns a one-line human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        match (&self.state, &self.failure) {
            (_, Some(failure)) => format!("Run {} {}: {failure}", self.id, self.state),
            (RunState::Cancelled, None) => format!(
                "Run {} cancelled: {}",
                self.id,
                self.cancel_reason.as_deref().unwrap_or("no reason given")
            ),
            _ => {
                let location = self
                    .location
                    .as_ref()
                    .map_or_else(|| "no artifact".to_string(), ToString::to_string);
                format!(
                    "Run {} {}: {} succeeded, {} skipped, {location}",
                    self.id,
                    self.state,
                    self.count_in(StageState::Succeeded),
                    self.count_in(StageState::Skipped),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::utils::now_utc;

    fn run() -> Run {
        Run {
            id: Uuid::nil(),
            pipeline: "delivery".into(),
            parameters: BTreeMap::new(),
            parameter_hash: "abc".into(),
            state: RunState::Failed,
            stages: vec![StageResult::new("download"), StageResult::new("upload")],
            failure: Some(RunFailure {
                stage: "upload".into(),
                attempts: 3,
                error: ErrorSummary::new(ErrorKind::Transient, "503 Slow Down"),
            }),
            location: None,
            registration: None,
            cancel_reason: None,
            started_at: now_utc(),
            finished_at: Some(now_utc()),
        }
    }

    #[test]
    fn test_failure_summary_names_stage_and_attempts() {
        let summary = run().summary();
        assert!(summary.contains("stage 'upload' failed after 3 attempt(s)"));
        assert!(summary.contains("503 Slow Down"));
    }

    #[test]
    fn test_record_json_round_trip() {
        let original = run();
        let restored = Run::from_json(&original.to_json().unwrap()).unwrap();
        assert_eq!(restored, original);
        assert_eq!(restored.stage("upload").map(|s| s.name.as_str()), Some("upload"));
    }
}
