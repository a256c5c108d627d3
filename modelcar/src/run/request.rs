//! Run requests.

use super::RunRecord;
use std::collections::{BTreeMap, BTreeSet};

/// What a caller asks the executor to run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Provided parameter values; defaults fill the rest.
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Stages disabled for this run.
    pub disabled: BTreeSet<String>,
    /// A previous run whose succeeded stages may be reused.
    pub resume_from: Option<RunRecord>,
}

impl RunRequest {
    /// Creates an empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter.
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Sets several parameters.
    #[must_use]
    pub fn with_parameters(mut self, values: BTreeMap<String, serde_json::Value>) -> Self {
        self.parameters.extend(values);
        self
    }

    /// Disables a stage.
    #[must_use]
    pub fn disable(mut self, stage: impl Into<String>) -> Self {
        self.disabled.insert(stage.into());
        self
    }

    /// Disables several stages.
    #[must_use]
    pub fn disable_all<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled.extend(stages.into_iter().map(Into::into));
        self
    }

    /// Resumes from a previous run.
    #[must_use]
    pub fn resume(mut self, record: RunRecord) -> Self {
        self.resume_from = Some(record);
        self
    }
}

/// Parses a comma-separated stage list such as `MODELCAR_SKIP_STAGES`.
#[must_use]
pub fn parse_stage_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
