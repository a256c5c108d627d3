//! Per-attempt context handed to stage bodies.

use super::{RunIdentity, StageInputs};
use crate::cancellation::CancellationToken;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Everything a stage body may read during one attempt.
///
/// The context is read-only: bodies report results through their return
/// value and never mutate run state.
#[derive(Debug, Clone)]
pub struct StageContext {
    identity: RunIdentity,
    inputs: StageInputs,
    parameters: Arc<BTreeMap<String, serde_json::Value>>,
    cancellation: CancellationToken,
}

impl StageContext {
    /// Creates a new stage context.
    #[must_use]
    pub fn new(
        identity: RunIdentity,
        inputs: StageInputs,
        parameters: Arc<BTreeMap<String, serde_json::Value>>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            identity,
            inputs,
            parameters,
            cancellation,
        }
    }

    /// Creates a detached context for exercising a stage body directly.
    #[must_use]
    pub fn standalone(stage: impl Into<String>, inputs: StageInputs) -> Self {
        Self::new(
            RunIdentity::new(Uuid::nil(), "standalone", stage),
            inputs,
            Arc::new(BTreeMap::new()),
            CancellationToken::new(),
        )
    }

    /// Returns the run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Returns the run ID.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.identity.run_id
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.identity.stage
    }

    /// Returns the 1-based attempt number.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.identity.attempt
    }

    /// Returns the resolved inputs.
    #[must_use]
    pub fn inputs(&self) -> &StageInputs {
        &self.inputs
    }

    /// Returns a resolved run parameter.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&serde_json::Value> {
        self.parameters.get(name)
    }

    /// Returns the run's cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns true if the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
