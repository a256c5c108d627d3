//! Fluent builder for pipeline definitions.

use super::{validate, ParameterSpec, PipelineDefinition, RegistrationSpec, StageSpec};
use crate::errors::PipelineValidationError;
use crate::stages::Stage;
use std::sync::Arc;

/// Builder for creating pipeline definitions.
///
/// Stages are appended in execution order.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    definition: PipelineDefinition,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            definition: PipelineDefinition::new(name),
        }
    }

    /// Declares a run parameter.
    #[must_use]
    pub fn parameter(mut self, spec: ParameterSpec) -> Self {
        self.definition.parameters.push(spec);
        self
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, spec: StageSpec) -> Self {
        self.definition.stages.push(spec);
        self
    }

    /// Appends a stage built from a name and body, configured by `configure`.
    #[must_use]
    pub fn stage_with<F>(self, name: impl Into<String>, body: Arc<dyn Stage>, configure: F) -> Self
    where
        F: FnOnce(StageSpec) -> StageSpec,
    {
        self.stage(configure(StageSpec::new(name, body)))
    }

    /// Sets the registration step.
    #[must_use]
    pub fn registration(mut self, spec: RegistrationSpec) -> Self {
        self.definition.registration = Some(spec);
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.definition.stages.len()
    }

    /// Returns the definition without validating it.
    #[must_use]
    pub fn build(self) -> PipelineDefinition {
        self.definition
    }

    /// Validates and returns the definition.
    ///
    /// # Errors
    ///
    /// Returns the first validation error.
    pub fn try_build(self) -> Result<PipelineDefinition, PipelineValidationError> {
        validate(&self.definition)?;
        Ok(self.definition)
    }
}
