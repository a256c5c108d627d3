//! Pipeline definitions and execution.
//!
//! This module provides:
//! - Definition types (stages, parameters, input bindings, registration)
//! - Run-condition expressions
//! - Definition validation
//! - A builder and a YAML/JSON document form
//! - Retry policies and the sequential executor

mod builder;
pub mod condition;
pub mod document;
mod executor;
mod retry;
mod spec;
mod validation;

#[cfg(test)]
mod integration_tests;

pub use builder::PipelineBuilder;
pub use condition::{Condition, ConditionError};
pub use document::{DefinitionDocument, StageCatalog, StageDocument};
pub use executor::Executor;
pub use retry::{JitterStrategy, RetryDecision, RetryPolicy};
pub use spec::{
    InputBinding, InputSource, ParamType, ParameterSpec, PipelineDefinition, RegistrationSpec,
    StageSpec, DEFAULT_REGISTRATION_STAGE,
};
pub use validation::{validate, validate_with_disabled, RESERVED_STAGE_NAME};
