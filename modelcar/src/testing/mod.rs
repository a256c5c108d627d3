//! Testing utilities for modelcar pipelines.
//!
//! This module provides:
//! - Scripted stages that replay a sequence of attempt results
//! - Store wrappers that inject failures or record calls
//! - Assertions over runs and stage results
//! - Sample model directories

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_attempts, assert_backoffs_ms, assert_run_state, assert_run_succeeded,
    assert_stage_state, assert_validation_code,
};
pub use fixtures::{delivery_request, write_model_dir, MODEL_FILES};
pub use mocks::{CountingArtifactStore, FlakyArtifactStore, ScriptedStage};
