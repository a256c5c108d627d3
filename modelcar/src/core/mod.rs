//! Core domain model types for modelcar.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Stage and run state enums
//! - Stage output values
//! - Artifact locations and storage kinds

mod artifact;
mod output;
mod status;

pub use artifact::{ArtifactLocation, StorageKind};
pub use output::StageOutputs;
pub use status::{RunState, StageState};
