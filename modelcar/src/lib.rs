//! # Modelcar
//!
//! Staged delivery pipelines for machine-learning model artifacts.
//!
//! A delivery pipeline fetches a model, optionally transforms it, publishes
//! it to artifact storage and records it in a model registry. Modelcar
//! provides:
//!
//! - **Typed definitions**: parameters, stages, explicit input bindings and
//!   outputs, validated before anything runs
//! - **Bounded retries**: per-stage retry budgets with exponential backoff
//!   and transient/permanent error classification
//! - **Conditional and disabled stages**: skipped stages are recorded, and
//!   downstream stages fall back to earlier sources
//! - **Idempotent delivery**: re-running with the same parameters neither
//!   re-uploads unchanged content nor duplicates registry entries
//! - **Cancellation**: cooperative cancellation observed between stages,
//!   inside stages and during backoff
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use modelcar::prelude::*;
//!
//! let store: Arc<dyn ArtifactStore> = Arc::new(InMemoryArtifactStore::default());
//! let def = delivery_definition(DeliveryStages::commands(download, compress, store));
//!
//! let run = Executor::new()
//!     .with_registry(Arc::new(InMemoryRegistry::new()))
//!     .run(&def, RunRequest::new().with_parameter("hub_model", "org/bert"), &token)
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod delivery;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod run;
pub mod stages;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{build_registry, build_store, ModelcarConfig};
    pub use crate::context::{RunIdentity, StageContext, StageInputs};
    pub use crate::core::{ArtifactLocation, RunState, StageOutputs, StageState, StorageKind};
    pub use crate::delivery::{delivery_definition, DeliveryStages, DELIVERY_PIPELINE};
    pub use crate::errors::{
        ErrorKind, ModelcarError, ParameterError, PipelineValidationError, RegistryError,
        StageError, StoreError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        DefinitionDocument, Executor, InputBinding, ParamType, ParameterSpec, PipelineBuilder,
        PipelineDefinition, RegistrationSpec, RetryPolicy, StageCatalog, StageSpec,
    };
    pub use crate::registry::{InMemoryRegistry, RegistrationRequest, RegistryClient};
    pub use crate::run::{Run, RunRecord, RunRequest, RunStore, StageResult};
    pub use crate::stages::{CommandConfig, CommandStage, NoOpStage, PublishStage, Stage};
    pub use crate::store::{ArtifactStore, FilesystemArtifactStore, InMemoryArtifactStore, PutOptions};
    pub use crate::utils::{generate_run_id, iso_timestamp, Timestamp};
    pub use std::sync::Arc;
}
