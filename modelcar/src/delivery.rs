//! The standard model delivery pipeline.
//!
//! `download -> compress (when compress == true) -> upload -> register`.
//!
//! | Parameter       | Type   | Default | Effect                                   |
//! |-----------------|--------|---------|------------------------------------------|
//! | `hub_model`     | string | -       | Hub identifier passed to the download    |
//! | `model_name`    | string | -       | Destination prefix; registered lowercase |
//! | `model_version` | string | `1.0.0` | Registry version and destination prefix  |
//! | `compress`      | bool   | `false` | Enables the `compress` stage             |
//! | `bucket`        | string | unset   | Recorded as `bucket` registry metadata   |
//!
//! Disabling `compress` (or leaving it off) makes `upload` consume the raw
//! download. Disabling `download` fails validation because the stages after
//! it have no other guaranteed source.

use crate::pipeline::{
    InputBinding, ParamType, ParameterSpec, PipelineBuilder, PipelineDefinition, RegistrationSpec,
    RetryPolicy, StageSpec,
};
use crate::stages::{CommandConfig, CommandStage, PublishStage, Stage};
use crate::store::ArtifactStore;
use std::sync::Arc;

/// Name of the standard pipeline.
pub const DELIVERY_PIPELINE: &str = "model-delivery";

/// Default model version.
pub const DEFAULT_MODEL_VERSION: &str = "1.0.0";

/// The standard pipeline as a definition document, for `modelcar init`.
pub const DELIVERY_DOCUMENT: &str = r#"name: model-delivery
parameters:
  - name: hub_model
    type: string
    required: true
    description: Hub identifier of the model to fetch
  - name: model_name
    type: string
    required: true
    description: Registry name of the model
  - name: model_version
    type: string
    default: "1.0.0"
  - name: compress
    type: bool
    default: false
    description: Run the compress stage
  - name: bucket
    type: string
    description: Destination bucket recorded in registry metadata
stages:
  - name: download
    kind: command
    config:
      program: modelcar-hub-download
      args: ["${model}"]
      transient_exit_codes: [75]
    inputs:
      model: hub_model
    outputs: [model_dir]
    retry: { max_attempts: 3 }
  - name: compress
    kind: command
    config:
      program: modelcar-compress
      args: ["${source}"]
    inputs:
      source: download.model_dir
    outputs: [model_dir]
    condition: "compress == true"
  - name: upload
    kind: publish
    inputs:
      source: [compress.model_dir, download.model_dir]
      model_name: model_name
      model_version: model_version
    outputs: [location]
    retry: { max_attempts: 5 }
registration:
  model_name: model_name
  lowercase_name: true
  version: model_version
  location: upload.location
  metadata:
    source: huggingface
    framework: pytorch
    model_format: safetensors
  metadata_bindings:
    hub_model: hub_model
    bucket: bucket
  retry: { max_attempts: 3 }
"#;

/// Bodies for the three working stages of the delivery pipeline.
#[derive(Debug, Clone)]
pub struct DeliveryStages {
    /// Fetches `model` and outputs `model_dir`.
    pub download: Arc<dyn Stage>,
    /// Transforms `source` and outputs `model_dir`.
    pub compress: Arc<dyn Stage>,
    /// Publishes `source` and outputs `location`.
    pub upload: Arc<dyn Stage>,
}

impl DeliveryStages {
    /// External download and compress tools plus a publish stage on `store`.
    #[must_use]
    pub fn commands(
        download: CommandConfig,
        compress: CommandConfig,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            download: Arc::new(CommandStage::from_config(download)),
            compress: Arc::new(CommandStage::from_config(compress)),
            upload: Arc::new(PublishStage::new(store)),
        }
    }
}

/// Builds the standard delivery definition around `stages`.
#[must_use]
pub fn delivery_definition(stages: DeliveryStages) -> PipelineDefinition {
    PipelineBuilder::new(DELIVERY_PIPELINE)
        .parameter(
            ParameterSpec::required("hub_model", ParamType::String)
                .with_description("Hub identifier of the model to fetch"),
        )
        .parameter(
            ParameterSpec::required("model_name", ParamType::String)
                .with_description("Registry name of the model"),
        )
        .parameter(
            ParameterSpec::optional("model_version", ParamType::String)
                .with_default(DEFAULT_MODEL_VERSION),
        )
        .parameter(
            ParameterSpec::optional("compress", ParamType::Bool)
                .with_default(false)
                .with_description("Run the compress stage"),
        )
        .parameter(
            ParameterSpec::optional("bucket", ParamType::String)
                .with_description("Destination bucket recorded in registry metadata"),
        )
        .stage(
            StageSpec::new("download", stages.download)
                .with_input(InputBinding::required("model", "hub_model"))
                .with_output("model_dir")
                .with_retry(RetryPolicy::new(3)),
        )
        .stage(
            StageSpec::new("compress", stages.compress)
                .with_input(InputBinding::required("source", "download.model_dir"))
                .with_output("model_dir")
                .with_condition("compress == true"),
        )
        .stage(
            StageSpec::new("upload", stages.upload)
                .with_input(InputBinding::required("source", "compress.model_dir").or("download.model_dir"))
                .with_input(InputBinding::required("model_name", "model_name"))
                .with_input(InputBinding::required("model_version", "model_version"))
                .with_output("location")
                .with_retry(RetryPolicy::new(5)),
        )
        .registration(
            RegistrationSpec::new("model_name", "model_version", "upload.location")
                .with_lowercase_name()
                .with_metadata("source", "huggingface")
                .with_metadata("framework", "pytorch")
                .with_metadata("model_format", "safetensors")
                .with_metadata_binding("hub_model", "hub_model")
                .with_metadata_binding("bucket", "bucket")
                .with_retry(RetryPolicy::new(3)),
        )
        .build()
}
