//! YAML/JSON authored pipeline definitions.
//!
//! A [`DefinitionDocument`] is the serialized form of a pipeline. Stage
//! bodies are named by `kind` and built through a [`StageCatalog`], which
//! knows the built-in `command`, `publish` and `noop` kinds and accepts
//! custom factories.
//!
//! ```yaml
//! name: model-delivery
//! parameters:
//!   - { name: hub_model, type: string, required: true }
//!   - { name: compress, type: bool, default: false }
//! stages:
//!   - name: download
//!     kind: command
//!     config: { program: hub-download, args: ["${model}"] }
//!     inputs: { model: hub_model }
//!     outputs: [model_dir]
//!     retry: { max_attempts: 3 }
//! registration:
//!   model_name: model_name
//!   version: model_version
//!   location: upload.location
//! ```

use super::retry::RetryPolicy;
use super::spec::{
    InputBinding, InputSource, ParameterSpec, PipelineDefinition, RegistrationSpec, StageSpec,
    DEFAULT_REGISTRATION_STAGE,
};
use crate::errors::ModelcarError;
use crate::stages::{CommandConfig, CommandStage, NoOpStage, PublishStage, Stage};
use crate::store::ArtifactStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// One or more sources for an input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceList {
    /// A single source.
    One(InputSource),
    /// Candidate sources, first available wins.
    Many(Vec<InputSource>),
}

impl SourceList {
    fn into_vec(self) -> Vec<InputSource> {
        match self {
            Self::One(source) => vec![source],
            Self::Many(sources) => sources,
        }
    }
}

/// Serialized form of an input binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputDocument {
    /// Required input read from the given sources.
    Sources(SourceList),
    /// Input with an explicit required flag.
    Detailed {
        /// Candidate sources.
        from: SourceList,
        /// Whether the input must have a value.
        #[serde(default = "default_required")]
        required: bool,
    },
}

fn default_required() -> bool {
    true
}

impl InputDocument {
    fn into_binding(self, name: String) -> InputBinding {
        let (sources, required) = match self {
            Self::Sources(sources) => (sources.into_vec(), true),
            Self::Detailed { from, required } => (from.into_vec(), required),
        };
        InputBinding {
            name,
            sources,
            required,
        }
    }
}

/// Serialized form of a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDocument {
    /// Stage name.
    pub name: String,
    /// Body kind, resolved through the catalog.
    pub kind: String,
    /// Kind-specific body configuration.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Input bindings by local name.
    #[serde(default)]
    pub inputs: BTreeMap<String, InputDocument>,
    /// Declared outputs.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Run condition.
    #[serde(default)]
    pub condition: Option<String>,
    /// Retry policy; the catalog default applies when absent.
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    /// Per-attempt timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Serialized form of the registration step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationDocument {
    /// Stage result name.
    #[serde(default = "default_registration_name")]
    pub name: String,
    /// Source of the model name.
    pub model_name: InputSource,
    /// Lowercase the model name before registering.
    #[serde(default)]
    pub lowercase_name: bool,
    /// Source of the version.
    pub version: InputSource,
    /// Source of the location.
    pub location: InputSource,
    /// Static metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Metadata read from parameters or outputs.
    #[serde(default)]
    pub metadata_bindings: BTreeMap<String, InputSource>,
    /// Retry policy for the registry call.
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    /// Per-attempt timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_registration_name() -> String {
    DEFAULT_REGISTRATION_STAGE.to_string()
}

/// Serialized form of a pipeline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionDocument {
    /// Pipeline name.
    pub name: String,
    /// Parameter schema.
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// Stages in execution order.
    pub stages: Vec<StageDocument>,
    /// Optional registration step.
    #[serde(default)]
    pub registration: Option<RegistrationDocument>,
}

impl DefinitionDocument {
    /// Parses a YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ModelcarError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json_str(json: &str) -> Result<Self, ModelcarError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a document from disk, choosing the format by extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModelcarError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }

    /// Builds an unvalidated definition, binding stage bodies through `catalog`.
    ///
    /// # Errors
    ///
    /// Returns `ModelcarError::Config` for unknown kinds or invalid body
    /// configuration.
    pub fn bind(self, catalog: &StageCatalog) -> Result<PipelineDefinition, ModelcarError> {
        let mut def = PipelineDefinition::new(self.name);
        def.parameters = self.parameters;

        for stage in self.stages {
            let body = catalog.build(&stage)?;
            let mut spec = StageSpec::new(stage.name, body)
                .with_retry(stage.retry.unwrap_or_else(|| catalog.default_retry.clone()));
            spec.inputs = stage
                .inputs
                .into_iter()
                .map(|(name, input)| input.into_binding(name))
                .collect();
            spec.outputs = stage.outputs;
            spec.condition = stage.condition;
            spec.timeout = stage.timeout_ms.map(Duration::from_millis);
            def.stages.push(spec);
        }

        def.registration = self.registration.map(|doc| {
            let mut registration = RegistrationSpec::new(doc.model_name, doc.version, doc.location)
                .named(doc.name)
                .with_retry(doc.retry.unwrap_or_else(|| catalog.default_retry.clone()));
            registration.lowercase_name = doc.lowercase_name;
            registration.metadata = doc.metadata;
            registration.metadata_bindings = doc.metadata_bindings;
            registration.timeout = doc.timeout_ms.map(Duration::from_millis);
            registration
        });

        Ok(def)
    }
}

/// Builds a stage body from its name and configuration.
pub type StageFactory =
    Box<dyn Fn(&str, &serde_json::Value) -> Result<Arc<dyn Stage>, ModelcarError> + Send + Sync>;

/// Maps stage kinds to body factories.
pub struct StageCatalog {
    factories: HashMap<String, StageFactory>,
    default_retry: RetryPolicy,
}

impl fmt::Debug for StageCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.factories.keys().collect();
        kinds.sort();
        f.debug_struct("StageCatalog")
            .field("kinds", &kinds)
            .field("default_retry", &self.default_retry)
            .finish()
    }
}

impl StageCatalog {
    /// Creates a catalog with the `command` and `noop` kinds.
    #[must_use]
    pub fn new() -> Self {
        let mut catalog = Self {
            factories: HashMap::new(),
            default_retry: RetryPolicy::default(),
        };
        catalog.register("command", |name, config| {
            let config: CommandConfig = serde_json::from_value(config.clone())
                .map_err(|e| ModelcarError::Config(format!("stage '{name}': invalid command config: {e}")))?;
            Ok(Arc::new(CommandStage::from_config(config)) as Arc<dyn Stage>)
        });
        catalog.register("noop", |name, config| {
            let outputs: BTreeMap<String, serde_json::Value> = match config.get("outputs") {
                Some(outputs) => serde_json::from_value(outputs.clone()).map_err(|e| {
                    ModelcarError::Config(format!("stage '{name}': invalid noop outputs: {e}"))
                })?,
                None => BTreeMap::new(),
            };
            let stage = outputs
                .into_iter()
                .fold(NoOpStage::new(name), |stage, (k, v)| stage.with_output(k, v));
            Ok(Arc::new(stage) as Arc<dyn Stage>)
        });
        catalog
    }

    /// Creates a catalog that can also build `publish` stages on `store`.
    #[must_use]
    pub fn with_store(store: Arc<dyn ArtifactStore>) -> Self {
        let mut catalog = Self::new();
        catalog.register("publish", move |name, config| {
            let mut stage = PublishStage::new(Arc::clone(&store));
            if let Some(root) = config.get("prefix_root") {
                let root = root.as_str().ok_or_else(|| {
                    ModelcarError::Config(format!("stage '{name}': prefix_root must be a string"))
                })?;
                stage = stage.with_prefix_root(root);
            }
            Ok(Arc::new(stage) as Arc<dyn Stage>)
        });
        catalog
    }

    /// Sets the retry policy used by stages that declare none.
    #[must_use]
    pub fn with_default_retry(mut self, retry: RetryPolicy) -> Self {
        self.default_retry = retry;
        self
    }

    /// Registers a factory for `kind`, replacing any existing one.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&str, &serde_json::Value) -> Result<Arc<dyn Stage>, ModelcarError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    /// Returns true if `kind` can be built.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    fn build(&self, stage: &StageDocument) -> Result<Arc<dyn Stage>, ModelcarError> {
        let factory = self.factories.get(&stage.kind).ok_or_else(|| {
            ModelcarError::Config(format!(
                "stage '{}' has unknown kind '{}'",
                stage.name, stage.kind
            ))
        })?;
        factory(&stage.name, &stage.config)
    }
}

impl Default for StageCatalog {
    fn default() -> Self {
        Self::new()
    }
}
