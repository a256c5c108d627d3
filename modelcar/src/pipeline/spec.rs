//! Pipeline and stage specifications.

use super::RetryPolicy;
use crate::errors::ParameterError;
use crate::stages::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default name of the registration step.
pub const DEFAULT_REGISTRATION_STAGE: &str = "register";

/// Declared type of a run parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    /// A string.
    String,
    /// A boolean.
    Bool,
    /// A signed integer.
    Integer,
    /// Any JSON number.
    Number,
}

impl ParamType {
    /// Returns true if `value` is of this type.
    #[must_use]
    pub fn matches(self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Bool => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
        }
    }

    /// Parses a command-line string into a value of this type.
    #[must_use]
    pub fn parse_str(self, raw: &str) -> Option<serde_json::Value> {
        match self {
            Self::String => Some(raw.into()),
            Self::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true.into()),
                "false" | "no" | "0" => Some(false.into()),
                _ => None,
            },
            Self::Integer => raw.parse::<i64>().ok().map(Into::into),
            Self::Number => raw
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Number => "number",
        };
        f.write_str(s)
    }
}

/// Schema entry for a global run parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Whether the run request must provide a value.
    #[serde(default)]
    pub required: bool,
    /// Value used when none is provided.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
}

impl ParameterSpec {
    /// Declares a required parameter.
    #[must_use]
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            default: None,
            description: None,
        }
    }

    /// Declares an optional parameter.
    #[must_use]
    pub fn optional(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type)
        }
    }

    /// Sets a default value; a defaulted parameter is never missing.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.default = Some(value.into());
        self.required = false;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns true if every resolved run has a value for this parameter.
    #[must_use]
    pub fn is_guaranteed(&self) -> bool {
        self.required || self.default.is_some()
    }
}

/// Where an input value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InputSource {
    /// A global run parameter.
    Parameter(String),
    /// A declared output of an earlier stage.
    Output {
        /// Producing stage.
        stage: String,
        /// Output name.
        output: String,
    },
}

impl InputSource {
    /// Parses `name` as a parameter and `stage.output` as a stage output.
    #[must_use]
    pub fn parse(reference: &str) -> Self {
        match reference.split_once('.') {
            Some((stage, output)) => Self::Output {
                stage: stage.to_string(),
                output: output.to_string(),
            },
            None => Self::Parameter(reference.to_string()),
        }
    }

    /// Returns the producing stage for output sources.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Parameter(_) => None,
            Self::Output { stage, .. } => Some(stage),
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parameter(name) => f.write_str(name),
            Self::Output { stage, output } => write!(f, "{stage}.{output}"),
        }
    }
}

impl From<&str> for InputSource {
    fn from(reference: &str) -> Self {
        Self::parse(reference)
    }
}

impl Serialize for InputSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InputSource {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Binds a stage input name to an ordered list of candidate sources.
///
/// At run time the first source with a value wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBinding {
    /// Input name seen by the stage body.
    pub name: String,
    /// Candidate sources in priority order.
    pub sources: Vec<InputSource>,
    /// Whether the stage cannot run without this input.
    pub required: bool,
}

impl InputBinding {
    /// Declares a required input.
    #[must_use]
    pub fn required(name: impl Into<String>, source: impl Into<InputSource>) -> Self {
        Self {
            name: name.into(),
            sources: vec![source.into()],
            required: true,
        }
    }

    /// Declares an optional input.
    #[must_use]
    pub fn optional(name: impl Into<String>, source: impl Into<InputSource>) -> Self {
        Self {
            required: false,
            ..Self::required(name, source)
        }
    }

    /// Adds a fallback source.
    #[must_use]
    pub fn or(mut self, source: impl Into<InputSource>) -> Self {
        self.sources.push(source.into());
        self
    }
}

/// Specification for a single stage in a pipeline.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// Declared inputs.
    pub inputs: Vec<InputBinding>,
    /// Declared output names; the body must produce each of them.
    pub outputs: Vec<String>,
    /// Run-condition expression; the stage is skipped when it is false.
    pub condition: Option<String>,
    /// Retry budget and backoff.
    pub retry: RetryPolicy,
    /// Per-attempt timeout.
    pub timeout: Option<Duration>,
    /// The stage body.
    pub body: Arc<dyn Stage>,
}

impl StageSpec {
    /// Creates a new stage specification.
    #[must_use]
    pub fn new(name: impl Into<String>, body: Arc<dyn Stage>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            condition: None,
            retry: RetryPolicy::default(),
            timeout: None,
            body,
        }
    }

    /// Adds an input binding.
    #[must_use]
    pub fn with_input(mut self, binding: InputBinding) -> Self {
        self.inputs.push(binding);
        self
    }

    /// Declares an output.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    /// Sets the run condition.
    #[must_use]
    pub fn with_condition(mut self, expression: impl Into<String>) -> Self {
        self.condition = Some(expression.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns true if the stage has a run condition.
    #[must_use]
    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }

    /// Returns true if the stage declares `output`.
    #[must_use]
    pub fn declares_output(&self, output: &str) -> bool {
        self.outputs.iter().any(|o| o == output)
    }
}

/// The final registration step.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationSpec {
    /// Name of the step's stage result.
    pub stage_name: String,
    /// Source of the model name.
    pub model_name: InputSource,
    /// Lowercase the resolved model name before registering.
    pub lowercase_name: bool,
    /// Source of the model version.
    pub version: InputSource,
    /// Source of the published location.
    pub location: InputSource,
    /// Static metadata entries.
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Metadata entries read from parameters or outputs.
    pub metadata_bindings: BTreeMap<String, InputSource>,
    /// Retry policy for the registry call.
    pub retry: RetryPolicy,
    /// Per-attempt timeout.
    pub timeout: Option<Duration>,
}

impl RegistrationSpec {
    /// Creates a registration step.
    #[must_use]
    pub fn new(
        model_name: impl Into<InputSource>,
        version: impl Into<InputSource>,
        location: impl Into<InputSource>,
    ) -> Self {
        Self {
            stage_name: DEFAULT_REGISTRATION_STAGE.to_string(),
            model_name: model_name.into(),
            lowercase_name: false,
            version: version.into(),
            location: location.into(),
            metadata: BTreeMap::new(),
            metadata_bindings: BTreeMap::new(),
            retry: RetryPolicy::default(),
            timeout: None,
        }
    }

    /// Renames the registration step.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.stage_name = name.into();
        self
    }

    /// Registers the model name in lowercase.
    #[must_use]
    pub fn with_lowercase_name(mut self) -> Self {
        self.lowercase_name = true;
        self
    }

    /// Adds a static metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Adds a metadata entry read from a source.
    #[must_use]
    pub fn with_metadata_binding(mut self, key: impl Into<String>, source: impl Into<InputSource>) -> Self {
        self.metadata_bindings.insert(key.into(), source.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the required sources as `(field, source)` pairs.
    #[must_use]
    pub fn required_sources(&self) -> [(&'static str, &InputSource); 3] {
        [
            ("model_name", &self.model_name),
            ("version", &self.version),
            ("location", &self.location),
        ]
    }
}

/// An ordered list of stages plus parameter schema and registration.
///
/// Built at authoring time and shared by reference once a run starts.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    /// Pipeline name.
    pub name: String,
    /// Stages in execution order.
    pub stages: Vec<StageSpec>,
    /// Global parameter schema.
    pub parameters: Vec<ParameterSpec>,
    /// Optional registration step.
    pub registration: Option<RegistrationSpec>,
}

impl PipelineDefinition {
    /// Creates an empty definition.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            parameters: Vec::new(),
            registration: None,
        }
    }

    /// Returns a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Returns the position of a stage.
    #[must_use]
    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// Returns a parameter spec by name.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Returns stage names in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Type-checks provided parameters and fills defaults.
    ///
    /// # Errors
    ///
    /// Returns a `ParameterError` for unknown names, type mismatches and
    /// missing required parameters.
    pub fn resolve_parameters(
        &self,
        provided: &BTreeMap<String, serde_json::Value>,
    ) -> Result<BTreeMap<String, serde_json::Value>, ParameterError> {
        if let Some(name) = provided.keys().find(|k| self.parameter(k).is_none()) {
            return Err(ParameterError::Unknown { name: name.clone() });
        }

        let mut resolved = BTreeMap::new();
        for spec in &self.parameters {
            match provided.get(&spec.name).or(spec.default.as_ref()) {
                Some(value) if spec.param_type.matches(value) => {
                    resolved.insert(spec.name.clone(), value.clone());
                }
                Some(value) => {
                    return Err(ParameterError::TypeMismatch {
                        name: spec.name.clone(),
                        expected: spec.param_type.to_string(),
                        actual: value.to_string(),
                    });
                }
                None if spec.required => {
                    return Err(ParameterError::Missing {
                        name: spec.name.clone(),
                    });
                }
                None => {}
            }
        }
        Ok(resolved)
    }

    /// Parses `key=value` strings according to the parameter schema.
    ///
    /// # Errors
    ///
    /// Returns a `ParameterError` for malformed pairs, unknown names and
    /// values that do not parse as the declared type.
    pub fn parse_parameter_args<'a, I>(
        &self,
        args: I,
    ) -> Result<BTreeMap<String, serde_json::Value>, ParameterError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut values = BTreeMap::new();
        for arg in args {
            let (name, raw) = arg.split_once('=').ok_or_else(|| ParameterError::Unknown {
                name: arg.to_string(),
            })?;
            let spec = self.parameter(name).ok_or_else(|| ParameterError::Unknown {
                name: name.to_string(),
            })?;
            let value = spec
                .param_type
                .parse_str(raw)
                .ok_or_else(|| ParameterError::TypeMismatch {
                    name: name.to_string(),
                    expected: spec.param_type.to_string(),
                    actual: raw.to_string(),
                })?;
            values.insert(name.to_string(), value);
        }
        Ok(values)
    }
}
