//! Runtime configuration: backends, run persistence, logging and defaults.
//!
//! ```yaml
//! store:
//!   type: s3
//!   endpoint: https://minio.example.com
//!   bucket: models
//! registry:
//!   type: http
//!   base_url: https://registry.example.com/api/v1
//! runs: /var/lib/modelcar/runs
//! logging:
//!   level: info
//!   format: json
//! defaults:
//!   retry: { max_attempts: 3, base_delay_ms: 1000, max_delay_ms: 8000 }
//! ```

use crate::errors::ModelcarError;
use crate::observability::LoggingConfig;
use crate::pipeline::RetryPolicy;
use crate::registry::{FilesystemRegistry, InMemoryRegistry, RegistryClient};
use crate::run::{JsonFileRunStore, RunStore};
use crate::store::{ArtifactStore, FilesystemArtifactStore, InMemoryArtifactStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Artifact store backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local store, for dry runs and tests.
    Memory {
        /// Bucket name used in `s3://` locations.
        #[serde(default = "default_bucket")]
        bucket: String,
    },
    /// A local directory.
    Filesystem {
        /// Root directory.
        root: PathBuf,
    },
    /// An S3-compatible endpoint.
    S3 {
        /// Endpoint URL.
        endpoint: String,
        /// Bucket name.
        bucket: String,
    },
}

fn default_bucket() -> String {
    "models".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory {
            bucket: default_bucket(),
        }
    }
}

/// Registry backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryConfig {
    /// Process-local registry.
    #[default]
    Memory,
    /// One JSON file per version under `root`.
    Filesystem {
        /// Root directory.
        root: PathBuf,
    },
    /// A registry HTTP API.
    Http {
        /// API base URL.
        base_url: String,
    },
}

/// Defaults applied to definitions that leave settings out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Retry policy for stages without one.
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelcarConfig {
    /// Artifact store.
    #[serde(default)]
    pub store: StoreConfig,
    /// Registry.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Directory for run records; runs are not persisted when unset.
    #[serde(default)]
    pub runs: Option<PathBuf>,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

impl ModelcarConfig {
    /// Parses YAML configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or fails validation.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ModelcarError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or fails validation.
    pub fn from_json_str(json: &str) -> Result<Self, ModelcarError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads configuration from disk, choosing the format by extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModelcarError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ModelcarError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }

    /// Checks values serde cannot check.
    ///
    /// # Errors
    ///
    /// Returns `ModelcarError::Config` describing the first problem.
    pub fn validate(&self) -> Result<(), ModelcarError> {
        match &self.store {
            StoreConfig::Memory { bucket } | StoreConfig::S3 { bucket, .. } if bucket.trim().is_empty() => {
                return Err(ModelcarError::Config("store bucket is empty".to_string()));
            }
            StoreConfig::S3 { endpoint, .. } if !is_http_url(endpoint) => {
                return Err(ModelcarError::Config(format!(
                    "store endpoint '{endpoint}' is not an http(s) URL"
                )));
            }
            _ => {}
        }
        if let RegistryConfig::Http { base_url } = &self.registry {
            if !is_http_url(base_url) {
                return Err(ModelcarError::Config(format!(
                    "registry base_url '{base_url}' is not an http(s) URL"
                )));
            }
        }
        if self.defaults.retry.max_attempts == 0 {
            return Err(ModelcarError::Config(
                "defaults.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds the configured run store, if any.
    #[must_use]
    pub fn build_run_store(&self) -> Option<Arc<dyn RunStore>> {
        self.runs
            .as_ref()
            .map(|dir| Arc::new(JsonFileRunStore::new(dir.clone())) as Arc<dyn RunStore>)
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Builds the artifact store described by `config`.
///
/// # Errors
///
/// Returns `ModelcarError::Config` if the backend is not compiled in.
pub fn build_store(config: &StoreConfig) -> Result<Arc<dyn ArtifactStore>, ModelcarError> {
    match config {
        StoreConfig::Memory { bucket } => Ok(Arc::new(InMemoryArtifactStore::new(bucket.clone()))),
        StoreConfig::Filesystem { root } => Ok(Arc::new(FilesystemArtifactStore::new(root.clone()))),
        #[cfg(feature = "http")]
        StoreConfig::S3 { endpoint, bucket } => Ok(Arc::new(crate::store::S3ArtifactStore::new(
            endpoint.clone(),
            bucket.clone(),
        ))),
        #[cfg(not(feature = "http"))]
        StoreConfig::S3 { .. } => Err(ModelcarError::Config(
            "the s3 store requires the `http` feature".to_string(),
        )),
    }
}

/// Builds the registry client described by `config`.
///
/// # Errors
///
/// Returns `ModelcarError::Config` if the backend is not compiled in.
pub fn build_registry(config: &RegistryConfig) -> Result<Arc<dyn RegistryClient>, ModelcarError> {
    match config {
        RegistryConfig::Memory => Ok(Arc::new(InMemoryRegistry::new())),
        RegistryConfig::Filesystem { root } => Ok(Arc::new(FilesystemRegistry::new(root.clone()))),
        #[cfg(feature = "http")]
        RegistryConfig::Http { base_url } => {
            Ok(Arc::new(crate::registry::HttpRegistry::new(base_url.clone())))
        }
        #[cfg(not(feature = "http"))]
        RegistryConfig::Http { .. } => Err(ModelcarError::Config(
            "the http registry requires the `http` feature".to_string(),
        )),
    }
}
