//! Model registry clients.
//!
//! A registry binds `(name, version)` to exactly one artifact location.
//! Registering the same binding again is a no-op that returns the record
//! on file; binding a registered version to a different location is a
//! conflict. Each backend makes the check-and-write a single atomic step.

mod filesystem;
#[cfg(feature = "http")]
mod http;
mod memory;

pub use filesystem::FilesystemRegistry;
#[cfg(feature = "http")]
pub use http::HttpRegistry;
pub use memory::InMemoryRegistry;

use crate::core::ArtifactLocation;
use crate::errors::RegistryError;
use crate::utils::{generate_uuid, now_utc, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use uuid::Uuid;

/// A request to bind a model version to a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    /// Model name.
    pub name: String,
    /// Model version.
    pub version: String,
    /// Where the artifact was published.
    pub location: ArtifactLocation,
    /// Free-form metadata recorded with the binding.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// The run performing the registration.
    #[serde(default)]
    pub run_id: Option<Uuid>,
}

impl RegistrationRequest {
    /// Creates a request with `storage_type` and `uri` metadata filled in.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        location: ArtifactLocation,
    ) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("storage_type".to_string(), location.kind.as_str().into());
        metadata.insert("uri".to_string(), location.uri.clone().into());
        Self {
            name: name.into(),
            version: version.into(),
            location,
            metadata,
            run_id: None,
        }
    }

    /// Sets the registering run.
    #[must_use]
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Checks that name and version are usable registry keys.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Invalid` for empty names or versions, or ones
    /// containing path separators.
    pub fn validate(&self) -> Result<(), RegistryError> {
        for (field, value) in [("name", &self.name), ("version", &self.version)] {
            if value.trim().is_empty() {
                return Err(RegistryError::Invalid(format!("model {field} is empty")));
            }
            if value.contains('/') || value.contains('\\') || value == ".." || value == "." {
                return Err(RegistryError::Invalid(format!(
                    "model {field} '{value}' contains a path separator"
                )));
            }
        }
        Ok(())
    }

    /// Builds the record stored for this request.
    #[must_use]
    pub fn into_record(self) -> RegistrationRecord {
        RegistrationRecord {
            id: generate_uuid(),
            name: self.name,
            version: self.version,
            location: self.location,
            metadata: self.metadata,
            run_id: self.run_id,
            registered_at: now_utc(),
        }
    }
}

/// A stored `(name, version) -> location` binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    /// Record ID.
    pub id: Uuid,
    /// Model name.
    pub name: String,
    /// Model version.
    pub version: String,
    /// The bound location.
    pub location: ArtifactLocation,
    /// Metadata recorded at registration.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// The run that wrote the binding.
    #[serde(default)]
    pub run_id: Option<Uuid>,
    /// When the binding was first written.
    pub registered_at: Timestamp,
}

/// Result of a registration call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationOutcome {
    /// The record on file after the call.
    pub record: RegistrationRecord,
    /// False if an identical binding already existed.
    pub created: bool,
}

/// Client for a model registry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistryClient: Send + Sync + Debug {
    /// Binds `request.name`/`request.version` to `request.location`.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Conflict` if the version is bound elsewhere,
    /// `RegistryError::Unavailable` if the registry cannot be reached.
    async fn register(&self, request: &RegistrationRequest) -> Result<RegistrationOutcome, RegistryError>;

    /// Looks up an existing binding.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Unavailable` if the registry cannot be reached.
    async fn lookup(&self, name: &str, version: &str) -> Result<Option<RegistrationRecord>, RegistryError>;
}

/// Resolves a registration against the record already on file.
///
/// # Errors
///
/// Returns `RegistryError::Conflict` if the locations differ.
pub fn resolve_existing(
    existing: RegistrationRecord,
    request: &RegistrationRequest,
) -> Result<RegistrationOutcome, RegistryError> {
    if existing.location == request.location {
        Ok(RegistrationOutcome {
            record: existing,
            created: false,
        })
    } else {
        Err(RegistryError::Conflict {
            name: request.name.clone(),
            version: request.version.clone(),
            existing: existing.location,
            requested: request.location.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StorageKind;

    fn location(uri: &str) -> ArtifactLocation {
        ArtifactLocation::new(uri, StorageKind::S3)
    }

    #[test]
    fn test_request_metadata_defaults() {
        let request = RegistrationRequest::new("m", "1.0.0", location("s3://models/model-data/m/1.0.0"));
        assert_eq!(request.metadata["storage_type"], "s3");
        assert_eq!(request.metadata["uri"], "s3://models/model-data/m/1.0.0");
    }

    #[test]
    fn test_request_validation() {
        let loc = location("s3://b/k");
        assert!(RegistrationRequest::new("m", "1.0.0", loc.clone()).validate().is_ok());
        assert!(RegistrationRequest::new("", "1.0.0", loc.clone()).validate().is_err());
        assert!(RegistrationRequest::new("m", "../x", loc).validate().is_err());
    }

    #[test]
    fn test_resolve_existing() {
        let request = RegistrationRequest::new("m", "1", location("s3://b/a"));
        let existing = request.clone().into_record();

        let outcome = resolve_existing(existing.clone(), &request).unwrap();
        assert!(!outcome.created);
        assert_eq!(outcome.record.id, existing.id);

        let other = RegistrationRequest::new("m", "1", location("s3://b/other"));
        let err = resolve_existing(existing, &other).unwrap_err();
        assert!(matches!(err, RegistryError::Conflict { .. }));
    }
}
