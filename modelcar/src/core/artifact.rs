//! Artifact locations produced by stores and consumed by registries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of storage an artifact location points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageKind {
    /// S3-compatible object storage.
    #[serde(rename = "s3")]
    S3,
    /// An OCI image registry.
    #[serde(rename = "oci-image")]
    OciImage,
    /// A local filesystem directory.
    #[serde(rename = "file")]
    File,
}

impl StorageKind {
    /// Infers the storage kind from a URI scheme.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        let (scheme, _) = uri.split_once("://")?;
        match scheme {
            "s3" => Some(Self::S3),
            "oci" | "docker" => Some(Self::OciImage),
            "file" => Some(Self::File),
            _ => None,
        }
    }

    /// Returns the tag used in registry metadata.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::OciImage => "oci-image",
            Self::File => "file",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opaque, storage-kind-tagged pointer to a published artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactLocation {
    /// The artifact URI.
    pub uri: String,
    /// The storage kind.
    pub kind: StorageKind,
}

impl ArtifactLocation {
    /// Creates a new artifact location.
    #[must_use]
    pub fn new(uri: impl Into<String>, kind: StorageKind) -> Self {
        Self {
            uri: uri.into(),
            kind,
        }
    }

    /// Creates a location from a URI, inferring the kind from its scheme.
    #[must_use]
    pub fn from_uri(uri: impl Into<String>) -> Option<Self> {
        let uri = uri.into();
        StorageKind::from_uri(&uri).map(|kind| Self { uri, kind })
    }

    /// Returns a location for `child` nested under this location.
    #[must_use]
    pub fn join(&self, child: &str) -> Self {
        Self {
            uri: format!("{}/{}", self.uri.trim_end_matches('/'), child.trim_start_matches('/')),
            kind: self.kind,
        }
    }

    /// Converts the location into a stage output value.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({ "uri": self.uri, "kind": self.kind })
    }

    /// Reads a location from a stage output value.
    ///
    /// Accepts either the object form produced by [`Self::to_value`] or a
    /// bare URI string with a recognised scheme.
    #[must_use]
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(uri) => Self::from_uri(uri.clone()),
            serde_json::Value::Object(_) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.uri, self.kind)
    }
}
