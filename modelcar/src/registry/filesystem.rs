//! Registry stored as JSON files on disk.

use super::{resolve_existing, RegistrationOutcome, RegistrationRecord, RegistrationRequest, RegistryClient};
use crate::errors::RegistryError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stores each binding at `{root}/{name}/{version}.json`.
///
/// The record is written to a temporary file and hard-linked into place;
/// the link fails if the version already exists, which makes the
/// conditional write atomic across processes sharing the directory.
#[derive(Debug, Clone)]
pub struct FilesystemRegistry {
    root: PathBuf,
}

impl FilesystemRegistry {
    /// Creates a registry rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the registry root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(name).join(format!("{version}.json"))
    }

    async fn read_record(path: &Path) -> Result<Option<RegistrationRecord>, RegistryError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| RegistryError::Invalid(format!("corrupt record {}: {e}", path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RegistryError::Unavailable(e.to_string())),
        }
    }
}

fn unavailable(err: impl std::fmt::Display) -> RegistryError {
    RegistryError::Unavailable(err.to_string())
}

#[async_trait]
impl RegistryClient for FilesystemRegistry {
    async fn register(&self, request: &RegistrationRequest) -> Result<RegistrationOutcome, RegistryError> {
        request.validate()?;
        let path = self.record_path(&request.name, &request.version);

        if let Some(existing) = Self::read_record(&path).await? {
            return resolve_existing(existing, request);
        }

        let dir = self.root.join(&request.name);
        tokio::fs::create_dir_all(&dir).await.map_err(unavailable)?;

        let record = request.clone().into_record();
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| RegistryError::Invalid(e.to_string()))?;
        let tmp = dir.join(format!(".{}.{}.tmp", request.version, uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes).await.map_err(unavailable)?;

        let linked = tokio::fs::hard_link(&tmp, &path).await;
        let _ = tokio::fs::remove_file(&tmp).await;

        match linked {
            Ok(()) => {
                debug!(name = %request.name, version = %request.version, "Registered model version");
                Ok(RegistrationOutcome {
                    record,
                    created: true,
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let existing = Self::read_record(&path)
                    .await?
                    .ok_or_else(|| unavailable("record vanished after conflicting write"))?;
                resolve_existing(existing, request)
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn lookup(&self, name: &str, version: &str) -> Result<Option<RegistrationRecord>, RegistryError> {
        Self::read_record(&self.record_path(name, version)).await
    }
}
