//! Idempotent publish of a local artifact to an [`ArtifactStore`].

use crate::context::StageContext;
use crate::core::StageOutputs;
use crate::errors::StageError;
use crate::stages::Stage;
use crate::store::{bytes_stream, digest_file, file_stream, ArtifactStore, PutOptions};
use crate::utils::iso_timestamp;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the manifest object written after all files.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Default destination root for published models.
pub const DEFAULT_PREFIX_ROOT: &str = "model-data";

/// One published file in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the artifact root, `/`-separated.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Hex SHA-256 digest.
    pub sha256: String,
}

/// Manifest written last; its presence marks a complete artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishManifest {
    /// Model name.
    pub name: String,
    /// Model version.
    pub version: String,
    /// Published files in path order.
    pub files: Vec<ManifestEntry>,
    /// Sum of file sizes.
    pub total_bytes: u64,
}

/// Uploads a file or directory to `{prefix_root}/{model_name}/{model_version}`.
///
/// Inputs: `source` (local path), `model_name`, `model_version`.
/// Outputs: `location`, `files`, `bytes`, `reused`.
///
/// If the artifact's manifest already exists nothing is uploaded. Otherwise
/// a file is skipped only when the store already holds a complete object
/// with the same SHA-256; every other file is uploaded, and the manifest
/// written last. Each object carries `model-name`, `model-version`,
/// `upload-timestamp` and `pipeline` metadata plus any static entries.
#[derive(Debug, Clone)]
pub struct PublishStage {
    store: Arc<dyn ArtifactStore>,
    prefix_root: String,
    metadata: BTreeMap<String, String>,
}

impl PublishStage {
    /// Creates a publish stage writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            prefix_root: DEFAULT_PREFIX_ROOT.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    /// Adds a metadata entry attached to every uploaded object.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Overrides the destination root.
    #[must_use]
    pub fn with_prefix_root(mut self, root: impl Into<String>) -> Self {
        self.prefix_root = root.into();
        self
    }

    /// Returns the destination prefix for a model version.
    #[must_use]
    pub fn destination(&self, name: &str, version: &str) -> String {
        format!("{}/{name}/{version}", self.prefix_root.trim_end_matches('/'))
    }
}

/// Lists regular files under `source` as `(relative path, absolute path)`.
async fn collect_files(source: &Path) -> Result<Vec<(String, PathBuf)>, StageError> {
    let meta = tokio::fs::metadata(source).await.map_err(|e| {
        StageError::permanent(format!("cannot read source {}: {e}", source.display()))
    })?;

    if meta.is_file() {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StageError::permanent(format!("source {} has no file name", source.display())))?;
        return Ok(vec![(name, source.to_path_buf())]);
    }

    let mut files = Vec::new();
    let mut pending = vec![source.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| StageError::permanent(format!("cannot list {}: {e}", dir.display())))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StageError::permanent(format!("cannot list {}: {e}", dir.display())))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StageError::permanent(e.to_string()))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let relative = path
                    .strip_prefix(source)
                    .map_err(|e| StageError::permanent(e.to_string()))?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push((relative, path));
            }
        }
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    if files.is_empty() {
        return Err(StageError::permanent(format!(
            "source {} contains no files",
            source.display()
        )));
    }
    Ok(files)
}

#[async_trait]
impl Stage for PublishStage {
    fn name(&self) -> &str {
        "publish"
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutputs, StageError> {
        let inputs = ctx.inputs();
        let source = PathBuf::from(inputs.require_str("source")?);
        let name = inputs.require_str("model_name")?;
        let version = inputs.require_str("model_version")?;

        let prefix = self.destination(name, version);
        let artifact = self.store.locate(&prefix);
        let manifest_path = format!("{prefix}/{MANIFEST_FILE}");
        let files = collect_files(&source).await?;

        let mut entries = Vec::with_capacity(files.len());
        for (relative, path) in &files {
            let (sha256, size) = digest_file(path)
                .await
                .map_err(|e| StageError::permanent(format!("cannot read {}: {e}", path.display())))?;
            entries.push(ManifestEntry {
                path: relative.clone(),
                size,
                sha256,
            });
        }
        let total_bytes: u64 = entries.iter().map(|e| e.size).sum();

        if self.store.exists(&self.store.locate(&manifest_path)).await? {
            info!(location = %artifact.uri, "Artifact already published, skipping upload");
            return Ok(StageOutputs::new()
                .with("location", artifact.to_value())
                .with("files", entries.len())
                .with("bytes", total_bytes)
                .with("reused", true));
        }

        let mut options = PutOptions {
            sha256: None,
            metadata: self.metadata.clone(),
        }
        .with_metadata("model-name", name)
        .with_metadata("model-version", version)
        .with_metadata("upload-timestamp", iso_timestamp())
        .with_metadata("pipeline", ctx.identity().pipeline.as_str());

        let mut uploaded = 0usize;
        for ((relative, path), entry) in files.iter().zip(&entries) {
            if ctx.is_cancelled() {
                return Err(StageError::Cancelled(
                    ctx.cancellation().reason().unwrap_or_else(|| "cancelled".to_string()),
                ));
            }

            let object_path = format!("{prefix}/{relative}");
            let stored = self.store.digest(&self.store.locate(&object_path)).await?;
            if stored.as_deref() == Some(entry.sha256.as_str()) {
                debug!(path = %object_path, "Object already complete, skipping");
                continue;
            }

            let body = file_stream(path)
                .await
                .map_err(|e| StageError::permanent(format!("cannot open {}: {e}", path.display())))?;
            options.sha256 = Some(entry.sha256.clone());
            self.store.put_with(&object_path, body, &options).await?;
            uploaded += 1;
        }

        let manifest = PublishManifest {
            name: name.to_string(),
            version: version.to_string(),
            files: entries,
            total_bytes,
        };
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| StageError::permanent(e.to_string()))?;
        options.sha256 = None;
        self.store
            .put_with(&manifest_path, bytes_stream(manifest_bytes), &options)
            .await?;

        info!(
            location = %artifact.uri,
            files = manifest.files.len(),
            uploaded,
            bytes = total_bytes,
            "Published artifact"
        );
        Ok(StageOutputs::new()
            .with("location", artifact.to_value())
            .with("files", manifest.files.len())
            .with("bytes", total_bytes)
            .with("reused", false))
    }
}
