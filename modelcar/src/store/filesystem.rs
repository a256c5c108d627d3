//! Local filesystem artifact store.

use super::{digest_file, normalize_path, ArtifactStore, ByteStream, PutOptions};
use crate::core::{ArtifactLocation, StorageKind};
use crate::errors::StoreError;
use async_trait::async_trait;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

const MARKER_SUFFIX: &str = ".sha256";

/// Stores artifacts as files under a root directory.
///
/// Uploads are written to a temporary sibling, renamed into place and then
/// sealed with a `.sha256` marker. An object without a marker, or whose
/// content no longer matches it, does not exist. Object metadata is not
/// kept.
#[derive(Debug, Clone)]
pub struct FilesystemArtifactStore {
    root: PathBuf,
}

impl FilesystemArtifactStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |acc, seg| acc.join(seg))
    }

    fn key_for(&self, location: &ArtifactLocation) -> Option<String> {
        let prefix = format!("file://{}/", self.root.display().to_string().trim_end_matches('/'));
        location.uri.strip_prefix(&prefix).map(str::to_string)
    }
}

fn marker_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(MARKER_SUFFIX);
    PathBuf::from(name)
}

async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}

#[async_trait]
impl ArtifactStore for FilesystemArtifactStore {
    fn kind(&self) -> StorageKind {
        StorageKind::File
    }

    fn locate(&self, path: &str) -> ArtifactLocation {
        let key = normalize_path(path).unwrap_or_else(|_| path.to_string());
        ArtifactLocation::new(
            format!(
                "file://{}/{}",
                self.root.display().to_string().trim_end_matches('/'),
                key
            ),
            StorageKind::File,
        )
    }

    async fn put_with(
        &self,
        path: &str,
        mut body: ByteStream,
        _options: &PutOptions,
    ) -> Result<ArtifactLocation, StoreError> {
        let key = normalize_path(path)?;
        let target = self.path_for(&key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial = target.with_extension(format!("partial-{}", uuid::Uuid::new_v4().simple()));
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut hasher = Sha256::new();

        let written: Result<(), StoreError> = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                hasher.update(&chunk);
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = written {
            drop(file);
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err);
        }
        drop(file);

        tokio::fs::rename(&partial, &target).await?;
        write_atomic(&marker_path(&target), hex::encode(hasher.finalize()).as_bytes()).await?;

        debug!(path = %target.display(), "Stored artifact object");
        Ok(self.locate(&key))
    }

    async fn exists(&self, location: &ArtifactLocation) -> Result<bool, StoreError> {
        Ok(self.digest(location).await?.is_some())
    }

    async fn digest(&self, location: &ArtifactLocation) -> Result<Option<String>, StoreError> {
        let Some(key) = self.key_for(location) else {
            return Ok(None);
        };
        let target = self.path_for(&key);

        let expected = match tokio::fs::read_to_string(marker_path(&target)).await {
            Ok(digest) => digest.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match digest_file(&target).await {
            Ok((actual, _)) if actual == expected => Ok(Some(actual)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
