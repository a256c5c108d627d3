//! Artifact stores: uniform access to publish destinations.
//!
//! A store maps a deterministic destination path (for example
//! `model-data/{name}/{version}/config.json`) to an [`ArtifactLocation`]
//! and writes byte streams there. `exists` only reports objects whose
//! upload completed, so an interrupted transfer is never mistaken for a
//! published artifact. `digest` reports what a complete object holds, so a
//! resumed upload can tell a current object from a stale one.

mod filesystem;
mod memory;
#[cfg(feature = "http")]
mod s3;

pub use filesystem::FilesystemArtifactStore;
pub use memory::InMemoryArtifactStore;
#[cfg(feature = "http")]
pub use s3::S3ArtifactStore;

use crate::core::{ArtifactLocation, StorageKind};
use crate::errors::StoreError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// A stream of byte chunks to upload.
pub type ByteStream = BoxStream<'static, std::io::Result<Vec<u8>>>;

const READ_CHUNK: usize = 64 * 1024;

/// Per-object settings for an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Hex SHA-256 of the body, when the caller already computed it.
    pub sha256: Option<String>,
    /// User metadata stored alongside the object.
    pub metadata: BTreeMap<String, String>,
}

impl PutOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the expected SHA-256 digest.
    #[must_use]
    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Uniform interface to a content destination.
#[async_trait]
pub trait ArtifactStore: Send + Sync + Debug {
    /// Returns the storage kind of locations produced by this store.
    fn kind(&self) -> StorageKind;

    /// Maps a destination path to its location without touching storage.
    fn locate(&self, path: &str) -> ArtifactLocation;

    /// Uploads `body` to `path` with `options` and returns its location.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Transient` for retryable failures and
    /// `StoreError::Permanent` otherwise.
    async fn put_with(
        &self,
        path: &str,
        body: ByteStream,
        options: &PutOptions,
    ) -> Result<ArtifactLocation, StoreError>;

    /// Uploads `body` to `path` without options.
    ///
    /// # Errors
    ///
    /// See [`ArtifactStore::put_with`].
    async fn put(&self, path: &str, body: ByteStream) -> Result<ArtifactLocation, StoreError> {
        self.put_with(path, body, &PutOptions::default()).await
    }

    /// Returns true if a complete object exists at `location`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    async fn exists(&self, location: &ArtifactLocation) -> Result<bool, StoreError>;

    /// Returns the hex SHA-256 of the complete object at `location`.
    ///
    /// `None` means the object is missing, incomplete, or stored without a
    /// known digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    async fn digest(&self, location: &ArtifactLocation) -> Result<Option<String>, StoreError>;
}

/// Creates a byte stream over an in-memory buffer.
#[must_use]
pub fn bytes_stream(data: impl Into<Vec<u8>>) -> ByteStream {
    stream::once(futures::future::ready(Ok(data.into()))).boxed()
}

/// Opens a local file as a chunked byte stream.
///
/// # Errors
///
/// Returns an error if the file cannot be opened.
pub async fn file_stream(path: impl AsRef<Path>) -> std::io::Result<ByteStream> {
    let file = tokio::fs::File::open(path.as_ref()).await?;
    let stream = stream::try_unfold(file, |mut file| async move {
        let mut buf = vec![0u8; READ_CHUNK];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            Ok(None)
        } else {
            buf.truncate(n);
            Ok(Some((buf, file)))
        }
    });
    Ok(stream.boxed())
}

/// Returns the hex SHA-256 digest and size of a local file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub async fn digest_file(path: impl AsRef<Path>) -> std::io::Result<(String, u64)> {
    let mut file = tokio::fs::File::open(path.as_ref()).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), size))
}

/// Normalizes a destination path into a relative, `/`-separated key.
///
/// # Errors
///
/// Returns `StoreError::Permanent` for empty paths or paths escaping the
/// destination with `..`.
pub fn normalize_path(path: &str) -> Result<String, StoreError> {
    let segments: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    if segments.is_empty() {
        return Err(StoreError::permanent("destination path is empty"));
    }
    if segments.iter().any(|s| *s == "..") {
        return Err(StoreError::permanent(format!(
            "destination path '{path}' escapes the store root"
        )));
    }
    Ok(segments.join("/"))
}
