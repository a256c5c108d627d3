//! In-memory artifact store.

use super::{normalize_path, ArtifactStore, ByteStream, PutOptions};
use crate::core::{ArtifactLocation, StorageKind};
use crate::errors::StoreError;
use crate::utils::sha256_hex;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::TryStreamExt;
use std::collections::BTreeMap;

#[derive(Debug)]
struct StoredObject {
    data: Vec<u8>,
    metadata: BTreeMap<String, String>,
}

/// An object store held in memory, addressed like an S3 bucket.
///
/// Objects become visible only after their stream has been fully read, so
/// a failed upload leaves nothing behind.
#[derive(Debug)]
pub struct InMemoryArtifactStore {
    bucket: String,
    objects: DashMap<String, StoredObject>,
}

impl Default for InMemoryArtifactStore {
    fn default() -> Self {
        Self::new("models")
    }
}

impl InMemoryArtifactStore {
    /// Creates an empty store for `bucket`.
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: DashMap::new(),
        }
    }

    /// Returns a copy of the object stored at `path`.
    #[must_use]
    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        let key = normalize_path(path).ok()?;
        self.objects.get(&key).map(|entry| entry.data.clone())
    }

    /// Returns the metadata stored with the object at `path`.
    #[must_use]
    pub fn metadata(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let key = normalize_path(path).ok()?;
        self.objects.get(&key).map(|entry| entry.metadata.clone())
    }

    /// Returns the stored keys in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn key_for(&self, location: &ArtifactLocation) -> Option<String> {
        let prefix = format!("s3://{}/", self.bucket);
        location.uri.strip_prefix(&prefix).map(str::to_string)
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    fn kind(&self) -> StorageKind {
        StorageKind::S3
    }

    fn locate(&self, path: &str) -> ArtifactLocation {
        let key = normalize_path(path).unwrap_or_else(|_| path.to_string());
        ArtifactLocation::new(format!("s3://{}/{}", self.bucket, key), StorageKind::S3)
    }

    async fn put_with(
        &self,
        path: &str,
        body: ByteStream,
        options: &PutOptions,
    ) -> Result<ArtifactLocation, StoreError> {
        let key = normalize_path(path)?;
        let chunks: Vec<Vec<u8>> = body.try_collect().await?;
        self.objects.insert(
            key.clone(),
            StoredObject {
                data: chunks.concat(),
                metadata: options.metadata.clone(),
            },
        );
        Ok(self.locate(&key))
    }

    async fn exists(&self, location: &ArtifactLocation) -> Result<bool, StoreError> {
        Ok(self
            .key_for(location)
            .is_some_and(|key| self.objects.contains_key(&key)))
    }

    async fn digest(&self, location: &ArtifactLocation) -> Result<Option<String>, StoreError> {
        Ok(self
            .key_for(location)
            .and_then(|key| self.objects.get(&key).map(|entry| sha256_hex(&entry.data))))
    }
}
