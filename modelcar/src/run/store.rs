//! Persistence for run records.

use super::RunRecord;
use crate::errors::ModelcarError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Storage backend for run records.
#[async_trait]
pub trait RunStore: Send + Sync + Debug {
    /// Saves (or replaces) a run record.
    async fn save(&self, record: &RunRecord) -> Result<(), ModelcarError>;

    /// Loads a run record by ID.
    async fn load(&self, id: Uuid) -> Result<Option<RunRecord>, ModelcarError>;

    /// Lists stored run IDs.
    async fn list(&self) -> Result<Vec<Uuid>, ModelcarError>;
}

/// In-memory run store.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    records: Arc<Mutex<HashMap<Uuid, RunRecord>>>,
}

impl InMemoryRunStore {
    /// Creates a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(&self, record: &RunRecord) -> Result<(), ModelcarError> {
        self.records.lock().insert(record.id, record.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<RunRecord>, ModelcarError> {
        Ok(self.records.lock().get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Uuid>, ModelcarError> {
        let mut ids: Vec<Uuid> = self.records.lock().keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Stores each run as `{dir}/{run_id}.json`.
///
/// Records are written to a temporary file and renamed into place so a
/// reader never sees a partial record.
#[derive(Debug, Clone)]
pub struct JsonFileRunStore {
    dir: PathBuf,
}

impl JsonFileRunStore {
    /// Creates a store in `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the path of a run's record.
    #[must_use]
    pub fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Reads a record from an arbitrary file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn read_file(path: impl AsRef<Path>) -> Result<RunRecord, ModelcarError> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(RunRecord::from_json(&json)?)
    }
}

#[async_trait]
impl RunStore for JsonFileRunStore {
    async fn save(&self, record: &RunRecord) -> Result<(), ModelcarError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(record.id);
        let tmp = self.dir.join(format!(".{}.tmp", record.id));
        tokio::fs::write(&tmp, record.to_json()?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(run_id = %record.id, path = %path.display(), "Saved run record");
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<RunRecord>, ModelcarError> {
        match tokio::fs::read_to_string(self.path_for(id)).await {
            Ok(json) => Ok(Some(RunRecord::from_json(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<Uuid>, ModelcarError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".json").and_then(|s| Uuid::parse_str(s).ok()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunState;
    use crate::run::{Run, StageResult};
    use crate::utils::{generate_run_id, now_utc};
    use std::collections::BTreeMap;

    fn record() -> RunRecord {
        Run {
            id: generate_run_id(),
            pipeline: "delivery".into(),
            parameters: BTreeMap::new(),
            parameter_hash: "h".into(),
            state: RunState::Succeeded,
            stages: vec![StageResult::new("download")],
            failure: None,
            location: None,
            registration: None,
            cancel_reason: None,
            started_at: now_utc(),
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryRunStore::new();
        let rec = record();
        store.save(&rec).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.load(rec.id).await.unwrap(), Some(rec.clone()));
        assert_eq!(store.list().await.unwrap(), vec![rec.id]);
    }

    #[tokio::test]
    async fn test_json_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileRunStore::new(dir.path().join("runs"));
        assert!(store.list().await.unwrap().is_empty());

        let rec = record();
        store.save(&rec).await.unwrap();
        store.save(&rec).await.unwrap();

        assert_eq!(store.list().await.unwrap(), vec![rec.id]);
        assert_eq!(store.load(rec.id).await.unwrap(), Some(rec.clone()));
        assert_eq!(
            JsonFileRunStore::read_file(store.path_for(rec.id)).await.unwrap(),
            rec
        );
        assert!(store.load(generate_run_id()).await.unwrap().is_none());
    }
}
