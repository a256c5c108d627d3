//! In-memory registry.

use super::{resolve_existing, RegistrationOutcome, RegistrationRecord, RegistrationRequest, RegistryClient};
use crate::errors::RegistryError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// A registry held in memory.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    records: DashMap<(String, String), RegistrationRecord>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    async fn register(&self, request: &RegistrationRequest) -> Result<RegistrationOutcome, RegistryError> {
        request.validate()?;
        let key = (request.name.clone(), request.version.clone());
        match self.records.entry(key) {
            Entry::Occupied(entry) => resolve_existing(entry.get().clone(), request),
            Entry::Vacant(entry) => {
                let record = request.clone().into_record();
                entry.insert(record.clone());
                Ok(RegistrationOutcome {
                    record,
                    created: true,
                })
            }
        }
    }

    async fn lookup(&self, name: &str, version: &str) -> Result<Option<RegistrationRecord>, RegistryError> {
        Ok(self
            .records
            .get(&(name.to_string(), version.to_string()))
            .map(|r| r.value().clone()))
    }
}
