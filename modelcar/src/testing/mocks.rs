//! Scripted stages and instrumented stores for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::context::{StageContext, StageInputs};
use crate::core::{ArtifactLocation, StageOutputs, StorageKind};
use crate::errors::{StageError, StoreError};
use crate::stages::Stage;
use crate::store::{ArtifactStore, ByteStream, PutOptions};

#[derive(Debug, Clone)]
enum Step {
    Reply(Result<StageOutputs, StageError>),
    Hang,
}

/// A stage that replays a script of results, one per attempt.
///
/// Once the script is exhausted every further attempt succeeds with the
/// default outputs. Each call records the inputs and attempt number it saw.
#[derive(Debug)]
pub struct ScriptedStage {
    name: String,
    script: Mutex<VecDeque<Step>>,
    outputs: StageOutputs,
    calls: Mutex<Vec<(u32, StageInputs)>>,
}

impl ScriptedStage {
    /// Creates a stage that succeeds with no outputs.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            outputs: StageOutputs::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Adds a default output returned on success.
    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.outputs.insert(key, value);
        self
    }

    /// Appends a failing attempt.
    #[must_use]
    pub fn then_fail(self, error: StageError) -> Self {
        self.script.lock().push_back(Step::Reply(Err(error)));
        self
    }

    /// Appends `times` failing attempts.
    #[must_use]
    pub fn fail_times(self, times: usize, error: &StageError) -> Self {
        (0..times).fold(self, |stage, _| stage.then_fail(error.clone()))
    }

    /// Appends a successful attempt with specific outputs.
    #[must_use]
    pub fn then_succeed(self, outputs: StageOutputs) -> Self {
        self.script.lock().push_back(Step::Reply(Ok(outputs)));
        self
    }

    /// Appends an attempt that blocks until the run is cancelled.
    #[must_use]
    pub fn then_hang(self) -> Self {
        self.script.lock().push_back(Step::Hang);
        self
    }

    /// Returns the number of attempts made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the attempt numbers seen, in call order.
    #[must_use]
    pub fn attempts_seen(&self) -> Vec<u32> {
        self.calls.lock().iter().map(|(attempt, _)| *attempt).collect()
    }

    /// Returns the inputs of the most recent call.
    #[must_use]
    pub fn last_inputs(&self) -> Option<StageInputs> {
        self.calls.lock().last().map(|(_, inputs)| inputs.clone())
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutputs, StageError> {
        self.calls.lock().push((ctx.attempt(), ctx.inputs().clone()));
        let step = self.script.lock().pop_front();
        match step {
            Some(Step::Reply(result)) => result,
            Some(Step::Hang) => {
                ctx.cancellation().cancelled().await;
                Err(StageError::Cancelled(
                    ctx.cancellation().reason().unwrap_or_default(),
                ))
            }
            None => Ok(self.outputs.clone()),
        }
    }
}

/// A store wrapper whose first `failures` puts fail transiently.
///
/// Failed puts do not consume the stream, so nothing reaches the inner
/// store.
#[derive(Debug)]
pub struct FlakyArtifactStore {
    inner: Arc<dyn ArtifactStore>,
    remaining: AtomicUsize,
    path_filter: Option<String>,
}

impl FlakyArtifactStore {
    /// Wraps `inner`, failing the next `failures` puts.
    #[must_use]
    pub fn new(inner: Arc<dyn ArtifactStore>, failures: usize) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(failures),
            path_filter: None,
        }
    }

    /// Only fails puts whose path contains `fragment`.
    #[must_use]
    pub fn failing_on(mut self, fragment: impl Into<String>) -> Self {
        self.path_filter = Some(fragment.into());
        self
    }

    /// Returns the number of failures still to inject.
    #[must_use]
    pub fn failures_remaining(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    fn take_failure(&self, path: &str) -> bool {
        if self.path_filter.as_deref().is_some_and(|f| !path.contains(f)) {
            return false;
        }
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ArtifactStore for FlakyArtifactStore {
    fn kind(&self) -> StorageKind {
        self.inner.kind()
    }

    fn locate(&self, path: &str) -> ArtifactLocation {
        self.inner.locate(path)
    }

    async fn put_with(
        &self,
        path: &str,
        body: ByteStream,
        options: &PutOptions,
    ) -> Result<ArtifactLocation, StoreError> {
        if self.take_failure(path) {
            return Err(StoreError::transient(format!("injected failure writing {path}")));
        }
        self.inner.put_with(path, body, options).await
    }

    async fn exists(&self, location: &ArtifactLocation) -> Result<bool, StoreError> {
        self.inner.exists(location).await
    }

    async fn digest(&self, location: &ArtifactLocation) -> Result<Option<String>, StoreError> {
        self.inner.digest(location).await
    }
}

/// A store wrapper that records every put and counts existence and digest checks.
#[derive(Debug)]
pub struct CountingArtifactStore {
    inner: Arc<dyn ArtifactStore>,
    puts: Mutex<Vec<String>>,
    lookups: AtomicUsize,
}

impl CountingArtifactStore {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn ArtifactStore>) -> Self {
        Self {
            inner,
            puts: Mutex::new(Vec::new()),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Returns the number of completed puts.
    #[must_use]
    pub fn put_count(&self) -> usize {
        self.puts.lock().len()
    }

    /// Returns the paths of completed puts in order.
    #[must_use]
    pub fn put_paths(&self) -> Vec<String> {
        self.puts.lock().clone()
    }

    /// Returns the number of existence and digest checks.
    #[must_use]
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for CountingArtifactStore {
    fn kind(&self) -> StorageKind {
        self.inner.kind()
    }

    fn locate(&self, path: &str) -> ArtifactLocation {
        self.inner.locate(path)
    }

    async fn put_with(
        &self,
        path: &str,
        body: ByteStream,
        options: &PutOptions,
    ) -> Result<ArtifactLocation, StoreError> {
        let location = self.inner.put_with(path, body, options).await?;
        self.puts.lock().push(path.to_string());
        Ok(location)
    }

    async fn exists(&self, location: &ArtifactLocation) -> Result<bool, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.exists(location).await
    }

    async fn digest(&self, location: &ArtifactLocation) -> Result<Option<String>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.digest(location).await
    }
}
