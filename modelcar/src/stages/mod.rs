//! Stage trait and built-in stage bodies.
//!
//! A stage body is the unit of work behind a `StageSpec`. The executor
//! hands it a read-only [`StageContext`] and records whatever it returns;
//! bodies never touch run state directly.

mod command;
mod publish;

pub use command::{CommandConfig, CommandStage};
pub use publish::{ManifestEntry, PublishManifest, PublishStage, DEFAULT_PREFIX_ROOT, MANIFEST_FILE};

use crate::context::StageContext;
use crate::core::StageOutputs;
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;

/// Trait for stage bodies.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns a short description of the body, used in logs.
    fn name(&self) -> &str;

    /// Runs one attempt.
    ///
    /// # Errors
    ///
    /// Returns `StageError::Transient` for failures worth retrying,
    /// `StageError::Permanent` otherwise, and `StageError::Cancelled` when
    /// the attempt was aborted through the context's cancellation token.
    async fn run(&self, ctx: &StageContext) -> Result<StageOutputs, StageError>;
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&StageContext) -> Result<StageOutputs, StageError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageContext) -> Result<StageOutputs, StageError> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageContext) -> Result<StageOutputs, StageError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageContext) -> Result<StageOutputs, StageError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutputs, StageError> {
        (self.func)(ctx)
    }
}

/// An async function-based stage.
///
/// The closure receives an owned clone of the context so the returned
/// future can be `'static`.
pub struct AsyncFnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageOutputs, StageError>> + Send,
{
    name: String,
    func: F,
    _phantom: std::marker::PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageOutputs, StageError>> + Send,
{
    /// Creates a new async function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncFnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageOutputs, StageError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> Stage for AsyncFnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageOutputs, StageError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutputs, StageError> {
        (self.func)(ctx.clone()).await
    }
}

/// A stage that does nothing and returns fixed outputs.
#[derive(Debug, Clone, Default)]
pub struct NoOpStage {
    name: String,
    outputs: StageOutputs,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outputs: StageOutputs::new(),
        }
    }

    /// Adds a fixed output value.
    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.outputs.insert(key, value);
        self
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &StageContext) -> Result<StageOutputs, StageError> {
        Ok(self.outputs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StageInputs;

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("echo", |ctx| {
            let source = ctx.inputs().require_str("source")?;
            Ok(StageOutputs::single("echoed", source))
        });
        assert_eq!(stage.name(), "echo");

        let ctx = StageContext::standalone("echo", StageInputs::default().with("source", "/m"));
        let outputs = stage.run(&ctx).await.unwrap();
        assert_eq!(outputs.get_str("echoed"), Some("/m"));

        let empty = StageContext::standalone("echo", StageInputs::default());
        assert!(matches!(stage.run(&empty).await, Err(StageError::Permanent(_))));
    }

    #[tokio::test]
    async fn test_async_fn_stage() {
        let stage = AsyncFnStage::new("attempt", |ctx: StageContext| async move {
            Ok(StageOutputs::single("attempt", ctx.attempt()))
        });

        let ctx = StageContext::standalone("attempt", StageInputs::default());
        let outputs = stage.run(&ctx).await.unwrap();
        assert_eq!(outputs.get("attempt"), Some(&serde_json::json!(1)));
    }

    #[tokio::test]
    async fn test_noop_stage() {
        let stage = NoOpStage::new("noop").with_output("model_dir", "/work/m");
        assert_eq!(stage.name(), "noop");

        let ctx = StageContext::standalone("noop", StageInputs::default());
        let outputs = stage.run(&ctx).await.unwrap();
        assert_eq!(outputs.get_str("model_dir"), Some("/work/m"));
    }
}
