//! Sequential, fail-fast pipeline executor.
//!
//! The executor drives one [`Run`] per call to [`Executor::run`]. Stages run
//! strictly in declaration order on the calling task; each stage is either
//! skipped, reused from a previous run record, or executed with its retry
//! policy and per-attempt timeout. Registration is the final step and is
//! recorded as a stage result of its own.

use super::condition::Condition;
use super::retry::{RetryDecision, RetryPolicy};
use super::spec::{InputSource, PipelineDefinition, RegistrationSpec, StageSpec};
use super::validation::validate_with_disabled;
use crate::cancellation::CancellationToken;
use crate::context::{RunIdentity, StageContext, StageInputs};
use crate::core::{ArtifactLocation, RunState, StageOutputs, StageState};
use crate::errors::{
    ContractErrorInfo, ErrorKind, ErrorSummary, ModelcarError, PipelineValidationError,
    RegistryError, StageError,
};
use crate::events::{event_types, EventSink, NoOpEventSink};
use crate::registry::{RegistrationOutcome, RegistrationRequest, RegistryClient};
use crate::run::{AttemptOutcome, AttemptRecord, Run, RunFailure, RunRequest, RunStore, StageResult};
use crate::utils::{generate_run_id, hash_parameters, now_utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Error raised by one attempt of a stage body or of the registry call.
#[derive(Debug)]
enum AttemptError {
    Stage(StageError),
    Registry(RegistryError),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Stage(e) => e.is_retryable(),
            Self::Registry(e) => e.is_retryable(),
        }
    }

    fn cancellation_reason(&self) -> Option<&str> {
        match self {
            Self::Stage(StageError::Cancelled(reason)) => Some(reason),
            _ => None,
        }
    }

    fn summary(&self) -> ErrorSummary {
        match self {
            Self::Stage(e) => e.into(),
            Self::Registry(e) => e.into(),
        }
    }

    fn outcome(&self) -> AttemptOutcome {
        match self {
            Self::Stage(StageError::TimedOut { timeout_ms }) => AttemptOutcome::TimedOut {
                timeout_ms: *timeout_ms,
            },
            Self::Stage(StageError::Cancelled(reason)) => AttemptOutcome::Cancelled {
                reason: reason.clone(),
            },
            other => AttemptOutcome::Failed {
                error: other.summary(),
            },
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage(e) => e.fmt(f),
            Self::Registry(e) => e.fmt(f),
        }
    }
}

/// How a stage's attempt loop ended.
enum Attempted<T> {
    Succeeded(T),
    Failed(ErrorSummary),
    Cancelled(String),
}

/// Drives pipeline runs.
///
/// An executor is cheap to clone and may drive any number of concurrent
/// runs; the only shared state is the registry client, the event sink and
/// the run store.
#[derive(Clone)]
pub struct Executor {
    registry: Option<Arc<dyn RegistryClient>>,
    sink: Arc<dyn EventSink>,
    run_store: Option<Arc<dyn RunStore>>,
}

impl Default for Executor {
    fn default() -> Self {
        Self {
            registry: None,
            sink: Arc::new(NoOpEventSink),
            run_store: None,
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("registry", &self.registry)
            .field("run_store", &self.run_store)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Creates an executor without a registry, events or persistence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the registry client used by the registration step.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<dyn RegistryClient>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Persists run records to `store` after every stage.
    #[must_use]
    pub fn with_run_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.run_store = Some(store);
        self
    }

    /// Executes `def` for `request`.
    ///
    /// Validation, parameter and resume errors are returned before any stage
    /// runs. Once started, the run always comes back as `Ok`: a failed or
    /// cancelled run is reported through [`Run::state`] and [`Run::failure`].
    ///
    /// # Errors
    ///
    /// Returns `ModelcarError::Validation` if the definition, parameters or
    /// resume record are rejected.
    pub async fn run(
        &self,
        def: &PipelineDefinition,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> Result<Run, ModelcarError> {
        let run_id = generate_run_id();
        let span = info_span!("run", run_id = %run_id, pipeline = %def.name);
        self.run_inner(run_id, def, request, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        def: &PipelineDefinition,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> Result<Run, ModelcarError> {
        validate_with_disabled(def, &request.disabled)?;
        if def.registration.is_some() && self.registry.is_none() {
            return Err(run_error(
                "RUN-002-NO_REGISTRY",
                format!("Pipeline '{}' registers its artifact but no registry is configured", def.name),
                "Configure a registry backend for the executor.",
            )
            .into());
        }

        let parameters = def
            .resolve_parameters(&request.parameters)
            .map_err(PipelineValidationError::from)?;
        let parameter_hash = hash_parameters(&parameters);

        if let Some(previous) = &request.resume_from {
            check_resume(def, previous, &parameter_hash)?;
        }

        let mut stages: Vec<StageResult> = def.stages.iter().map(|s| StageResult::new(&s.name)).collect();
        if let Some(registration) = &def.registration {
            stages.push(StageResult::new(&registration.stage_name));
        }

        let mut run = Run {
            id: run_id,
            pipeline: def.name.clone(),
            parameters,
            parameter_hash,
            state: RunState::Running,
            stages,
            failure: None,
            location: None,
            registration: None,
            cancel_reason: None,
            started_at: now_utc(),
            finished_at: None,
        };

        info!(stages = def.stages.len(), "Run started");
        self.emit(
            event_types::RUN_STARTED,
            json!({
                "run_id": run.id,
                "pipeline": run.pipeline,
                "parameter_hash": run.parameter_hash,
                "resumed_from": request.resume_from.as_ref().map(|r| r.id),
            }),
        )
        .await;
        self.persist(&run).await;

        let parameters = Arc::new(run.parameters.clone());

        for (index, spec) in def.stages.iter().enumerate() {
            if cancel.is_cancelled() {
                let reason = cancel.reason().unwrap_or_default();
                return Ok(self.finish_cancelled(run, reason).await);
            }

            if request.disabled.contains(&spec.name) {
                self.skip(&mut run, index, "disabled by run request".to_string()).await;
                continue;
            }

            if let Some(expression) = &spec.condition {
                let condition = Condition::parse(expression).map_err(|e| {
                    run_error(
                        "DEF-007-CONDITION",
                        format!("Stage '{}' has an invalid condition: {e}", spec.name),
                        "Fix the condition expression.",
                    )
                })?;
                if !condition.evaluate(|source| lookup(&run, source)) {
                    self.skip(&mut run, index, format!("condition '{expression}' evaluated to false"))
                        .await;
                    continue;
                }
            }

            if let Some(previous) = request
                .resume_from
                .as_ref()
                .and_then(|r| r.stage(&spec.name))
                .filter(|s| s.state == StageState::Succeeded)
            {
                run.stages[index].reuse(previous);
                info!(stage = %spec.name, "Reusing outputs from previous run");
                self.emit(
                    event_types::STAGE_REUSED,
                    json!({ "run_id": run.id, "stage": spec.name }),
                )
                .await;
                self.persist(&run).await;
                continue;
            }

            let outcome = match collect_inputs(&run, spec) {
                Ok(inputs) => self.execute_stage(&mut run, index, spec, inputs, &parameters, cancel).await,
                Err(e) => Attempted::Failed((&e).into()),
            };

            match outcome {
                Attempted::Succeeded(outputs) => {
                    let result = &mut run.stages[index];
                    result.succeed(outputs);
                    info!(stage = %spec.name, attempts = result.attempt_count(), "Stage succeeded");
                    self.emit(
                        event_types::STAGE_SUCCEEDED,
                        json!({
                            "run_id": run.id,
                            "stage": spec.name,
                            "attempts": result.attempt_count(),
                        }),
                    )
                    .await;
                    self.persist(&run).await;
                }
                Attempted::Failed(summary) => {
                    return Ok(self.finish_failed(run, index, summary).await);
                }
                Attempted::Cancelled(reason) => {
                    self.cancel_stage(&mut run, index, &reason).await;
                    return Ok(self.finish_cancelled(run, reason).await);
                }
            }
        }

        run.location = final_location(def, &run);

        if let (Some(registration), Some(registry)) = (&def.registration, &self.registry) {
            if cancel.is_cancelled() {
                let reason = cancel.reason().unwrap_or_default();
                return Ok(self.finish_cancelled(run, reason).await);
            }
            let index = def.stages.len();
            match self.register(&mut run, index, registration, registry, cancel).await {
                Attempted::Succeeded(outcome) => {
                    let result = &mut run.stages[index];
                    result.succeed(
                        StageOutputs::new()
                            .with("record_id", outcome.record.id.to_string())
                            .with("created", outcome.created),
                    );
                    info!(
                        model = %outcome.record.name,
                        version = %outcome.record.version,
                        created = outcome.created,
                        "Registered artifact"
                    );
                    self.emit(
                        event_types::RUN_REGISTERED,
                        json!({
                            "run_id": run.id,
                            "record_id": outcome.record.id,
                            "uri": outcome.record.location.uri,
                            "created": outcome.created,
                        }),
                    )
                    .await;
                    run.location = Some(outcome.record.location.clone());
                    run.registration = Some(outcome.record);
                }
                Attempted::Failed(summary) => {
                    return Ok(self.finish_failed(run, index, summary).await);
                }
                Attempted::Cancelled(reason) => {
                    self.cancel_stage(&mut run, index, &reason).await;
                    return Ok(self.finish_cancelled(run, reason).await);
                }
            }
        }

        run.state = if run.count_in(StageState::Skipped) > 0 {
            RunState::PartiallySkipped
        } else {
            RunState::Succeeded
        };
        Ok(self.finish(run).await)
    }

    async fn execute_stage(
        &self,
        run: &mut Run,
        index: usize,
        spec: &StageSpec,
        inputs: StageInputs,
        parameters: &Arc<BTreeMap<String, Value>>,
        cancel: &CancellationToken,
    ) -> Attempted<StageOutputs> {
        let run_id = run.id;
        let pipeline = run.pipeline.clone();
        let result = &mut run.stages[index];

        self.attempt_loop(result, run_id, &spec.retry, spec.timeout, cancel, |attempt| {
            let ctx = StageContext::new(
                RunIdentity::new(run_id, pipeline.clone(), spec.name.clone()).with_attempt(attempt),
                inputs.clone(),
                Arc::clone(parameters),
                cancel.clone(),
            );
            let body = Arc::clone(&spec.body);
            async move {
                let outputs = body.run(&ctx).await.map_err(AttemptError::Stage)?;
                if let Some(missing) = spec.outputs.iter().find(|o| !outputs.contains(o)) {
                    return Err(AttemptError::Stage(StageError::permanent(format!(
                        "stage did not produce declared output '{missing}'"
                    ))));
                }
                Ok(outputs)
            }
        })
        .await
    }

    async fn register(
        &self,
        run: &mut Run,
        index: usize,
        registration: &RegistrationSpec,
        registry: &Arc<dyn RegistryClient>,
        cancel: &CancellationToken,
    ) -> Attempted<RegistrationOutcome> {
        let request = match registration_request(run, registration) {
            Ok(request) => request,
            Err(e) => return Attempted::Failed((&e).into()),
        };
        let run_id = run.id;
        let result = &mut run.stages[index];

        self.attempt_loop(
            result,
            run_id,
            &registration.retry,
            registration.timeout,
            cancel,
            |_| {
                let registry = Arc::clone(registry);
                let request = request.clone();
                async move { registry.register(&request).await.map_err(AttemptError::Registry) }
            },
        )
        .await
    }

    /// Runs attempts until success, a permanent error, an exhausted budget
    /// or cancellation. Attempt records and backoffs are appended to `result`.
    async fn attempt_loop<T, F, Fut>(
        &self,
        result: &mut StageResult,
        run_id: Uuid,
        retry: &RetryPolicy,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
        mut attempt_fn: F,
    ) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let stage = result.name.clone();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            result.begin();
            debug!(stage = %stage, attempt, "Stage attempt started");
            self.emit(
                event_types::STAGE_STARTED,
                json!({ "run_id": run_id, "stage": stage, "attempt": attempt }),
            )
            .await;

            let started_at = now_utc();
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, attempt_fn(attempt)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(AttemptError::Stage(StageError::TimedOut {
                        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    })),
                },
                None => attempt_fn(attempt).await,
            };
            let finished_at = now_utc();

            let err = match outcome {
                Ok(value) => {
                    result.push_attempt(AttemptRecord {
                        attempt,
                        started_at,
                        finished_at,
                        outcome: AttemptOutcome::Succeeded,
                        backoff_ms: None,
                    });
                    return Attempted::Succeeded(value);
                }
                Err(err) => err,
            };

            result.push_attempt(AttemptRecord {
                attempt,
                started_at,
                finished_at,
                outcome: err.outcome(),
                backoff_ms: None,
            });

            if let Some(reason) = err.cancellation_reason() {
                return Attempted::Cancelled(reason.to_string());
            }

            warn!(stage = %stage, attempt, error = %err, "Stage attempt failed");
            self.emit(
                event_types::STAGE_ATTEMPT_FAILED,
                json!({
                    "run_id": run_id,
                    "stage": stage,
                    "attempt": attempt,
                    "error": err.summary(),
                }),
            )
            .await;

            if cancel.is_cancelled() {
                return Attempted::Cancelled(cancel.reason().unwrap_or_default());
            }

            match retry.decide_for(attempt, err.is_retryable()) {
                RetryDecision::Retry(delay) => {
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    result.set_last_backoff(delay_ms);
                    info!(stage = %stage, attempt, delay_ms, "Retrying stage after backoff");
                    self.emit(
                        event_types::STAGE_RETRYING,
                        json!({
                            "run_id": run_id,
                            "stage": stage,
                            "attempt": attempt,
                            "delay_ms": delay_ms,
                        }),
                    )
                    .await;

                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.cancelled() => {
                            return Attempted::Cancelled(cancel.reason().unwrap_or_default());
                        }
                    }
                }
                RetryDecision::GiveUp | RetryDecision::NotRetryable => {
                    return Attempted::Failed(err.summary());
                }
            }
        }
    }

    async fn skip(&self, run: &mut Run, index: usize, reason: String) {
        let result = &mut run.stages[index];
        info!(stage = %result.name, reason = %reason, "Stage skipped");
        let event = json!({ "run_id": run.id, "stage": result.name, "reason": reason });
        result.skip(reason);
        self.emit(event_types::STAGE_SKIPPED, event).await;
        self.persist(run).await;
    }

    async fn cancel_stage(&self, run: &mut Run, index: usize, reason: &str) {
        let result = &mut run.stages[index];
        result.cancel(ErrorSummary::new(ErrorKind::Cancelled, reason));
        warn!(stage = %result.name, reason, "Stage cancelled");
        self.emit(
            event_types::STAGE_CANCELLED,
            json!({ "run_id": run.id, "stage": result.name, "reason": reason }),
        )
        .await;
    }

    async fn finish_failed(&self, mut run: Run, index: usize, summary: ErrorSummary) -> Run {
        let result = &mut run.stages[index];
        result.fail(summary.clone());
        let failure = RunFailure {
            stage: result.name.clone(),
            attempts: result.attempt_count(),
            error: summary,
        };
        error!(
            stage = %failure.stage,
            attempts = failure.attempts,
            error = %failure.error,
            "Stage failed, stopping run"
        );
        self.emit(
            event_types::STAGE_FAILED,
            json!({
                "run_id": run.id,
                "stage": failure.stage,
                "attempts": failure.attempts,
                "error": failure.error,
            }),
        )
        .await;
        run.failure = Some(failure);
        run.state = RunState::Failed;
        self.finish(run).await
    }

    async fn finish_cancelled(&self, mut run: Run, reason: String) -> Run {
        warn!(reason = %reason, "Run cancelled");
        run.state = RunState::Cancelled;
        run.cancel_reason = Some(reason);
        self.finish(run).await
    }

    async fn finish(&self, mut run: Run) -> Run {
        run.finished_at = Some(now_utc());
        info!(state = %run.state, "{}", run.summary());
        self.emit(
            event_types::RUN_COMPLETED,
            json!({
                "run_id": run.id,
                "state": run.state,
                "failure": run.failure,
                "location": run.location,
            }),
        )
        .await;
        self.persist(&run).await;
        run
    }

    async fn emit(&self, event_type: &str, data: Value) {
        self.sink.emit(event_type, Some(data)).await;
    }

    async fn persist(&self, run: &Run) {
        if let Some(store) = &self.run_store {
            if let Err(e) = store.save(run).await {
                warn!(error = %e, "Failed to persist run record");
            }
        }
    }
}

fn run_error(code: &str, message: String, hint: &str) -> PipelineValidationError {
    PipelineValidationError::new(message.clone())
        .with_error_info(ContractErrorInfo::new(code, message).with_fix_hint(hint))
}

fn check_resume(
    def: &PipelineDefinition,
    previous: &Run,
    parameter_hash: &str,
) -> Result<(), PipelineValidationError> {
    if previous.pipeline != def.name {
        return Err(run_error(
            "RUN-001-RESUME_MISMATCH",
            format!(
                "Run {} belongs to pipeline '{}', not '{}'",
                previous.id, previous.pipeline, def.name
            ),
            "Resume from a run record of the same pipeline.",
        ));
    }
    if previous.parameter_hash != parameter_hash {
        return Err(run_error(
            "RUN-001-RESUME_MISMATCH",
            format!("Run {} was started with different parameters", previous.id),
            "Pass the same parameters as the run being resumed, or start a fresh run.",
        ));
    }
    Ok(())
}

/// Reads a source from the resolved parameters or a succeeded stage's outputs.
fn lookup(run: &Run, source: &InputSource) -> Option<Value> {
    match source {
        InputSource::Parameter(name) => run.parameters.get(name).cloned(),
        InputSource::Output { stage, output } => run
            .stage(stage)
            .filter(|s| s.state == StageState::Succeeded)
            .and_then(|s| s.outputs.get(output))
            .cloned(),
    }
}

fn collect_inputs(run: &Run, spec: &StageSpec) -> Result<StageInputs, StageError> {
    let mut values = BTreeMap::new();
    for binding in &spec.inputs {
        match binding.sources.iter().find_map(|source| lookup(run, source)) {
            Some(value) => {
                values.insert(binding.name.clone(), value);
            }
            None if binding.required => {
                return Err(StageError::permanent(format!(
                    "required input '{}' has no value",
                    binding.name
                )));
            }
            None => {}
        }
    }
    Ok(StageInputs::new(values))
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn registration_request(
    run: &Run,
    registration: &RegistrationSpec,
) -> Result<RegistrationRequest, StageError> {
    let require = |field: &str, source: &InputSource| {
        lookup(run, source).ok_or_else(|| {
            StageError::permanent(format!("registration {field} source '{source}' has no value"))
        })
    };

    let mut name = value_as_string(&require("model_name", &registration.model_name)?);
    if registration.lowercase_name {
        name = name.to_lowercase();
    }
    let version = value_as_string(&require("version", &registration.version)?);
    let location_value = require("location", &registration.location)?;
    let location = ArtifactLocation::from_value(&location_value).ok_or_else(|| {
        StageError::permanent(format!(
            "registration location source '{}' is not an artifact location",
            registration.location
        ))
    })?;

    let mut request = RegistrationRequest::new(name, version, location).with_run_id(run.id);
    let bound = registration
        .metadata_bindings
        .iter()
        .filter_map(|(key, source)| lookup(run, source).map(|value| (key.clone(), value)));
    for (key, value) in registration.metadata.clone().into_iter().chain(bound) {
        request.metadata.entry(key).or_insert(value);
    }
    Ok(request)
}

/// The registered location, or the last `location` output of a succeeded stage.
fn final_location(def: &PipelineDefinition, run: &Run) -> Option<ArtifactLocation> {
    if let Some(registration) = &def.registration {
        return lookup(run, &registration.location).and_then(|v| ArtifactLocation::from_value(&v));
    }
    run.stages
        .iter()
        .rev()
        .filter(|s| s.state == StageState::Succeeded)
        .find_map(|s| s.outputs.get("location").and_then(ArtifactLocation::from_value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::pipeline::spec::{InputBinding, ParamType, ParameterSpec};
    use crate::pipeline::PipelineBuilder;
    use crate::registry::InMemoryRegistry;
    use crate::stages::{FnStage, NoOpStage};
    use pretty_assertions::assert_eq;

    fn noop(name: &str) -> Arc<dyn crate::stages::Stage> {
        Arc::new(NoOpStage::new(name))
    }

    #[tokio::test]
    async fn test_single_stage_succeeds() {
        let def = PipelineBuilder::new("single")
            .stage(StageSpec::new("only", noop("only")))
            .build();

        let run = Executor::new()
            .run(&def, RunRequest::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.state, RunState::Succeeded);
        assert_eq!(run.stage("only").unwrap().attempt_count(), 1);
        assert!(run.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_inputs_fall_back_to_later_sources() {
        let def = PipelineBuilder::new("fallback")
            .parameter(ParameterSpec::optional("dir", ParamType::String).with_default("/tmp/default"))
            .stage(
                StageSpec::new("maybe", Arc::new(NoOpStage::new("maybe").with_output("dir", "/tmp/maybe")))
                    .with_output("dir")
                    .with_condition("false"),
            )
            .stage(
                StageSpec::new(
                    "consume",
                    Arc::new(FnStage::new("consume", |ctx| {
                        Ok(StageOutputs::single("seen", ctx.inputs().require_str("dir")?))
                    })),
                )
                .with_input(InputBinding::required("dir", "maybe.dir").or("dir"))
                .with_output("seen"),
            )
            .build();

        let run = Executor::new()
            .run(&def, RunRequest::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.state, RunState::PartiallySkipped);
        assert_eq!(
            run.stage("consume").unwrap().outputs.get_str("seen"),
            Some("/tmp/default")
        );
    }

    #[tokio::test]
    async fn test_missing_declared_output_is_permanent() {
        let def = PipelineBuilder::new("outputs")
            .stage(StageSpec::new("forgetful", noop("forgetful")).with_output("model_dir"))
            .build();

        let run = Executor::new()
            .run(&def, RunRequest::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.state, RunState::Failed);
        let failure = run.failure.unwrap();
        assert_eq!(failure.stage, "forgetful");
        assert_eq!(failure.attempts, 1);
        assert_eq!(failure.error.kind, ErrorKind::Permanent);
        assert!(failure.error.message.contains("model_dir"));
    }

    #[tokio::test]
    async fn test_registration_without_registry_is_rejected() {
        let def = PipelineBuilder::new("unregistered")
            .parameter(ParameterSpec::required("model_name", ParamType::String))
            .stage(
                StageSpec::new(
                    "publish",
                    Arc::new(NoOpStage::new("publish").with_output("location", "s3://models/m/1")),
                )
                .with_output("location"),
            )
            .registration(RegistrationSpec::new("model_name", "model_name", "publish.location"))
            .build();

        let err = Executor::new()
            .run(&def, RunRequest::new().with_parameter("model_name", "m"), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ModelcarError::Validation(e) => assert_eq!(e.code(), Some("RUN-002-NO_REGISTRY")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_registration_can_lowercase_model_name() {
        let def = PipelineBuilder::new("names")
            .parameter(ParameterSpec::required("model_name", ParamType::String))
            .stage(
                StageSpec::new(
                    "publish",
                    Arc::new(NoOpStage::new("publish").with_output("location", "s3://models/Bert/1")),
                )
                .with_output("location"),
            )
            .registration(
                RegistrationSpec::new("model_name", "model_name", "publish.location").with_lowercase_name(),
            )
            .build();
        let registry = Arc::new(InMemoryRegistry::new());

        let run = Executor::new()
            .with_registry(registry.clone())
            .run(&def, RunRequest::new().with_parameter("model_name", "Bert"), &CancellationToken::new())
            .await
            .unwrap();

        let record = run.registration.unwrap();
        assert_eq!(record.name, "bert");
        assert_eq!(record.version, "Bert");
        assert_eq!(record.location.uri, "s3://models/Bert/1");
        assert!(registry.lookup("bert", "Bert").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_events_cover_lifecycle() {
        let sink = Arc::new(CollectingEventSink::new());
        let def = PipelineBuilder::new("events")
            .parameter(ParameterSpec::required("model_name", ParamType::String))
            .stage(
                StageSpec::new(
                    "publish",
                    Arc::new(NoOpStage::new("publish").with_output("location", "s3://models/m/1")),
                )
                .with_output("location"),
            )
            .stage(StageSpec::new("extra", noop("extra")).with_condition("false"))
            .registration(
                RegistrationSpec::new("model_name", "model_name", "publish.location")
                    .with_metadata("owner", "ml-platform"),
            )
            .build();

        let run = Executor::new()
            .with_registry(Arc::new(InMemoryRegistry::new()))
            .with_event_sink(sink.clone())
            .run(&def, RunRequest::new().with_parameter("model_name", "m"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.state, RunState::PartiallySkipped);
        let record = run.registration.unwrap();
        assert_eq!(record.metadata.get("owner"), Some(&json!("ml-platform")));
        assert_eq!(record.metadata.get("storage_type"), Some(&json!("s3")));
        assert_eq!(record.run_id, Some(run.id));

        let types = sink.event_types();
        assert_eq!(types.first().map(String::as_str), Some(event_types::RUN_STARTED));
        assert_eq!(types.last().map(String::as_str), Some(event_types::RUN_COMPLETED));
        assert!(types.iter().any(|t| t == event_types::STAGE_SKIPPED));
        assert!(types.iter().any(|t| t == event_types::RUN_REGISTERED));
    }
}
