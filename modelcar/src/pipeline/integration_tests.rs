//! End-to-end scenarios for pipeline execution.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::core::{ArtifactLocation, RunState, StageOutputs, StageState, StorageKind};
    use crate::delivery::{delivery_definition, DeliveryStages};
    use crate::errors::{ErrorKind, RegistryError, StageError};
    use crate::events::{event_types, CollectingEventSink};
    use crate::pipeline::{
        Executor, InputBinding, ParamType, ParameterSpec, PipelineBuilder, PipelineDefinition,
        RegistrationSpec, RetryPolicy, StageSpec,
    };
    use crate::registry::{InMemoryRegistry, MockRegistryClient, RegistrationOutcome, RegistryClient};
    use crate::run::{AttemptOutcome, InMemoryRunStore, JsonFileRunStore, RunRequest, RunStore};
    use crate::stages::{PublishStage, Stage};
    use crate::store::{ArtifactStore, InMemoryArtifactStore};
    use crate::testing::{
        assert_attempts, assert_backoffs_ms, assert_run_state, assert_stage_state,
        assert_validation_code, delivery_request, write_model_dir, CountingArtifactStore,
        FlakyArtifactStore, ScriptedStage, MODEL_FILES,
    };
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn downloader(model_dir: &Path) -> Arc<ScriptedStage> {
        Arc::new(
            ScriptedStage::new("download").with_output("model_dir", model_dir.to_string_lossy().into_owned()),
        )
    }

    fn delivery(
        download: Arc<dyn Stage>,
        compress: Arc<dyn Stage>,
        store: Arc<dyn ArtifactStore>,
    ) -> PipelineDefinition {
        delivery_definition(DeliveryStages {
            download,
            compress,
            upload: Arc::new(PublishStage::new(store)),
        })
    }

    /// download -> upload(retry) -> register, for retry scenarios.
    fn upload_pipeline(model_dir: &Path, store: Arc<dyn ArtifactStore>, upload_retry: RetryPolicy) -> PipelineDefinition {
        PipelineBuilder::new("upload-only")
            .parameter(ParameterSpec::required("model_name", ParamType::String))
            .parameter(ParameterSpec::optional("model_version", ParamType::String).with_default("1.0.0"))
            .stage(StageSpec::new("download", downloader(model_dir)).with_output("model_dir"))
            .stage(
                StageSpec::new("upload", Arc::new(PublishStage::new(store)))
                    .with_input(InputBinding::required("source", "download.model_dir"))
                    .with_input(InputBinding::required("model_name", "model_name"))
                    .with_input(InputBinding::required("model_version", "model_version"))
                    .with_output("location")
                    .with_retry(upload_retry),
            )
            .registration(RegistrationSpec::new("model_name", "model_version", "upload.location"))
            .build()
    }

    fn s3(uri: &str) -> ArtifactLocation {
        ArtifactLocation::new(uri, StorageKind::S3)
    }

    #[tokio::test]
    async fn test_compress_disabled_skips_stage_and_uploads_raw_download() {
        let work = TempDir::new().unwrap();
        let model_dir = write_model_dir(work.path()).unwrap();
        let store = Arc::new(InMemoryArtifactStore::new("models"));
        let compress = Arc::new(ScriptedStage::new("compress").with_output("model_dir", "/nonexistent"));
        let def = delivery(downloader(&model_dir), compress.clone(), store.clone());

        let run = Executor::new()
            .with_registry(Arc::new(InMemoryRegistry::new()))
            .run(&def, delivery_request("org/tiny-model", "tiny"), &CancellationToken::new())
            .await
            .unwrap();

        assert_run_state(&run, RunState::PartiallySkipped);
        assert_stage_state(&run, "download", StageState::Succeeded);
        assert_stage_state(&run, "compress", StageState::Skipped);
        assert_stage_state(&run, "upload", StageState::Succeeded);
        assert_stage_state(&run, "register", StageState::Succeeded);
        assert_eq!(run.count_in(StageState::Succeeded), 3);
        assert_eq!(run.count_in(StageState::Skipped), 1);
        assert_eq!(compress.calls(), 0);

        let mut expected: Vec<String> = MODEL_FILES
            .iter()
            .map(|(path, _)| format!("model-data/tiny/1.0.0/{path}"))
            .collect();
        expected.push("model-data/tiny/1.0.0/manifest.json".to_string());
        expected.sort();
        assert_eq!(store.keys(), expected);

        let location = run.location.clone().unwrap();
        assert_eq!(location.uri, "s3://models/model-data/tiny/1.0.0");
        let record = run.registration.unwrap();
        assert_eq!(record.location, location);
        assert_eq!(record.version, "1.0.0");
        assert_eq!(record.metadata["hub_model"], "org/tiny-model");
        assert_eq!(record.metadata["source"], "huggingface");
        assert!(!record.metadata.contains_key("bucket"));
    }

    #[tokio::test]
    async fn test_compress_enabled_feeds_upload() {
        let work = TempDir::new().unwrap();
        let raw = write_model_dir(work.path()).unwrap();
        let compressed = work.path().join("compressed");
        std::fs::create_dir_all(&compressed).unwrap();
        std::fs::write(compressed.join("model-q4.gguf"), "quantized").unwrap();

        let store = Arc::new(InMemoryArtifactStore::default());
        let compress = Arc::new(
            ScriptedStage::new("compress").with_output("model_dir", compressed.to_string_lossy().into_owned()),
        );
        let def = delivery(downloader(&raw), compress.clone(), store.clone());

        let run = Executor::new()
            .with_registry(Arc::new(InMemoryRegistry::new()))
            .run(
                &def,
                delivery_request("org/tiny-model", "tiny").with_parameter("compress", true),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_run_state(&run, RunState::Succeeded);
        assert_eq!(
            compress.last_inputs().unwrap().get_str("source"),
            Some(raw.to_string_lossy().as_ref())
        );
        assert_eq!(
            store.keys(),
            vec![
                "model-data/tiny/1.0.0/manifest.json".to_string(),
                "model-data/tiny/1.0.0/model-q4.gguf".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_skip_list_disables_compress_even_when_requested() {
        let work = TempDir::new().unwrap();
        let model_dir = write_model_dir(work.path()).unwrap();
        let compress = Arc::new(ScriptedStage::new("compress"));
        let def = delivery(
            downloader(&model_dir),
            compress.clone(),
            Arc::new(InMemoryArtifactStore::default()),
        );

        let run = Executor::new()
            .with_registry(Arc::new(InMemoryRegistry::new()))
            .run(
                &def,
                delivery_request("org/tiny-model", "tiny")
                    .with_parameter("compress", true)
                    .disable("compress"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_run_state(&run, RunState::PartiallySkipped);
        assert_eq!(
            run.stage("compress").unwrap().skip_reason.as_deref(),
            Some("disabled by run request")
        );
        assert_eq!(compress.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_recovers_from_two_transient_failures() {
        let work = TempDir::new().unwrap();
        let model_dir = write_model_dir(work.path()).unwrap();
        let inner = Arc::new(InMemoryArtifactStore::default());
        let store = Arc::new(FlakyArtifactStore::new(inner.clone(), 2));
        let def = upload_pipeline(&model_dir, store.clone(), RetryPolicy::new(3));

        let run = Executor::new()
            .with_registry(Arc::new(InMemoryRegistry::new()))
            .run(&def, RunRequest::new().with_parameter("model_name", "tiny"), &CancellationToken::new())
            .await
            .unwrap();

        assert_run_state(&run, RunState::Succeeded);
        assert_attempts(&run, "upload", 3);
        assert_backoffs_ms(&run, "upload", &[1000, 2000]);
        let upload = run.stage("upload").unwrap();
        assert!(matches!(
            upload.attempts[0].outcome,
            AttemptOutcome::Failed { ref error } if error.kind == ErrorKind::Transient
        ));
        assert_eq!(upload.attempts[2].outcome, AttemptOutcome::Succeeded);
        assert_eq!(store.failures_remaining(), 0);
        assert_eq!(inner.len(), MODEL_FILES.len() + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_fails_run_and_stops_downstream() {
        let first = Arc::new(ScriptedStage::new("fetch").fail_times(3, &StageError::transient("hub throttled")));
        let second = Arc::new(ScriptedStage::new("after"));
        let def = PipelineBuilder::new("exhaust")
            .stage(StageSpec::new("fetch", first.clone()).with_retry(RetryPolicy::new(3)))
            .stage(StageSpec::new("after", second.clone()))
            .build();

        let run = Executor::new()
            .run(&def, RunRequest::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_run_state(&run, RunState::Failed);
        let failure = run.failure.clone().unwrap();
        assert_eq!(failure.stage, "fetch");
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.error.kind, ErrorKind::Transient);
        assert!(failure.error.message.contains("hub throttled"));
        assert_eq!(first.attempts_seen(), vec![1, 2, 3]);
        assert_stage_state(&run, "after", StageState::NotStarted);
        assert_eq!(second.calls(), 0);
        assert!(run.summary().contains("failed after 3 attempt(s)"));
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let stage = Arc::new(ScriptedStage::new("fetch").then_fail(StageError::permanent("model not found")));
        let def = PipelineBuilder::new("permanent")
            .stage(StageSpec::new("fetch", stage.clone()).with_retry(RetryPolicy::new(5)))
            .build();

        let run = Executor::new()
            .run(&def, RunRequest::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_run_state(&run, RunState::Failed);
        assert_attempts(&run, "fetch", 1);
        assert_eq!(stage.calls(), 1);
        assert!(run.stage("fetch").unwrap().backoffs_ms().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_is_capped_exponential() {
        let stage = Arc::new(ScriptedStage::new("flaky").fail_times(5, &StageError::transient("503")));
        let def = PipelineBuilder::new("backoff")
            .stage(StageSpec::new("flaky", stage.clone()).with_retry(RetryPolicy::new(6)))
            .build();

        let started = tokio::time::Instant::now();
        let run = Executor::new()
            .run(&def, RunRequest::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_run_state(&run, RunState::Succeeded);
        assert_backoffs_ms(&run, "flaky", &[1000, 2000, 4000, 8000, 8000]);
        assert!(started.elapsed() >= Duration::from_secs(23));
        assert_eq!(stage.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_attempt_is_retried() {
        let stage = Arc::new(ScriptedStage::new("slow").with_output("done", true).then_hang());
        let def = PipelineBuilder::new("timeout")
            .stage(
                StageSpec::new("slow", stage.clone())
                    .with_output("done")
                    .with_timeout(Duration::from_millis(50))
                    .with_retry(RetryPolicy::new(2).with_base_delay_ms(10)),
            )
            .build();

        let run = Executor::new()
            .run(&def, RunRequest::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_run_state(&run, RunState::Succeeded);
        let slow = run.stage("slow").unwrap();
        assert_eq!(slow.attempts[0].outcome, AttemptOutcome::TimedOut { timeout_ms: 50 });
        assert_eq!(slow.attempts[1].outcome, AttemptOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_cancellation_stops_in_flight_stage() {
        let hanging = Arc::new(ScriptedStage::new("download").then_hang());
        let after = Arc::new(ScriptedStage::new("upload"));
        let def = PipelineBuilder::new("cancel")
            .stage(StageSpec::new("download", hanging.clone()))
            .stage(StageSpec::new("upload", after.clone()))
            .build();
        let sink = Arc::new(CollectingEventSink::new());

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel("operator abort");
        });

        let run = tokio::time::timeout(
            Duration::from_secs(5),
            Executor::new().with_event_sink(sink.clone()).run(&def, RunRequest::new(), &token),
        )
        .await
        .unwrap()
        .unwrap();

        assert_run_state(&run, RunState::Cancelled);
        assert_eq!(run.cancel_reason.as_deref(), Some("operator abort"));
        assert_stage_state(&run, "download", StageState::Cancelled);
        assert_stage_state(&run, "upload", StageState::NotStarted);
        assert_eq!(after.calls(), 0);
        assert!(run.failure.is_none());
        assert_eq!(sink.events_of_type(event_types::STAGE_CANCELLED).len(), 1);
        assert!(sink.events_of_type(event_types::STAGE_ATTEMPT_FAILED).is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let stage = Arc::new(ScriptedStage::new("flaky").then_fail(StageError::transient("503")));
        let def = PipelineBuilder::new("cancel-backoff")
            .stage(
                StageSpec::new("flaky", stage.clone())
                    .with_retry(RetryPolicy::new(3).with_base_delay_ms(60_000)),
            )
            .build();

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel("shutdown");
        });

        let run = tokio::time::timeout(
            Duration::from_secs(5),
            Executor::new().run(&def, RunRequest::new(), &token),
        )
        .await
        .unwrap()
        .unwrap();

        assert_run_state(&run, RunState::Cancelled);
        assert_eq!(stage.calls(), 1);
        assert_eq!(run.stage("flaky").unwrap().backoffs_ms(), vec![60_000]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let stage = Arc::new(ScriptedStage::new("first"));
        let def = PipelineBuilder::new("precancelled")
            .stage(StageSpec::new("first", stage.clone()))
            .build();
        let token = CancellationToken::new();
        token.cancel("not today");

        let run = Executor::new().run(&def, RunRequest::new(), &token).await.unwrap();

        assert_run_state(&run, RunState::Cancelled);
        assert_stage_state(&run, "first", StageState::NotStarted);
        assert_eq!(stage.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_definition_starts_nothing() {
        let stage = Arc::new(ScriptedStage::new("upload"));
        let def = PipelineBuilder::new("invalid")
            .stage(
                StageSpec::new("upload", stage.clone())
                    .with_input(InputBinding::required("source", "download.model_dir")),
            )
            .build();
        let sink = Arc::new(CollectingEventSink::new());

        let err = Executor::new()
            .with_event_sink(sink.clone())
            .run(&def, RunRequest::new(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_validation_code(&err, "DEF-003-DANGLING_INPUT");
        assert_eq!(stage.calls(), 0);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_parameter_is_rejected() {
        let work = TempDir::new().unwrap();
        let model_dir = write_model_dir(work.path()).unwrap();
        let def = delivery(
            downloader(&model_dir),
            Arc::new(ScriptedStage::new("compress")),
            Arc::new(InMemoryArtifactStore::default()),
        );

        let err = Executor::new()
            .with_registry(Arc::new(InMemoryRegistry::new()))
            .run(
                &def,
                RunRequest::new().with_parameter("hub_model", "org/tiny-model"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_validation_code(&err, "PARAM-001-MISSING");
    }

    #[tokio::test]
    async fn test_rerun_does_not_reupload_or_reregister() {
        let work = TempDir::new().unwrap();
        let model_dir = write_model_dir(work.path()).unwrap();
        let store = Arc::new(CountingArtifactStore::new(Arc::new(InMemoryArtifactStore::default())));
        let registry = Arc::new(InMemoryRegistry::new());
        let executor = Executor::new().with_registry(registry.clone());
        let def = delivery(
            downloader(&model_dir),
            Arc::new(ScriptedStage::new("compress")),
            store.clone(),
        );

        let first = executor
            .run(&def, delivery_request("org/tiny-model", "tiny"), &CancellationToken::new())
            .await
            .unwrap();
        let puts_after_first = store.put_count();
        assert_eq!(puts_after_first, MODEL_FILES.len() + 1);

        let second = executor
            .run(&def, delivery_request("org/tiny-model", "tiny"), &CancellationToken::new())
            .await
            .unwrap();

        assert_run_state(&second, RunState::PartiallySkipped);
        assert_eq!(store.put_count(), puts_after_first);
        let upload = second.stage("upload").unwrap();
        assert_eq!(upload.outputs.get("reused"), Some(&serde_json::json!(true)));
        assert_eq!(second.stage("register").unwrap().outputs.get("created"), Some(&serde_json::json!(false)));

        let first_record = first.registration.unwrap();
        let second_record = second.registration.unwrap();
        assert_eq!(first_record.id, second_record.id);
        assert_eq!(first_record.run_id, Some(first.id));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_rerun_after_interrupted_upload_only_writes_missing_objects() {
        let work = TempDir::new().unwrap();
        let model_dir = write_model_dir(work.path()).unwrap();
        let inner = Arc::new(InMemoryArtifactStore::default());
        let flaky = Arc::new(FlakyArtifactStore::new(inner.clone(), 1).failing_on("manifest.json"));
        let store = Arc::new(CountingArtifactStore::new(flaky));
        let def = upload_pipeline(&model_dir, store.clone(), RetryPolicy::none());
        let executor = Executor::new().with_registry(Arc::new(InMemoryRegistry::new()));
        let request = || RunRequest::new().with_parameter("model_name", "tiny");

        let failed = executor.run(&def, request(), &CancellationToken::new()).await.unwrap();
        assert_run_state(&failed, RunState::Failed);
        assert_eq!(failed.failure.as_ref().unwrap().stage, "upload");
        assert_stage_state(&failed, "register", StageState::NotStarted);
        assert!(failed.registration.is_none());
        assert_eq!(store.put_count(), MODEL_FILES.len());

        let retried = executor.run(&def, request(), &CancellationToken::new()).await.unwrap();
        assert_run_state(&retried, RunState::Succeeded);
        let paths = store.put_paths();
        assert_eq!(paths.len(), MODEL_FILES.len() + 1);
        assert_eq!(paths.last().map(String::as_str), Some("model-data/tiny/1.0.0/manifest.json"));
    }

    #[tokio::test]
    async fn test_registration_conflict_fails_without_retry() {
        let work = TempDir::new().unwrap();
        let model_dir = write_model_dir(work.path()).unwrap();
        let mut registry = MockRegistryClient::new();
        registry.expect_register().times(1).returning(|request| {
            Err(RegistryError::Conflict {
                name: request.name.clone(),
                version: request.version.clone(),
                existing: s3("s3://models/elsewhere"),
                requested: request.location.clone(),
            })
        });
        let mut def = upload_pipeline(&model_dir, Arc::new(InMemoryArtifactStore::default()), RetryPolicy::none());
        if let Some(registration) = def.registration.as_mut() {
            registration.retry = RetryPolicy::new(3);
        }

        let run = Executor::new()
            .with_registry(Arc::new(registry))
            .run(&def, RunRequest::new().with_parameter("model_name", "tiny"), &CancellationToken::new())
            .await
            .unwrap();

        assert_run_state(&run, RunState::Failed);
        let failure = run.failure.unwrap();
        assert_eq!(failure.stage, "register");
        assert_eq!(failure.attempts, 1);
        assert_eq!(failure.error.kind, ErrorKind::Conflict);
        assert!(run.registration.is_none());
    }

    #[tokio::test]
    async fn test_registration_conflict_against_existing_version() {
        let work = TempDir::new().unwrap();
        let model_dir = write_model_dir(work.path()).unwrap();
        let registry = Arc::new(InMemoryRegistry::new());
        let existing = crate::registry::RegistrationRequest::new("tiny", "1.0.0", s3("s3://other/model-data/tiny/1.0.0"));
        registry.register(&existing).await.unwrap();

        let def = upload_pipeline(&model_dir, Arc::new(InMemoryArtifactStore::default()), RetryPolicy::none());
        let run = Executor::new()
            .with_registry(registry.clone())
            .run(&def, RunRequest::new().with_parameter("model_name", "tiny"), &CancellationToken::new())
            .await
            .unwrap();

        assert_run_state(&run, RunState::Failed);
        assert_eq!(run.failure.unwrap().error.kind, ErrorKind::Conflict);
        let on_file = registry.lookup("tiny", "1.0.0").await.unwrap().unwrap();
        assert_eq!(on_file.location.uri, "s3://other/model-data/tiny/1.0.0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_registry_is_retried() {
        let work = TempDir::new().unwrap();
        let model_dir = write_model_dir(work.path()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut registry = MockRegistryClient::new();
        registry.expect_register().times(2).returning(move |request| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RegistryError::Unavailable("503 from registry".to_string()))
            } else {
                Ok(RegistrationOutcome {
                    record: request.clone().into_record(),
                    created: true,
                })
            }
        });
        let mut def = upload_pipeline(&model_dir, Arc::new(InMemoryArtifactStore::default()), RetryPolicy::none());
        if let Some(registration) = def.registration.as_mut() {
            registration.retry = RetryPolicy::new(3);
        }

        let run = Executor::new()
            .with_registry(Arc::new(registry))
            .run(&def, RunRequest::new().with_parameter("model_name", "tiny"), &CancellationToken::new())
            .await
            .unwrap();

        assert_run_state(&run, RunState::Succeeded);
        assert_attempts(&run, "register", 2);
        assert_backoffs_ms(&run, "register", &[1000]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let record = run.registration.unwrap();
        assert_eq!(record.metadata["storage_type"], "s3");
        assert_eq!(record.run_id, Some(run.id));
    }

    #[tokio::test]
    async fn test_concurrent_runs_register_once() {
        let work = TempDir::new().unwrap();
        let model_dir = write_model_dir(work.path()).unwrap();
        let store: Arc<dyn ArtifactStore> = Arc::new(InMemoryArtifactStore::default());
        let registry = Arc::new(InMemoryRegistry::new());
        let executor = Executor::new().with_registry(registry.clone());
        let def = upload_pipeline(&model_dir, store, RetryPolicy::none());
        let request = || RunRequest::new().with_parameter("model_name", "tiny");
        let (token_a, token_b) = (CancellationToken::new(), CancellationToken::new());

        let (a, b) = tokio::join!(
            executor.run(&def, request(), &token_a),
            executor.run(&def, request(), &token_b),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(a.is_success() && b.is_success());
        let created: Vec<bool> = [&a, &b]
            .iter()
            .map(|run| run.stage("register").unwrap().outputs.get("created") == Some(&serde_json::json!(true)))
            .collect();
        assert_eq!(created.iter().filter(|c| **c).count(), 1);
        assert_eq!(a.registration.unwrap().id, b.registration.unwrap().id);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_reuses_succeeded_stages() {
        let work = TempDir::new().unwrap();
        let model_dir = write_model_dir(work.path()).unwrap();
        let store: Arc<dyn ArtifactStore> = Arc::new(InMemoryArtifactStore::default());
        let registry = Arc::new(InMemoryRegistry::new());
        let executor = Executor::new().with_registry(registry.clone());

        let broken = PipelineBuilder::new("resumable")
            .parameter(ParameterSpec::required("model_name", ParamType::String))
            .stage(StageSpec::new("download", downloader(&model_dir)).with_output("model_dir"))
            .stage(
                StageSpec::new(
                    "upload",
                    Arc::new(ScriptedStage::new("upload").then_fail(StageError::permanent("bucket missing"))),
                )
                .with_input(InputBinding::required("source", "download.model_dir"))
                .with_output("location"),
            )
            .build();
        let request = || RunRequest::new().with_parameter("model_name", "tiny");

        let failed = executor.run(&broken, request(), &CancellationToken::new()).await.unwrap();
        assert_run_state(&failed, RunState::Failed);

        let download = downloader(Path::new("/should/not/run"));
        let upload = Arc::new(ScriptedStage::new("upload").with_output("location", "s3://models/model-data/tiny/1"));
        let fixed = PipelineBuilder::new("resumable")
            .parameter(ParameterSpec::required("model_name", ParamType::String))
            .stage(StageSpec::new("download", download.clone()).with_output("model_dir"))
            .stage(
                StageSpec::new("upload", upload.clone())
                    .with_input(InputBinding::required("source", "download.model_dir"))
                    .with_output("location"),
            )
            .build();

        let resumed = executor
            .run(&fixed, request().resume(failed.clone()), &CancellationToken::new())
            .await
            .unwrap();

        assert_run_state(&resumed, RunState::Succeeded);
        assert_eq!(download.calls(), 0);
        assert!(resumed.stage("download").unwrap().reused);
        assert_eq!(
            upload.last_inputs().unwrap().get_str("source"),
            Some(model_dir.to_string_lossy().as_ref())
        );
        assert_eq!(resumed.location.unwrap().uri, "s3://models/model-data/tiny/1");

        let err = executor
            .run(
                &fixed,
                RunRequest::new().with_parameter("model_name", "other").resume(failed),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_validation_code(&err, "RUN-001-RESUME_MISMATCH");
    }

    #[tokio::test]
    async fn test_run_records_are_persisted() {
        let dir = TempDir::new().unwrap();
        let file_store = Arc::new(JsonFileRunStore::new(dir.path()));
        let memory_store = Arc::new(InMemoryRunStore::new());
        let def = PipelineBuilder::new("persisted")
            .stage(
                StageSpec::new(
                    "only",
                    Arc::new(ScriptedStage::new("only").then_succeed(StageOutputs::single("answer", 42))),
                )
                .with_output("answer"),
            )
            .build();

        let run = Executor::new()
            .with_run_store(file_store.clone())
            .run(&def, RunRequest::new(), &CancellationToken::new())
            .await
            .unwrap();
        Executor::new()
            .with_run_store(memory_store.clone())
            .run(&def, RunRequest::new(), &CancellationToken::new())
            .await
            .unwrap();

        let loaded = file_store.load(run.id).await.unwrap().unwrap();
        assert_eq!(loaded, run);
        assert_eq!(loaded.stage("only").unwrap().outputs.get("answer"), Some(&serde_json::json!(42)));
        assert_eq!(memory_store.len(), 1);
    }
}
