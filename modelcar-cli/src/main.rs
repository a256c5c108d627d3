//! `modelcar`: validate and run model delivery pipelines.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use modelcar::cancellation::CancellationToken;
use modelcar::config::{build_registry, build_store, ModelcarConfig};
use modelcar::delivery::DELIVERY_DOCUMENT;
use modelcar::events::LoggingEventSink;
use modelcar::observability::{init_tracing, SpanTimer};
use modelcar::pipeline::{validate_with_disabled, DefinitionDocument, Executor, PipelineDefinition, StageCatalog};
use modelcar::run::{parse_stage_list, JsonFileRunStore, RunRecord, RunRequest, RunStore};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "modelcar", version, about = "Staged model delivery pipelines")]
struct Cli {
    /// Runtime configuration (YAML or JSON).
    #[arg(long, global = true, env = "MODELCAR_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a definition without running it.
    Validate {
        definition: PathBuf,
        /// Comma-separated stages to disable.
        #[arg(long, env = "MODELCAR_SKIP_STAGES")]
        skip: Option<String>,
    },
    /// Run a definition.
    Run {
        definition: PathBuf,
        /// Parameter value as `name=value`; repeatable.
        #[arg(long = "param", short = 'p')]
        params: Vec<String>,
        /// Comma-separated stages to disable.
        #[arg(long, env = "MODELCAR_SKIP_STAGES")]
        skip: Option<String>,
        /// Run ID or run-record file to resume from.
        #[arg(long)]
        resume: Option<String>,
        /// Print the run record as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print a stored run record.
    Show { run_id: Uuid },
    /// Print the standard delivery definition.
    Init {
        /// Write to a file instead of stdout.
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Validate { definition, skip } => validate_cmd(&config, &definition, skip.as_deref()),
        Commands::Run {
            definition,
            params,
            skip,
            resume,
            json,
        } => run_cmd(&config, &definition, &params, skip.as_deref(), resume.as_deref(), json).await,
        Commands::Show { run_id } => show_cmd(&config, run_id).await,
        Commands::Init { output } => init_cmd(output.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<ModelcarConfig> {
    match path {
        Some(path) => ModelcarConfig::from_path(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => Ok(ModelcarConfig::default()),
    }
}

fn load_definition(config: &ModelcarConfig, path: &Path) -> Result<PipelineDefinition> {
    let store = build_store(&config.store).context("Failed to build artifact store")?;
    let catalog = StageCatalog::with_store(store).with_default_retry(config.defaults.retry.clone());
    DefinitionDocument::from_path(path)
        .and_then(|doc| doc.bind(&catalog))
        .with_context(|| format!("Failed to load definition: {}", path.display()))
}

fn validate_cmd(config: &ModelcarConfig, path: &Path, skip: Option<&str>) -> Result<()> {
    let def = load_definition(config, path)?;
    let disabled = skip.map(parse_stage_list).unwrap_or_default();
    validate_with_disabled(&def, &disabled)
        .with_context(|| format!("Definition '{}' is invalid", def.name))?;
    println!(
        "{}: {} stage(s), {} parameter(s), valid",
        def.name,
        def.stages.len(),
        def.parameters.len()
    );
    Ok(())
}

async fn run_cmd(
    config: &ModelcarConfig,
    path: &Path,
    params: &[String],
    skip: Option<&str>,
    resume: Option<&str>,
    json: bool,
) -> Result<()> {
    let def = load_definition(config, path)?;
    let parameters = def
        .parse_parameter_args(params.iter().map(String::as_str))
        .context("Invalid --param")?;

    let run_store = config.build_run_store();
    let mut request = RunRequest::new().with_parameters(parameters);
    if let Some(skip) = skip {
        request = request.disable_all(parse_stage_list(skip));
    }
    if let Some(resume) = resume {
        request = request.resume(load_resume(run_store.as_deref(), resume).await?);
    }

    let registry = build_registry(&config.registry).context("Failed to build registry")?;
    let mut executor = Executor::new()
        .with_registry(registry)
        .with_event_sink(Arc::new(LoggingEventSink::default()));
    if let Some(store) = run_store {
        executor = executor.with_run_store(store);
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            signal_token.cancel("interrupted");
        }
    });

    let timer = SpanTimer::start(def.name.clone());
    let run = executor.run(&def, request, &cancel).await?;
    info!(
        run_id = %run.id,
        pipeline = timer.name(),
        elapsed_ms = timer.elapsed_ms(),
        "Run finished"
    );

    if json {
        println!("{}", run.to_json().context("Failed to serialize run record")?);
    } else {
        println!("{}", run.summary());
    }
    if !run.is_success() {
        bail!("{}", run.summary());
    }
    Ok(())
}

async fn load_resume(store: Option<&dyn RunStore>, reference: &str) -> Result<RunRecord> {
    if let Ok(id) = reference.parse::<Uuid>() {
        let Some(store) = store else {
            bail!("Cannot resume run {id}: no `runs` directory configured");
        };
        return store
            .load(id)
            .await
            .with_context(|| format!("Failed to load run {id}"))?
            .with_context(|| format!("Run {id} not found"));
    }
    JsonFileRunStore::read_file(reference)
        .await
        .with_context(|| format!("Failed to read run record: {reference}"))
}

async fn show_cmd(config: &ModelcarConfig, id: Uuid) -> Result<()> {
    let Some(store) = config.build_run_store() else {
        bail!("No `runs` directory configured");
    };
    let run = store
        .load(id)
        .await
        .with_context(|| format!("Failed to load run {id}"))?
        .with_context(|| format!("Run {id} not found"))?;
    println!("{}", run.to_json()?);
    Ok(())
}

fn init_cmd(output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            if path.exists() {
                bail!("Refusing to overwrite {}", path.display());
            }
            std::fs::write(path, DELIVERY_DOCUMENT)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Definition written");
        }
        None => print!("{DELIVERY_DOCUMENT}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use modelcar::core::RunState;
    use modelcar::run::Run;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_arguments() {
        let cli = Cli::try_parse_from([
            "modelcar",
            "run",
            "delivery.yaml",
            "--param",
            "hub_model=org/bert",
            "-p",
            "compress=true",
            "--skip",
            "compress",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                definition,
                params,
                skip,
                resume,
                json,
            } => {
                assert_eq!(definition, PathBuf::from("delivery.yaml"));
                assert_eq!(params, vec!["hub_model=org/bert", "compress=true"]);
                assert_eq!(skip.as_deref(), Some("compress"));
                assert!(resume.is_none());
                assert!(json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_show_requires_uuid() {
        assert!(Cli::try_parse_from(["modelcar", "show", "not-a-uuid"]).is_err());
    }

    #[test]
    fn test_init_writes_standard_definition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("delivery.yaml");
        init_cmd(Some(&path)).unwrap();

        let def = load_definition(&ModelcarConfig::default(), &path).unwrap();
        assert_eq!(def.name, "model-delivery");
        assert!(init_cmd(Some(&path)).is_err());
    }

    #[test]
    fn test_validate_rejects_skipping_download() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("delivery.yaml");
        init_cmd(Some(&path)).unwrap();

        let config = ModelcarConfig::default();
        validate_cmd(&config, &path, Some("compress")).unwrap();
        assert!(validate_cmd(&config, &path, Some("download")).is_err());
    }

    #[tokio::test]
    async fn test_resume_from_store_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileRunStore::new(dir.path());
        let run = Run {
            id: Uuid::new_v4(),
            pipeline: "model-delivery".to_string(),
            parameters: std::collections::BTreeMap::new(),
            parameter_hash: "abc".to_string(),
            state: RunState::Failed,
            stages: Vec::new(),
            failure: None,
            location: None,
            registration: None,
            cancel_reason: None,
            started_at: modelcar::utils::now_utc(),
            finished_at: None,
        };
        store.save(&run).await.unwrap();

        let loaded = load_resume(Some(&store), &run.id.to_string()).await.unwrap();
        assert_eq!(loaded, run);

        let file = store.path_for(run.id);
        let loaded = load_resume(None, file.to_str().unwrap()).await.unwrap();
        assert_eq!(loaded.id, run.id);

        assert!(load_resume(None, &Uuid::new_v4().to_string()).await.is_err());
        assert!(load_resume(Some(&store), &Uuid::new_v4().to_string()).await.is_err());
    }
}
