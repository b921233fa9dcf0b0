//! lamin-provenance CLI: inspect classification and rehearse provenance runs.
//!
//! Usage:
//!   lamin-provenance classify [--config path] [--direction output] <paths>...
//!   lamin-provenance storage-key --uid <uid> [--suffix .txt] [--overwrite-versions]
//!   lamin-provenance simulate [--config path] --script main.nf [<files>...]

use clap::{Parser, Subcommand, ValueEnum};
use lamin_provenance::client::{ApiKeyTokenProvider, MemoryApi};
use lamin_provenance::{
    auto_storage_key, ArtifactClassifier, Direction, InstanceId, LaminConfig, MetadataClient,
    ProvenanceObserver, Reconciler, RunOutcome, WorkflowMetadata,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "lamin-provenance",
    version,
    about = "Workflow provenance for LaminDB instances"
)]
struct Cli {
    /// Log filter directives, e.g. `info` or `warn,lamin_provenance=debug`.
    /// `RUST_LOG` takes precedence when set.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show how the configured rules classify paths
    Classify {
        /// Path to the YAML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "output")]
        direction: DirectionArg,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Derive the storage key of a uid-addressed artifact
    StorageKey {
        #[arg(long)]
        uid: String,
        /// File suffix including the dot
        #[arg(long, default_value = "")]
        suffix: String,
        #[arg(long)]
        overwrite_versions: bool,
    },
    /// Run a full provenance lifecycle against an in-memory instance
    Simulate {
        /// Path to the YAML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Entry script relative to the repository
        #[arg(long, default_value = "main.nf")]
        script: String,
        #[arg(long)]
        repository: Option<String>,
        #[arg(long)]
        revision: Option<String>,
        #[arg(long)]
        work_dir: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "success")]
        outcome: OutcomeArg,
        /// Files to publish as outputs
        files: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Input,
    Output,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Input => Direction::Input,
            DirectionArg::Output => Direction::Output,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutcomeArg {
    Success,
    Cancelled,
    Failed,
}

impl From<OutcomeArg> for RunOutcome {
    fn from(arg: OutcomeArg) -> Self {
        match arg {
            OutcomeArg::Success => RunOutcome::Success,
            OutcomeArg::Cancelled => RunOutcome::Cancelled,
            OutcomeArg::Failed => RunOutcome::Failed,
        }
    }
}

/// Get the default configuration path (~/.lamin/provenance.yaml)
fn default_config_path() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".lamin").join("provenance.yaml")
}

/// Load the configuration, falling back to defaults when no file exists at
/// the default location.
fn load_config(path: Option<PathBuf>) -> Result<LaminConfig, String> {
    let config = match path {
        Some(path) => LaminConfig::from_file(&path).map_err(|e| e.to_string())?,
        None => {
            let path = default_config_path();
            if path.is_file() {
                LaminConfig::from_file(&path).map_err(|e| e.to_string())?
            } else {
                LaminConfig::default()
            }
        }
    };
    Ok(config.with_env_overrides())
}

fn cmd_classify(config: Option<PathBuf>, direction: Direction, paths: &[String]) -> Result<(), String> {
    let config = load_config(config)?;
    let classifier = ArtifactClassifier::from_config(&config.artifacts).map_err(|e| e.to_string())?;
    for path in paths {
        let evaluation = classifier.evaluate(path, direction);
        let line = serde_json::json!({ "path": path, "evaluation": evaluation });
        println!("{}", line);
    }
    Ok(())
}

fn cmd_simulate(
    config: Option<PathBuf>,
    workflow: WorkflowMetadata,
    outcome: RunOutcome,
    files: &[String],
) -> Result<(), String> {
    let mut config = load_config(config)?;
    config.instance.get_or_insert_with(|| "local/memory".to_string());
    config.api_key.get_or_insert_with(|| "simulated".to_string());
    let settings = config.validate().map_err(|e| e.to_string())?;

    let api = Arc::new(MemoryApi::new());
    let client = settings.instance.clone().map(|instance: InstanceId| {
        let tokens = ApiKeyTokenProvider::new(settings.api_key.clone().unwrap_or_default(), |key| {
            Ok(format!("token-for-{}", key.len()))
        });
        Arc::new(MetadataClient::new(instance, api.clone(), Arc::new(tokens)).with_retry_policy(settings.retry))
    });
    let observer = ProvenanceObserver::new(Arc::new(Reconciler::from_settings(&settings, client)));

    let (transform, run) = observer.on_init(&workflow).map_err(|e| e.to_string())?;
    println!("transform {} {} ({})", transform.uid, transform.key, transform.version_or_fallback());
    println!("run       {}", run.uid);
    observer.on_run_start().map_err(|e| e.to_string())?;

    for file in files {
        match observer.on_file_published(file, Direction::Output) {
            Some(artifact) => println!(
                "artifact  {} {} labels={:?}",
                artifact.uid,
                file,
                artifact.labels
            ),
            None => println!("skipped   {}", file),
        }
    }

    if let Some(run) = observer.on_run_end(outcome).map_err(|e| e.to_string())? {
        println!("finished  {} {}", run.uid, run.status);
    }
    println!(
        "{} create, {} update, {} upload call(s){}",
        api.creates(),
        api.updates(),
        api.uploads(),
        if settings.dry_run { " (dry run)" } else { "" }
    );
    Ok(())
}

/// `RUST_LOG` first, then the `--log-level` directives, then `warn`.
fn log_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives))
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&cli.log_level))
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Classify { config, direction, paths } => cmd_classify(config, direction.into(), &paths),
        Commands::StorageKey { uid, suffix, overwrite_versions } => {
            println!("{}", auto_storage_key(&uid, &suffix, overwrite_versions));
            Ok(())
        }
        Commands::Simulate { config, script, repository, revision, work_dir, outcome, files } => {
            let mut workflow = WorkflowMetadata::new(script)
                .with_work_dir(work_dir.unwrap_or_else(std::env::temp_dir));
            workflow.repository = repository;
            workflow.revision = revision;
            cmd_simulate(config, workflow, outcome.into(), &files)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
