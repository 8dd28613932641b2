//! CLI binary for checking a change against a markdown rules checklist.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use prrules_github::{parse_pull_number, GitHubClient, Repository};
use prrules_llm::{
    AnthropicAdapter, LlmClient, LoggingMiddleware, OllamaAdapter, OpenAiAdapter,
    ProviderAdapter, UsageTracker,
};
use prrules_pipeline::{
    run_check, ChangeSource, ChecklistEvent, ChecklistOrchestrator, ChecklistSource,
    EventEmitter, FileChecklistSource, LlmBackend, PipelineConfig, ReasoningBackend, ReportSink,
    RepositoryChecklistSource, RunResult, StaticChangeSource, StdoutSink,
};

#[derive(Parser)]
#[command(
    name = "pr-rules-check",
    version,
    about = "Check a pull request against a markdown checklist of rules"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Pipeline configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendKind {
    Openai,
    Anthropic,
    Ollama,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a GitHub pull request and comment the report on it
    Run {
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        github_token: String,

        /// Repository as owner/name
        #[arg(long, env = "GITHUB_REPOSITORY")]
        repository: String,

        /// Pull request ref, e.g. refs/pull/42/merge
        #[arg(long = "ref", env = "GITHUB_REF")]
        git_ref: String,

        /// Checklist path in the repository, read from the base branch
        #[arg(long, default_value = ".github/pr-rules.md")]
        rules_path: String,

        #[arg(long, env = "LLM_TYPE", value_enum, default_value = "openai")]
        backend: BackendKind,

        /// Print the report instead of commenting on the pull request
        #[arg(long)]
        dry_run: bool,

        /// Also write the report as JSON to this path
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Check a local change file against a local checklist and print the report
    Check {
        /// Change as JSON: title, body, base_ref, head_ref, file_diffs
        change: PathBuf,

        /// Checklist markdown file
        checklist: PathBuf,

        #[arg(long, env = "LLM_TYPE", value_enum, default_value = "openai")]
        backend: BackendKind,

        /// Also write the report as JSON to this path
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Print the items parsed from a checklist file
    Parse {
        checklist: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    let result = match cli.command {
        Commands::Run {
            github_token,
            repository,
            git_ref,
            rules_path,
            backend,
            dry_run,
            json,
        } => {
            let repository: Repository = repository.parse()?;
            let pull_number = parse_pull_number(&git_ref)?;
            tracing::info!(repository = %repository, pull = pull_number, "Checking pull request");

            let github = Arc::new(GitHubClient::new(github_token, repository, pull_number));
            let checklist = RepositoryChecklistSource::new(github.clone(), rules_path);
            let sink: &dyn ReportSink = if dry_run { &StdoutSink } else { github.as_ref() };
            let result = cmd_check(&config, backend, github.as_ref(), &checklist, sink).await?;
            write_json(json.as_deref(), &result)?;
            result
        }
        Commands::Check {
            change,
            checklist,
            backend,
            json,
        } => {
            let source = StaticChangeSource::from_json_file(&change).await?;
            let checklist = FileChecklistSource::new(checklist);
            let result = cmd_check(&config, backend, &source, &checklist, &StdoutSink).await?;
            write_json(json.as_deref(), &result)?;
            result
        }
        Commands::Parse { checklist } => {
            cmd_parse(&checklist)?;
            return Ok(());
        }
    };

    if !result.exit.is_success() {
        std::process::exit(result.exit.code());
    }
    Ok(())
}

fn cmd_parse(path: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)?;
    let items = prrules_pipeline::parse_checklist_strict(&text)?;
    for (i, item) in items.iter().enumerate() {
        let severity = if item.is_mandatory() { "mandatory" } else { "advisory" };
        println!("{:>3}. [{}] {}", i + 1, severity, item.text);
    }
    Ok(())
}

async fn cmd_check(
    config: &PipelineConfig,
    kind: BackendKind,
    change: &dyn ChangeSource,
    checklist: &dyn ChecklistSource,
    sink: &dyn ReportSink,
) -> anyhow::Result<RunResult> {
    let usage = UsageTracker::new();
    let backend = build_backend(kind, config, usage.clone())?;
    let events = EventEmitter::default();
    let progress = spawn_progress(&events);
    let orchestrator = ChecklistOrchestrator::from_config(config, backend, events)?;

    let result = run_check(&orchestrator, change, checklist, sink).await;
    // Closing the channel ends the progress task.
    drop(orchestrator);
    let _ = progress.await;
    let result = result?;

    let totals = usage.totals();
    tracing::info!(
        llm_requests = totals.requests,
        input_tokens = totals.input_tokens,
        output_tokens = totals.output_tokens,
        failed_rules = result.report.failures().count(),
        exit = result.exit.code(),
        "Check finished"
    );
    Ok(result)
}

/// Resolve the provider from the environment and pin the model.
fn build_backend(
    kind: BackendKind,
    config: &PipelineConfig,
    usage: UsageTracker,
) -> anyhow::Result<Arc<dyn ReasoningBackend>> {
    let (client, default_model, provider) = match kind {
        BackendKind::Openai => {
            let adapter = OpenAiAdapter::from_env()?;
            let model = adapter.default_model().to_string();
            (LlmClient::new().with_provider(adapter), model, "openai")
        }
        BackendKind::Anthropic => {
            let adapter = AnthropicAdapter::from_env()?;
            let model = adapter.default_model().to_string();
            (LlmClient::new().with_provider(adapter), model, "anthropic")
        }
        BackendKind::Ollama => {
            let adapter = OllamaAdapter::from_env();
            let model = adapter.default_model().to_string();
            (LlmClient::new().with_provider(adapter), model, "ollama")
        }
    };
    let client = client
        .with_middleware(LoggingMiddleware)
        .with_middleware(usage);
    let model = config.model.clone().unwrap_or(default_model);
    let mut backend = LlmBackend::new(client, model, Some(provider.to_string()))?;
    if let Some(max_tokens) = config.max_tokens {
        backend = backend.with_max_tokens(max_tokens);
    }
    tracing::info!(provider, model = backend.model(), max_tokens = ?config.max_tokens, "Using reasoning backend");
    Ok(Arc::new(backend))
}

/// Print one progress line per item to stderr.
fn spawn_progress(events: &EventEmitter) -> tokio::task::JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match rx.recv().await {
                Ok(ChecklistEvent::ItemStarted { index, rule }) => {
                    eprintln!("[{}] {}", index + 1, rule);
                }
                Ok(ChecklistEvent::ItemCompleted {
                    index,
                    outcome,
                    duration_ms,
                }) => {
                    eprintln!("[{}] -> {} ({} ms)", index + 1, outcome, duration_ms);
                }
                Ok(ChecklistEvent::ItemsSkipped { count, .. }) => {
                    eprintln!("Skipped {count} remaining rule(s)");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn write_json(path: Option<&Path>, result: &RunResult) -> anyhow::Result<()> {
    if let Some(path) = path {
        std::fs::write(path, serde_json::to_string_pretty(&result.report)?)?;
        tracing::info!(path = %path.display(), "Report JSON written");
    }
    Ok(())
}
