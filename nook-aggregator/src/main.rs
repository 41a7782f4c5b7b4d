use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use nook_aggregator::{
    check_lookback_hours, AppConfig, ChatCompletionsBackend, ContentQuery, DatePartitionStore, GenerationBackend,
    GenerationClient, MockGenerationBackend, RunOrchestrator, RunReport, RunRequest, Source,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "nook")]
#[command(about = "Collects, summarizes and stores daily tech content", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $NOOK_CONFIG, then config/nook.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, summarize and persist the selected sources
    Run {
        /// Source to run (repeatable); all enabled sources when omitted
        #[arg(long = "source", value_parser = parse_source)]
        sources: Vec<Source>,

        /// Run date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Override every selected source's lookback window
        #[arg(long)]
        lookback_hours: Option<i64>,

        /// Use the offline generation backend
        #[arg(long)]
        mock_generation: bool,
    },
    /// List sources with stored content
    Sources,
    /// Print one stored partition
    Show {
        #[arg(long, value_parser = parse_source)]
        source: Source,

        /// Partition date, defaults to the latest stored one
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Remove temp files left by interrupted writes
    Sweep,
}

fn parse_source(value: &str) -> std::result::Result<Source, String> {
    value.parse::<Source>().map_err(|e| e.to_string())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    let store = Arc::new(DatePartitionStore::new(config.storage.root.clone()));

    match cli.command {
        Commands::Run {
            sources,
            date,
            lookback_hours,
            mock_generation,
        } => {
            let report = run(&config, store, sources, date, lookback_hours, mock_generation).await?;
            print_report(&report);
            std::process::exit(report.exit_code());
        }
        Commands::Sources => {
            for source in store.list_sources().await? {
                let latest = store
                    .latest_date(source)
                    .await?
                    .map(|d| d.to_string())
                    .unwrap_or_default();
                println!("{:<16} {:<16} latest {}", source.as_str(), source.display_name(), latest);
            }
        }
        Commands::Show { source, date } => {
            let date = match date {
                Some(date) => date,
                None => store
                    .latest_date(source)
                    .await?
                    .with_context(|| format!("no stored content for {}", source))?,
            };
            let items = store.get(source, date).await?;
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        Commands::Sweep => {
            let removed = store.sweep_temp_files().await?;
            println!("Removed {} temp files", removed);
        }
    }

    Ok(())
}

async fn run(
    config: &AppConfig,
    store: Arc<DatePartitionStore>,
    sources: Vec<Source>,
    date: Option<NaiveDate>,
    lookback_hours: Option<i64>,
    mock_generation: bool,
) -> Result<RunReport> {
    let backend: Arc<dyn GenerationBackend> = if mock_generation {
        Arc::new(MockGenerationBackend::new())
    } else {
        Arc::new(ChatCompletionsBackend::from_config(&config.generation).context(
            "generation backend unavailable (set the API key or pass --mock-generation)",
        )?)
    };
    let generation = GenerationClient::new(backend, config.generation.clone());
    info!("Generation backend: {}", generation.backend_name());

    let orchestrator = RunOrchestrator::from_config(config, store, generation)?;

    let mut request = RunRequest::for_sources(sources);
    if let Some(date) = date {
        request = request.on_date(date);
    }
    if let Some(hours) = lookback_hours {
        let lookback = check_lookback_hours(hours).context("invalid --lookback-hours")?;
        let targets = if request.sources.is_empty() {
            orchestrator.registered_sources()
        } else {
            request.sources.clone()
        };
        for source in targets {
            request = request.with_lookback(source, lookback);
        }
    }

    let report = orchestrator.run(request).await;
    if report.exit_code() != 0 {
        error!("Run {} finished with failed sources", report.run_id);
    }
    Ok(report)
}

fn print_report(report: &RunReport) {
    println!("run {} ({}) status {:?}", report.run_id, report.run_date, report.status);
    for result in &report.results {
        println!(
            "  {:<16} fetched {:>3}  added {:>3}  summarized {:>3}  failed {:>3}  truncated {:>3}  {:?} ({} ms)",
            result.source.as_str(),
            result.fetched,
            result.added,
            result.summarized,
            result.summarization_failures,
            result.truncated_inputs,
            result.status,
            result.elapsed_ms
        );
    }
}
