//! Querygate CLI
//!
//! - `ingest-schema`: describe allow-listed schemas (and the metrics file)
//!   into cards and add them to the similarity index
//! - `ask`: answer a question through the validated read-only SQL pipeline
//!
//! Answers go to stdout; logs and diagnostics go to stderr.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use querygate_index::SimilarityIndex;
use querygate_pipeline::{
    Pipeline, PipelineOutcome, PipelineRun, SchemaIngestor, TtlCache,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod backends;
mod config;
mod logging;
mod pg;

use config::{split_list, Settings};
use pg::PostgresEngine;

#[derive(Parser)]
#[command(name = "querygate")]
#[command(author, version, about = "Natural-language questions answered with gated read-only SQL")]
struct Cli {
    /// Debug-level logs on stderr (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Describe schemas into cards and insert them into the similarity index.
    IngestSchema {
        /// Comma-separated schemas; each must be in QUERYGATE_ALLOWED_SCHEMAS
        #[arg(long, required = true)]
        schemas: String,
        /// Sample rows appended to each table card (capped by the row cap)
        #[arg(long, default_value_t = 0)]
        samples: u64,
        /// Metrics YAML file (defaults to QUERYGATE_METRICS_PATH)
        #[arg(long)]
        metrics: Option<PathBuf>,
    },

    /// Answer a question.
    Ask {
        /// The question (remaining words are joined with spaces)
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
        /// Print the full run record as JSON instead of the answer
        #[arg(long)]
        json: bool,
        /// Override QUERYGATE_MAX_REGENERATIONS
        #[arg(long)]
        max_regenerations: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let settings = Settings::from_env().context("loading configuration")?;
    match cli.command {
        Commands::IngestSchema {
            schemas,
            samples,
            metrics,
        } => cmd_ingest_schema(&settings, &schemas, samples, metrics).await,
        Commands::Ask {
            question,
            json,
            max_regenerations,
        } => cmd_ask(&settings, &question.join(" "), json, max_regenerations).await,
    }
}

async fn connect(settings: &Settings) -> Result<Arc<PostgresEngine>> {
    let engine = PostgresEngine::connect(&settings.database_url)
        .await
        .context("connecting to PostgreSQL")?;
    Ok(Arc::new(engine))
}

fn open_index(settings: &Settings) -> Result<Arc<SimilarityIndex>> {
    let embedder = backends::embedding_service(settings)?;
    Ok(Arc::new(SimilarityIndex::new(
        settings.index_paths(),
        embedder,
    )))
}

async fn cmd_ingest_schema(
    settings: &Settings,
    schemas: &str,
    samples: u64,
    metrics: Option<PathBuf>,
) -> Result<()> {
    let schemas = split_list(schemas);
    if schemas.is_empty() {
        return Err(anyhow!("--schemas must name at least one schema"));
    }
    // Fail on the allow-list before opening any connection.
    if let Some(bad) = schemas
        .iter()
        .find(|s| !settings.allowed_schemas.contains(s))
    {
        return Err(anyhow!(
            "schema {bad:?} is not in the allow-list {:?}",
            settings.allowed_schemas
        ));
    }

    let engine = connect(settings).await?;
    let index = open_index(settings)?;
    let ingestor = SchemaIngestor::new(
        engine.clone(),
        engine,
        index,
        settings.allowed_schemas.clone(),
        settings.max_sql_rows,
    )
    .with_sample_timeout(Duration::from_millis(settings.preview_timeout_ms));

    let metrics_path = metrics.unwrap_or_else(|| settings.metrics_path.clone());
    let report = ingestor
        .ingest(&schemas, samples, Some(&metrics_path))
        .await
        .context("ingesting schema cards")?;

    println!(
        "Ingested {} schema/metric cards ({} tables, {} metrics).",
        report.inserted, report.tables, report.metrics
    );
    Ok(())
}

async fn cmd_ask(
    settings: &Settings,
    question: &str,
    json: bool,
    max_regenerations: Option<u32>,
) -> Result<()> {
    let question = question.trim();
    if question.is_empty() {
        return Err(anyhow!("the question is empty"));
    }

    let mut config = settings.pipeline_config();
    if let Some(n) = max_regenerations {
        config.max_regenerations = n;
    }

    let engine = connect(settings).await?;
    let index = open_index(settings)?;
    let completion = backends::completion_service(settings)?;
    let pipeline = Pipeline::new(config, completion, index, engine.clone(), engine)
        .context("building the pipeline")?
        .with_retrieval_cache(Arc::new(TtlCache::new(64, Duration::from_secs(600))));

    let run = pipeline.run(question).await.context("answering the question")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&run.state)?);
    }
    report(&run, json)
}

fn report(run: &PipelineRun, json: bool) -> Result<()> {
    match &run.outcome {
        PipelineOutcome::Answered { answer } => {
            if !json {
                println!("{answer}");
            }
            Ok(())
        }
        PipelineOutcome::Rejected {
            gate,
            reasons,
            suggested_patch,
            attempts,
        } => {
            eprintln!(
                "{} by the {} after {} candidate(s):",
                "Rejected".red().bold(),
                gate.to_string().yellow(),
                attempts
            );
            for reason in reasons {
                eprintln!("  - {reason}");
            }
            if let Some(patch) = suggested_patch {
                eprintln!("  {} {patch}", "suggestion:".cyan());
            }
            if let Some(candidate) = &run.state.sql {
                eprintln!("  last SQL (revision {}):\n{}", candidate.revision, candidate.text.dimmed());
            }
            Err(anyhow!("no query passed validation"))
        }
    }
}
