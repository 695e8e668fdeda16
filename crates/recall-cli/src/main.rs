use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use recall_core::{RangeSelector, SourceAgency};
use recall_ingest::{build_scheduler, store_from_env, IngestPipeline, PipelineConfig};
use recall_store::StoreHandle;

#[derive(Debug, Parser)]
#[command(name = "recall-cli")]
#[command(about = "Recall aggregation pipeline command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch and ingest recalls for the given sources.
    Ingest {
        /// Source to ingest; repeatable. Defaults to the enabled sources
        /// from the registry file.
        #[arg(long = "source")]
        sources: Vec<String>,
        #[arg(long, default_value = "week")]
        range: String,
        /// Use an in-memory store instead of DATABASE_URL.
        #[arg(long)]
        ephemeral: bool,
    },
    /// Serve the operational HTTP API.
    Serve {
        #[arg(long, default_value_t = 8000)]
        port: u16,
        #[arg(long)]
        ephemeral: bool,
    },
    /// Show recent ingestion runs.
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

async fn build_store(config: &PipelineConfig, ephemeral: bool) -> StoreHandle {
    if ephemeral {
        StoreHandle::in_memory()
    } else {
        store_from_env(config).await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env();

    match cli.command.unwrap_or(Commands::Runs { limit: 20 }) {
        Commands::Ingest {
            sources,
            range,
            ephemeral,
        } => {
            let Some(range) = RangeSelector::parse(&range) else {
                bail!("unknown range: {range} (expected day, week, month, or all)");
            };

            let store = build_store(&config, ephemeral).await;
            let pipeline = IngestPipeline::new(config, store)?;

            let summaries = if sources.is_empty() {
                pipeline.run_enabled_sources(range).await?
            } else {
                let mut parsed = Vec::with_capacity(sources.len());
                for raw in &sources {
                    match SourceAgency::parse(raw) {
                        Some(source) => parsed.push(source),
                        None => bail!("unknown source: {raw}"),
                    }
                }
                pipeline.run_sources(&parsed, range).await
            };

            for summary in &summaries {
                println!(
                    "{}: status={} fetched={} new={} errors={}{}",
                    summary.source,
                    summary.status.as_str(),
                    summary.records_fetched,
                    summary.records_new,
                    summary.record_errors,
                    summary
                        .error
                        .as_deref()
                        .map(|e| format!(" ({e})"))
                        .unwrap_or_default()
                );
            }
        }
        Commands::Serve { port, ephemeral } => {
            let store = build_store(&config, ephemeral).await;
            let pipeline = Arc::new(IngestPipeline::new(config, store)?);

            if let Some(scheduler) = build_scheduler(pipeline.clone()).await? {
                scheduler.start().await?;
            }
            recall_web::serve(pipeline, port).await?;
        }
        Commands::Runs { limit } => {
            let store = store_from_env(&config).await;
            let backing = store
                .get()
                .map_err(|err| anyhow::anyhow!("{err}; set DATABASE_URL"))?;
            let runs = backing.recent_runs(limit).await?;
            if runs.is_empty() {
                println!("no runs recorded");
            }
            for run in runs {
                println!(
                    "{} {} started={} status={} fetched={} new={} errors={}{}",
                    run.id,
                    run.source,
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.status.as_str(),
                    run.records_fetched,
                    run.records_new,
                    run.record_errors,
                    run.error
                        .as_deref()
                        .map(|e| format!(" ({e})"))
                        .unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}
