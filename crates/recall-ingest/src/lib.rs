//! Dataset builder: orchestrates fetch, dedup, normalization, entity
//! resolution, and persistence, and records one audit run per source.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

use recall_core::normalize::{build_search_text, extract_keywords, slugify};
use recall_core::{
    RangeSelector, RawAnnouncement, RawRecallRecord, RecallEvent, RunStatus, SourceAgency,
};
use recall_sources::{fetcher_for, SourceFetcher};
use recall_store::{
    content_hash, FetchClient, FetchClientConfig, PgStore, RunCounts, StoreError, StoreHandle,
};

pub mod debug;
pub mod resolver;

pub const CRATE_NAME: &str = "recall-ingest";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: Option<String>,
    pub registry_path: PathBuf,
    pub scheduler_enabled: bool,
    pub ingest_cron: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub max_run_secs: u64,
    pub debug_sample_limit: usize,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            registry_path: std::env::var("RECALL_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("sources.yaml")),
            scheduler_enabled: std::env::var("RECALL_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            ingest_cron: std::env::var("RECALL_INGEST_CRON")
                .unwrap_or_else(|_| "0 0 6 * * *".to_string()),
            user_agent: std::env::var("RECALL_USER_AGENT")
                .unwrap_or_else(|_| "recall-pipeline/0.1".to_string()),
            http_timeout_secs: std::env::var("RECALL_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            max_run_secs: std::env::var("RECALL_MAX_RUN_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            debug_sample_limit: std::env::var("RECALL_DEBUG_SAMPLE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        }
    }
}

/// Builds the durable store described by the config: Postgres when a
/// DATABASE_URL is present and reachable, otherwise an unconfigured handle
/// whose operations report the store as unavailable.
pub async fn store_from_env(config: &PipelineConfig) -> StoreHandle {
    let Some(url) = &config.database_url else {
        return StoreHandle::unconfigured();
    };
    match PgStore::connect(url).await {
        Ok(store) => {
            if let Err(err) = store.run_migrations().await {
                warn!(error = %err, "database migrations failed; continuing without a datastore");
                return StoreHandle::unconfigured();
            }
            StoreHandle::new(Arc::new(store))
        }
        Err(err) => {
            warn!(error = %err, "database unavailable; continuing without a datastore");
            StoreHandle::unconfigured()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    pub source: SourceAgency,
    pub display_name: String,
    pub enabled: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SourceRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn enabled_sources(&self) -> Vec<SourceAgency> {
        self.sources
            .iter()
            .filter(|entry| entry.enabled)
            .map(|entry| entry.source)
            .collect()
    }
}

/// Per-source result of one pipeline execution.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRunSummary {
    pub source: SourceAgency,
    pub run_id: Option<Uuid>,
    pub status: RunStatus,
    pub records_fetched: i64,
    pub records_new: i64,
    pub record_errors: i64,
    pub error: Option<String>,
}

impl SourceRunSummary {
    fn failed(source: SourceAgency, run_id: Option<Uuid>, error: String) -> Self {
        Self {
            source,
            run_id,
            status: RunStatus::Failed,
            records_fetched: 0,
            records_new: 0,
            record_errors: 0,
            error: Some(error),
        }
    }
}

/// Outcome of pushing one batch of raw announcements through dedup,
/// normalization, resolution, and persistence.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub fetched: i64,
    pub new_records: i64,
    pub duplicates: i64,
    pub record_errors: i64,
    pub failure: Option<StoreError>,
}

impl BatchOutcome {
    pub fn counts(&self) -> RunCounts {
        RunCounts {
            fetched: self.fetched,
            new_records: self.new_records,
            record_errors: self.record_errors,
        }
    }

    pub fn status(&self) -> RunStatus {
        if self.failure.is_some() {
            RunStatus::Failed
        } else if self.record_errors > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Succeeded
        }
    }
}

/// Ingest a batch of raw announcements, possibly spanning sources.
///
/// Per record: content hash, ledger dedup check, title requirement, payload
/// detail parse, company resolution, category assignment, then the atomic
/// record-plus-event write. Malformed records are logged and counted
/// without aborting the batch; a store failure stops the batch and marks
/// the outcome failed.
pub async fn ingest_batch(
    store: &StoreHandle,
    announcements: Vec<RawAnnouncement>,
    fetched_at: DateTime<Utc>,
) -> BatchOutcome {
    let mut outcome = BatchOutcome {
        fetched: announcements.len() as i64,
        ..Default::default()
    };

    let backing = match store.get() {
        Ok(backing) => backing,
        Err(err) => {
            outcome.failure = Some(err);
            return outcome;
        }
    };

    let mut fetchers: HashMap<SourceAgency, Box<dyn SourceFetcher>> = HashMap::new();

    for raw in announcements {
        let hash = content_hash(&raw);

        match backing.record_exists(&hash).await {
            Ok(true) => {
                outcome.duplicates += 1;
                continue;
            }
            Ok(false) => {}
            Err(err) => {
                outcome.failure = Some(err);
                break;
            }
        }

        if raw.title.trim().is_empty() {
            warn!(
                source = raw.source.as_str(),
                record_id = %raw.source_record_id,
                "skipping record without a title"
            );
            outcome.record_errors += 1;
            continue;
        }

        let fetcher = fetchers
            .entry(raw.source)
            .or_insert_with(|| fetcher_for(raw.source));
        let details = match fetcher.parse_payload(&raw.payload) {
            Ok(details) => details,
            Err(err) => {
                warn!(
                    source = raw.source.as_str(),
                    record_id = %raw.source_record_id,
                    error = %err,
                    "skipping unparseable record"
                );
                outcome.record_errors += 1;
                continue;
            }
        };

        let resolved = match resolver::resolve_company(backing, &details.company_name).await {
            Ok(resolved) => resolved,
            Err(err) => {
                outcome.failure = Some(err);
                break;
            }
        };

        let keyword_seed = match &details.summary {
            Some(summary) => format!("{} {}", raw.title, summary),
            None => raw.title.clone(),
        };
        let mut event = RecallEvent {
            id: Uuid::new_v4(),
            title: raw.title.clone(),
            summary: details.summary,
            category: raw.source.category(),
            source: raw.source,
            raw_company_name: details.company_name,
            normalized_company_name: resolved.canonical,
            brand_names: details.brand_names,
            product_keywords: extract_keywords(&keyword_seed),
            source_identifiers: details.identifiers,
            slug: slugify(&raw.title),
            search_text: String::new(),
            published_at: raw.published_at,
            raw_record_hash: hash.clone(),
        };
        event.search_text = build_search_text(&event);

        let record = RawRecallRecord {
            source: raw.source,
            source_record_id: raw.source_record_id,
            content_hash: hash,
            fetched_at,
            published_at: raw.published_at,
            title: raw.title,
            payload: raw.payload,
        };

        match backing.insert_record_with_event(&record, &event).await {
            Ok(()) => outcome.new_records += 1,
            // A concurrent run ingested the same record between our dedup
            // check and the write; the ledger constraint settles it.
            Err(StoreError::Duplicate(_)) => outcome.duplicates += 1,
            Err(err) => {
                outcome.failure = Some(err);
                break;
            }
        }
    }

    outcome
}

async fn run_single_source(
    store: StoreHandle,
    http: Arc<FetchClient>,
    source: SourceAgency,
    range: RangeSelector,
    max_run: Duration,
) -> SourceRunSummary {
    let backing = match store.get() {
        Ok(backing) => backing,
        Err(err) => return SourceRunSummary::failed(source, None, err.to_string()),
    };

    let run_id = match backing.start_run(source).await {
        Ok(id) => id,
        Err(err) => return SourceRunSummary::failed(source, None, err.to_string()),
    };

    let window = range.window();
    let fetcher = fetcher_for(source);
    let bounded = timeout(max_run, async {
        let announcements = fetcher.fetch(&http, &window).await?;
        Ok::<BatchOutcome, recall_sources::SourceError>(
            ingest_batch(&store, announcements, Utc::now()).await,
        )
    })
    .await;

    let (status, counts, error) = match bounded {
        Err(_elapsed) => (
            RunStatus::Failed,
            RunCounts::default(),
            Some(format!("run exceeded {}s deadline", max_run.as_secs())),
        ),
        Ok(Err(fetch_err)) => (
            RunStatus::Failed,
            RunCounts::default(),
            Some(fetch_err.to_string()),
        ),
        Ok(Ok(outcome)) => {
            let error = outcome.failure.as_ref().map(ToString::to_string);
            (outcome.status(), outcome.counts(), error)
        }
    };

    if let Err(err) = backing
        .finish_run(run_id, status, counts, error.as_deref())
        .await
    {
        warn!(source = source.as_str(), error = %err, "could not record job run outcome");
    }

    SourceRunSummary {
        source,
        run_id: Some(run_id),
        status,
        records_fetched: counts.fetched,
        records_new: counts.new_records,
        record_errors: counts.record_errors,
        error,
    }
}

pub struct IngestPipeline {
    config: PipelineConfig,
    store: StoreHandle,
    http: Arc<FetchClient>,
}

impl IngestPipeline {
    pub fn new(config: PipelineConfig, store: StoreHandle) -> Result<Self> {
        let http = FetchClient::new(FetchClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        Ok(Self {
            config,
            store,
            http: Arc::new(http),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Run the pipeline for each requested source. Sources are independent:
    /// they execute concurrently, and one source failing never aborts the
    /// others.
    pub async fn run_sources(
        &self,
        sources: &[SourceAgency],
        range: RangeSelector,
    ) -> Vec<SourceRunSummary> {
        let mut join_set = JoinSet::new();
        for (index, source) in sources.iter().copied().enumerate() {
            let store = self.store.clone();
            let http = self.http.clone();
            let max_run = Duration::from_secs(self.config.max_run_secs);
            join_set.spawn(async move {
                (
                    index,
                    run_single_source(store, http, source, range, max_run).await,
                )
            });
        }

        let mut summaries: Vec<Option<SourceRunSummary>> =
            sources.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, summary)) => summaries[index] = Some(summary),
                Err(err) => warn!(error = %err, "ingest task panicked"),
            }
        }
        summaries.into_iter().flatten().collect()
    }

    pub async fn run_enabled_sources(&self, range: RangeSelector) -> Result<Vec<SourceRunSummary>> {
        let registry = SourceRegistry::load(&self.config.registry_path)?;
        let sources = registry.enabled_sources();
        info!(count = sources.len(), "running ingest for enabled sources");
        Ok(self.run_sources(&sources, range).await)
    }
}

/// Opt-in periodic ingestion. The caller owns the returned scheduler and is
/// responsible for starting and shutting it down.
pub async fn build_scheduler(pipeline: Arc<IngestPipeline>) -> Result<Option<JobScheduler>> {
    if !pipeline.config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = pipeline.config.ingest_cron.clone();
    let job_pipeline = pipeline.clone();
    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let pipeline = job_pipeline.clone();
        Box::pin(async move {
            match pipeline.run_enabled_sources(RangeSelector::Day).await {
                Ok(summaries) => {
                    info!(sources = summaries.len(), "scheduled ingest run finished")
                }
                Err(err) => warn!(error = %err, "scheduled ingest run failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
