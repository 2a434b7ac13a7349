//! Sync pipeline orchestration: count probes, the crawl gate, the crawl itself and the upload.

mod config;
mod crawl;
mod decision;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use billtrack_adapters::{probe_source_count, PageSource};
use billtrack_core::{CountObservation, SyncDecision};
use billtrack_storage::{
    backup_dir, restore_dir, BackupReport, HttpClientConfig, HttpFetcher, RecordSink, StateStore,
};
use billtrack_vector::{
    probe_destination, Embedder, HashEmbedder, OpenAiConfig, OpenAiEmbedder, PineconeClient,
    PineconeConfig, UploadConfig, UploadReport, UploadSynchronizer, VectorStore,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use config::{ProbeFailurePolicy, SyncConfig, SyncInput, DEFAULT_MAX_REQUESTS_PER_CRAWL};
pub use crawl::{CrawlConfig, CrawlError, CrawlReport, CrawlRequest, Crawler};
pub use decision::{decide, GateOutcome, SyncGate};

pub const CRATE_NAME: &str = "billtrack-sync";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub previous_source_count: Option<u64>,
    pub source_count: Option<u64>,
    pub destination_count: Option<u64>,
    pub decision: SyncDecision,
    pub skipped_reason: Option<String>,
    pub crawl: Option<CrawlReport>,
    pub upload: Option<UploadReport>,
    /// Records crawled by this run that the decision kept out of the index.
    pub upload_deferred_records: usize,
    pub reports_dir: String,
}

impl SyncRunSummary {
    pub fn new_titles(&self) -> &[String] {
        self.crawl
            .as_ref()
            .map(|c| c.new_titles.as_slice())
            .unwrap_or_default()
    }
}

/// Counts and the decision they would produce, without side effects.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountCheck {
    pub source_count: Option<u64>,
    pub destination_count: Option<u64>,
    pub previous_source_count: Option<u64>,
    pub decision: SyncDecision,
}

pub struct SyncPipeline {
    config: SyncConfig,
    source: Arc<dyn PageSource>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl SyncPipeline {
    /// Builds the HTTP fetcher, the Pinecone client and the embedder from configuration.
    pub fn new(config: SyncConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            per_host_limit: config.max_concurrency,
            ..Default::default()
        })?;

        let api_key = config
            .pinecone_api_key
            .clone()
            .context("PINECONE_API_KEY must be set")?;
        let mut pinecone = PineconeConfig::new(api_key);
        if let Some(url) = &config.pinecone_control_url {
            pinecone.control_url = url.clone();
        }
        let store = PineconeClient::new(pinecone).context("building Pinecone client")?;

        let embedder: Arc<dyn Embedder> = match &config.openai_api_key {
            Some(key) => {
                let mut openai = OpenAiConfig::new(key.clone());
                openai.dimension = config.index_dimension as usize;
                if let Some(base) = &config.openai_base_url {
                    openai.base_url = base.clone();
                }
                if let Some(model) = &config.openai_model {
                    openai.model = model.clone();
                }
                Arc::new(OpenAiEmbedder::new(openai).context("building embeddings client")?)
            }
            None => {
                warn!("OPENAI_API_KEY not set; using local hash embeddings");
                Arc::new(HashEmbedder::new(config.index_dimension as usize))
            }
        };

        Ok(Self::with_components(
            config,
            Arc::new(http),
            Arc::new(store),
            embedder,
        ))
    }

    pub fn with_components(
        config: SyncConfig,
        source: Arc<dyn PageSource>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            config,
            source,
            store,
            embedder,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    fn state_store(&self) -> StateStore {
        StateStore::new(self.config.state_dir())
    }

    fn uploader(&self) -> UploadSynchronizer {
        let mut upload = UploadConfig::new(self.config.index_spec());
        upload.settle_delay = self.config.index_settle_delay();
        UploadSynchronizer::new(Arc::clone(&self.store), Arc::clone(&self.embedder), upload)
    }

    pub async fn run_once(&self, input: &SyncInput) -> Result<SyncRunSummary> {
        let run_id = Uuid::new_v4();
        self.run_inner(run_id, input)
            .instrument(info_span!("sync_run", %run_id))
            .await
    }

    async fn run_inner(&self, run_id: Uuid, input: &SyncInput) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let state = self.state_store();
        let gate = SyncGate::new(state.clone(), self.config.probe_failure_policy);

        let source = probe_source_count(
            self.source.as_ref(),
            &self.config.source_url,
            self.config.count_mode,
        )
        .await;
        let destination = probe_destination(self.store.as_ref(), &self.config.index_name).await;
        if let Some(snapshot) = &destination.snapshot {
            if let Err(err) = state.save_destination_snapshot(snapshot).await {
                warn!(error = %err, "could not save destination snapshot");
            }
        }

        let outcome = gate
            .evaluate(&source, &destination.observation, input.force_run)
            .await
            .context("recording sync state")?;
        let decision = outcome.decision;

        let sink = Arc::new(
            RecordSink::open(self.config.sink_dir())
                .await
                .context("opening dataset")?,
        );

        let crawl = if decision.should_crawl {
            info!(
                start_urls = input.start_urls.len(),
                budget = input.max_requests_per_crawl,
                "starting crawl"
            );
            let crawler = Crawler::new(
                Arc::clone(&self.source),
                Arc::clone(&sink),
                CrawlConfig {
                    max_requests: input.max_requests_per_crawl,
                    max_concurrency: self.config.max_concurrency,
                    page_timeout: Duration::from_secs(60),
                },
            );
            Some(crawler.run(&input.start_urls).await.context("crawling bills")?)
        } else {
            info!("no new bills; skipping crawl");
            None
        };
        let crawled = crawl.as_ref().map_or(0, |c| c.new_titles.len());

        let mut upload_deferred_records = 0;
        let upload = if input.skip_upload {
            info!("upload disabled for this run");
            None
        } else if decision.should_upload {
            let records = sink.records().await.context("reading dataset")?;
            info!(records = records.len(), "uploading dataset");
            Some(
                self.uploader()
                    .upload(&records)
                    .await
                    .context("uploading to vector index")?,
            )
        } else {
            if crawled > 0 {
                upload_deferred_records = crawled;
                warn!(
                    records = crawled,
                    destination = decision.destination_count,
                    "destination index is not empty; new records were not uploaded"
                );
            } else {
                info!("destination index already populated; skipping upload");
            }
            None
        };

        let finished_at = Utc::now();
        let reports_dir = self.config.reports_dir.join(run_id.to_string());
        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at,
            previous_source_count: outcome.previous.map(|s| s.last_known_source_count),
            source_count: source.count(),
            destination_count: destination.observation.count(),
            decision,
            skipped_reason: outcome.skipped_reason,
            crawl,
            upload,
            upload_deferred_records,
            reports_dir: reports_dir.display().to_string(),
        };
        write_run_summary(&reports_dir, &summary).await?;
        Ok(summary)
    }

    /// Probes both counts and reports the decision a run would take. Leaves all state untouched.
    pub async fn check_counts(&self, force: bool) -> CountCheck {
        let source = probe_source_count(
            self.source.as_ref(),
            &self.config.source_url,
            self.config.count_mode,
        )
        .await;
        let destination = probe_destination(self.store.as_ref(), &self.config.index_name).await;
        let previous = self.state_store().load_sync_state().await;
        let decision = resolve_for_check(
            &source,
            &destination.observation,
            force,
            self.config.probe_failure_policy,
        );
        CountCheck {
            source_count: source.count(),
            destination_count: destination.observation.count(),
            previous_source_count: previous.map(|s| s.last_known_source_count),
            decision,
        }
    }
}

fn resolve_for_check(
    source: &CountObservation,
    destination: &CountObservation,
    force: bool,
    policy: ProbeFailurePolicy,
) -> SyncDecision {
    let mut decision = decide(
        source.count().unwrap_or(0),
        destination.count().unwrap_or(0),
        force,
    );
    let degraded = !source.is_available() || !destination.is_available();
    if !force && degraded && policy == ProbeFailurePolicy::SkipRun {
        decision.should_crawl = false;
        decision.should_upload = false;
        decision.forced = false;
    }
    decision
}

async fn write_run_summary(reports_dir: &Path, summary: &SyncRunSummary) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;
    let path = reports_dir.join("run_summary.json");
    let bytes = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(&path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

pub async fn run_sync_once_from_env(input: &SyncInput) -> Result<SyncRunSummary> {
    let pipeline = SyncPipeline::new(SyncConfig::from_env())?;
    pipeline.run_once(input).await
}

/// Copies new or changed dataset files into the backup directory.
pub async fn backup_dataset(config: &SyncConfig) -> Result<BackupReport> {
    let report = backup_dir(&config.sink_dir(), &config.backup_dir)
        .await
        .context("backing up dataset")?;
    info!(
        copied = report.copied,
        total = report.total,
        backup = %config.backup_dir.display(),
        "dataset backup complete"
    );
    Ok(report)
}

pub async fn restore_dataset(config: &SyncConfig) -> Result<BackupReport> {
    let report = restore_dir(&config.backup_dir, &config.sink_dir())
        .await
        .context("restoring dataset")?;
    info!(
        copied = report.copied,
        total = report.total,
        dataset = %config.sink_dir().display(),
        "dataset restore complete"
    );
    Ok(report)
}

/// Scheduler running one sync per configured cron expression. The caller starts it.
pub async fn build_scheduler(
    pipeline: Arc<SyncPipeline>,
    input: SyncInput,
) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let crons = pipeline.config().sync_crons.clone();
    for cron in &crons {
        let pipeline = Arc::clone(&pipeline);
        let input = input.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            let input = input.clone();
            Box::pin(async move {
                match pipeline.run_once(&input).await {
                    Ok(summary) => info!(
                        run_id = %summary.run_id,
                        new = summary.new_titles().len(),
                        "scheduled sync complete"
                    ),
                    Err(err) => error!(error = %format!("{err:#}"), "scheduled sync failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        info!(cron = %cron, "scheduled sync");
    }
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_under_skip_policy_reports_no_work() {
        let d = resolve_for_check(
            &CountObservation::Observed(10),
            &CountObservation::unavailable("503"),
            false,
            ProbeFailurePolicy::SkipRun,
        );
        assert!(!d.should_crawl && !d.should_upload);

        let d = resolve_for_check(
            &CountObservation::Observed(10),
            &CountObservation::unavailable("503"),
            false,
            ProbeFailurePolicy::AssumeZero,
        );
        assert!(d.should_crawl && d.should_upload);
    }

    #[test]
    fn forced_check_ignores_skip_policy() {
        let d = resolve_for_check(
            &CountObservation::unavailable("timeout"),
            &CountObservation::Observed(80),
            true,
            ProbeFailurePolicy::SkipRun,
        );
        assert!(d.should_crawl && d.should_upload && d.forced);
    }

    #[tokio::test]
    async fn run_summary_is_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let summary = SyncRunSummary {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            previous_source_count: None,
            source_count: Some(89),
            destination_count: Some(80),
            decision: decide(89, 80, false),
            skipped_reason: None,
            crawl: Some(CrawlReport {
                new_titles: vec!["S1".into()],
                ..CrawlReport::default()
            }),
            upload: None,
            upload_deferred_records: 1,
            reports_dir: dir.path().display().to_string(),
        };
        let path = write_run_summary(dir.path(), &summary).await.unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["decision"]["shouldCrawl"], true);
        assert_eq!(value["uploadDeferredRecords"], 1);
        assert_eq!(value["crawl"]["newTitles"][0], "S1");
    }
}
