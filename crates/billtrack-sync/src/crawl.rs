//! Two-stage crawl: listing pages yield bill stubs, detail pages complete them into records.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use billtrack_adapters::{
    parse_detail, parse_listing, FetchedPage, ListingPage, PageError, PageSource,
};
use billtrack_core::{BillRecord, BillStub};
use billtrack_storage::{InsertOutcome, RecordSink, SinkError};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlRequest {
    Listing { url: String },
    Detail { url: String, stub: BillStub },
}

impl CrawlRequest {
    /// Unique key used to drop repeated requests within one run.
    pub fn key(&self) -> String {
        match self {
            Self::Listing { url } => format!("listing:{url}"),
            Self::Detail { stub, .. } => format!("detail:{}", stub.title),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Listing { url } | Self::Detail { url, .. } => url,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Upper bound on page fetches (listing and detail combined).
    pub max_requests: usize,
    pub max_concurrency: usize,
    pub page_timeout: Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_requests: crate::DEFAULT_MAX_REQUESTS_PER_CRAWL,
            max_concurrency: 4,
            page_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlReport {
    pub pages_fetched: usize,
    pub listing_pages: usize,
    pub detail_pages: usize,
    pub failed_pages: usize,
    pub skipped_existing: usize,
    pub skipped_entries: usize,
    pub duplicate_requests: usize,
    /// Requests left in the queue when the fetch budget ran out.
    pub dropped_requests: usize,
    pub new_titles: Vec<String>,
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("crawl task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

enum PageOutcome {
    Listing {
        url: String,
        result: Result<ListingPage, PageError>,
    },
    Detail {
        title: String,
        result: Result<InsertOutcome, DetailFailure>,
    },
}

enum DetailFailure {
    Page(PageError),
    Sink(SinkError),
}

/// Walks listing pagination and enriches every new stub, writing records to the sink.
pub struct Crawler {
    source: Arc<dyn PageSource>,
    sink: Arc<RecordSink>,
    config: CrawlConfig,
}

impl Crawler {
    pub fn new(source: Arc<dyn PageSource>, sink: Arc<RecordSink>, config: CrawlConfig) -> Self {
        Self {
            source,
            sink,
            config,
        }
    }

    pub async fn run(&self, start_urls: &[String]) -> Result<CrawlReport, CrawlError> {
        let mut report = CrawlReport::default();
        let mut queue = VecDeque::new();
        let mut seen = HashSet::new();
        for url in start_urls {
            self.enqueue(
                CrawlRequest::Listing { url: url.clone() },
                &mut queue,
                &mut seen,
                &mut report,
            );
        }

        let width = self.config.max_concurrency.max(1);
        let mut in_flight: JoinSet<PageOutcome> = JoinSet::new();

        loop {
            while in_flight.len() < width {
                let Some(request) = queue.pop_front() else {
                    break;
                };
                if let CrawlRequest::Detail { stub, .. } = &request {
                    if self.sink.contains(&stub.title).await {
                        debug!(title = %stub.title, "bill already in dataset");
                        report.skipped_existing += 1;
                        continue;
                    }
                }
                if report.pages_fetched >= self.config.max_requests {
                    report.dropped_requests += queue.len() + 1;
                    warn!(
                        budget = self.config.max_requests,
                        dropped = queue.len() + 1,
                        "request budget exhausted"
                    );
                    queue.clear();
                    break;
                }
                report.pages_fetched += 1;
                self.spawn(request, &mut in_flight);
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            match joined? {
                PageOutcome::Listing { url, result } => match result {
                    Ok(page) => {
                        report.listing_pages += 1;
                        report.skipped_entries += page.skipped_entries;
                        info!(url = %url, bills = page.stubs.len(), "listing page parsed");
                        for stub in page.stubs {
                            let request = CrawlRequest::Detail {
                                url: stub.source_url.clone(),
                                stub,
                            };
                            self.enqueue(request, &mut queue, &mut seen, &mut report);
                        }
                        if let Some(next) = page.next_page {
                            self.enqueue(
                                CrawlRequest::Listing { url: next },
                                &mut queue,
                                &mut seen,
                                &mut report,
                            );
                        }
                    }
                    Err(err) => {
                        report.failed_pages += 1;
                        warn!(url = %url, error = %err, "listing page failed");
                    }
                },
                PageOutcome::Detail { title, result } => match result {
                    Ok(InsertOutcome::Inserted(path)) => {
                        report.detail_pages += 1;
                        info!(title = %title, path = %path.display(), "bill saved");
                        report.new_titles.push(title);
                    }
                    Ok(InsertOutcome::AlreadyPresent) => {
                        report.detail_pages += 1;
                        report.skipped_existing += 1;
                        debug!(title = %title, "bill written concurrently; skipped");
                    }
                    Err(DetailFailure::Page(err)) => {
                        report.failed_pages += 1;
                        warn!(title = %title, error = %err, "detail page failed");
                    }
                    Err(DetailFailure::Sink(err)) => return Err(err.into()),
                },
            }
        }

        info!(
            pages = report.pages_fetched,
            new = report.new_titles.len(),
            existing = report.skipped_existing,
            failed = report.failed_pages,
            "crawl finished"
        );
        Ok(report)
    }

    fn enqueue(
        &self,
        request: CrawlRequest,
        queue: &mut VecDeque<CrawlRequest>,
        seen: &mut HashSet<String>,
        report: &mut CrawlReport,
    ) {
        if seen.insert(request.key()) {
            queue.push_back(request);
        } else {
            report.duplicate_requests += 1;
        }
    }

    fn spawn(&self, request: CrawlRequest, in_flight: &mut JoinSet<PageOutcome>) {
        let source = Arc::clone(&self.source);
        let sink = Arc::clone(&self.sink);
        let timeout = self.config.page_timeout;
        match request {
            CrawlRequest::Listing { url } => {
                let span = info_span!("crawl_listing", url = %url);
                in_flight.spawn(
                    async move {
                        let result = fetch_with_timeout(source.as_ref(), &url, timeout)
                            .await
                            .and_then(|page| parse_listing(&page.url, &page.body));
                        PageOutcome::Listing { url, result }
                    }
                    .instrument(span),
                );
            }
            CrawlRequest::Detail { url, stub } => {
                let span = info_span!("crawl_detail", url = %url, title = %stub.title);
                in_flight.spawn(
                    async move {
                        let title = stub.title.clone();
                        let result =
                            enrich(source.as_ref(), sink.as_ref(), &url, stub, timeout).await;
                        PageOutcome::Detail { title, result }
                    }
                    .instrument(span),
                );
            }
        }
    }
}

async fn fetch_with_timeout(
    source: &dyn PageSource,
    url: &str,
    timeout: Duration,
) -> Result<FetchedPage, PageError> {
    match tokio::time::timeout(timeout, source.fetch_page(url)).await {
        Ok(result) => result,
        Err(_) => Err(PageError::Timeout {
            url: url.to_string(),
        }),
    }
}

async fn enrich(
    source: &dyn PageSource,
    sink: &RecordSink,
    url: &str,
    stub: BillStub,
    timeout: Duration,
) -> Result<InsertOutcome, DetailFailure> {
    let page = fetch_with_timeout(source, url, timeout)
        .await
        .map_err(DetailFailure::Page)?;
    let detail = parse_detail(&page.url, &page.body).map_err(DetailFailure::Page)?;
    let record = BillRecord::from_parts(stub, detail);
    sink.insert_if_absent(&record)
        .await
        .map_err(DetailFailure::Sink)
}
