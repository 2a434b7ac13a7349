use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};

/// Exponential backoff between attempts of one page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Wait before attempt `attempt + 1`, where `attempt` counts from 1.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16) as u32;
        self.initial_delay
            .saturating_mul(1u32 << doublings)
            .min(self.max_delay)
    }
}

/// Server answers worth another try: throttling and 5xx.
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_in_flight: usize,
    pub per_host_limit: usize,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            max_in_flight: 16,
            per_host_limit: 4,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request to {url} failed after {attempts} attempt(s): {source}")]
    Request {
        url: String,
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },
    #[error("http {status} from {url} after {attempts} attempt(s)")]
    HttpStatus {
        status: u16,
        url: String,
        attempts: usize,
    },
    #[error("fetcher is shutting down")]
    Closed,
}

/// Shared client for site pages. Caps requests in flight overall and per host so a wide crawl
/// stays polite to a single origin.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    in_flight: Semaphore,
    per_host_limit: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(agent) = config.user_agent {
            builder = builder.user_agent(agent);
        }
        Ok(Self {
            client: builder.build().context("building page client")?,
            in_flight: Semaphore::new(config.max_in_flight.max(1)),
            per_host_limit: config.per_host_limit.max(1),
            hosts: Mutex::new(HashMap::new()),
            retry: config.retry,
        })
    }

    async fn host_limit(&self, host: &str) -> Arc<Semaphore> {
        let mut hosts = self.hosts.lock().await;
        Arc::clone(
            hosts
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit))),
        )
    }

    /// Fetches `url` as text, retrying throttling, 5xx and connection failures.
    pub async fn fetch_text(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let host_limit = self.host_limit(parsed.host_str().unwrap_or_default()).await;
        let _slot = self.in_flight.acquire().await.map_err(|_| FetchError::Closed)?;
        let _host_slot = host_limit.acquire().await.map_err(|_| FetchError::Closed)?;

        self.fetch_with_retry(parsed)
            .instrument(info_span!("http_fetch", url))
            .await
    }

    async fn fetch_with_retry(&self, url: Url) -> Result<FetchedResponse, FetchError> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let last = attempt >= attempts;
            match self.client.get(url.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    let body = resp.text().await.map_err(|source| FetchError::Request {
                        url: final_url.clone(),
                        attempts: attempt,
                        source,
                    })?;
                    return Ok(FetchedResponse {
                        status,
                        final_url,
                        body,
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    if last || !is_transient_status(status) {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: resp.url().to_string(),
                            attempts: attempt,
                        });
                    }
                    debug!(%status, attempt, "transient status; retrying");
                }
                Err(err) => {
                    if last || !is_transient_error(&err) {
                        return Err(FetchError::Request {
                            url: url.to_string(),
                            attempts: attempt,
                            source: err,
                        });
                    }
                    debug!(error = %err, attempt, "request failed; retrying");
                }
            }
            tokio::time::sleep(self.retry.delay_after(attempt)).await;
        }
    }
}
