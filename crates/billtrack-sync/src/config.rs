use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use billtrack_adapters::{CountMode, DEFAULT_LISTING_URL, DEFAULT_SOURCE_URL};
use billtrack_vector::{IndexSpec, DEFAULT_DIMENSION, DEFAULT_INDEX_NAME};
use serde::{Deserialize, Serialize};
use tokio::fs;

pub const DEFAULT_MAX_REQUESTS_PER_CRAWL: usize = 100;

/// How the gate treats a count probe that could not be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeFailurePolicy {
    /// An unavailable count reads as zero. Errs on the side of doing extra work.
    #[default]
    AssumeZero,
    /// Any unavailable count cancels both crawl and upload for the run.
    SkipRun,
}

impl FromStr for ProbeFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "assume-zero" | "assume_zero" => Ok(Self::AssumeZero),
            "skip-run" | "skip_run" => Ok(Self::SkipRun),
            other => Err(format!("unknown probe failure policy {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub storage_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub input_path: PathBuf,
    pub source_url: String,
    /// How the signed-bills statistic is located on the landing page.
    pub count_mode: CountMode,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub max_concurrency: usize,
    pub pinecone_api_key: Option<String>,
    pub pinecone_control_url: Option<String>,
    pub index_name: String,
    pub index_cloud: String,
    pub index_region: String,
    pub index_dimension: u32,
    pub index_settle_secs: u64,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_model: Option<String>,
    pub probe_failure_policy: ProbeFailurePolicy,
    pub sync_crons: Vec<String>,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let path = |key: &str, default: &str| {
            var(key)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(default))
        };
        Self {
            storage_dir: path("BILLTRACK_STORAGE_DIR", "./storage"),
            reports_dir: path("BILLTRACK_REPORTS_DIR", "./reports"),
            backup_dir: path("BILLTRACK_BACKUP_DIR", "./permanent_storage/dataset_backup"),
            input_path: path("BILLTRACK_INPUT", "./input.yaml"),
            source_url: var("BILLTRACK_SOURCE_URL")
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            count_mode: var("BILLTRACK_COUNT_MODE")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            user_agent: var("BILLTRACK_USER_AGENT")
                .unwrap_or_else(|| "billtrack-bot/0.1".to_string()),
            http_timeout_secs: var("BILLTRACK_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            max_concurrency: var("BILLTRACK_MAX_CONCURRENCY")
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(4),
            pinecone_api_key: var("PINECONE_API_KEY"),
            pinecone_control_url: var("PINECONE_CONTROL_URL"),
            index_name: var("PINECONE_INDEX").unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string()),
            index_cloud: var("PINECONE_CLOUD").unwrap_or_else(|| "aws".to_string()),
            index_region: var("PINECONE_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            index_dimension: var("BILLTRACK_INDEX_DIMENSION")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_DIMENSION),
            index_settle_secs: var("BILLTRACK_INDEX_SETTLE_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            openai_api_key: var("OPENAI_API_KEY"),
            openai_base_url: var("OPENAI_BASE_URL"),
            openai_model: var("OPENAI_EMBEDDING_MODEL"),
            probe_failure_policy: var("BILLTRACK_PROBE_FAILURE_POLICY")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            sync_crons: var("BILLTRACK_SCHEDULE_CRON")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_else(|| vec!["0 0 6 * * *".to_string(), "0 0 18 * * *".to_string()]),
        }
    }

    /// Directory of finalized bill records.
    pub fn sink_dir(&self) -> PathBuf {
        self.storage_dir.join("datasets").join("default")
    }

    /// Directory holding the sync state and destination snapshot.
    pub fn state_dir(&self) -> PathBuf {
        self.storage_dir.join("key_value_stores").join("default")
    }

    pub fn index_spec(&self) -> IndexSpec {
        let mut spec = IndexSpec::serverless(self.index_name.clone(), self.index_dimension);
        spec.cloud = self.index_cloud.clone();
        spec.region = self.index_region.clone();
        spec
    }

    pub fn index_settle_delay(&self) -> Duration {
        Duration::from_secs(self.index_settle_secs)
    }
}

/// Per-run options, read from the input file and overridable on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncInput {
    pub start_urls: Vec<String>,
    pub max_requests_per_crawl: usize,
    pub force_run: bool,
    pub skip_upload: bool,
}

impl Default for SyncInput {
    fn default() -> Self {
        Self {
            start_urls: vec![DEFAULT_LISTING_URL.to_string()],
            max_requests_per_crawl: DEFAULT_MAX_REQUESTS_PER_CRAWL,
            force_run: false,
            skip_upload: false,
        }
    }
}

impl SyncInput {
    /// Parses YAML (or JSON) input. An empty `startUrls` falls back to the signed-bills search.
    pub fn parse(text: &str) -> Result<Self> {
        let mut input: Self = if text.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(text).context("parsing sync input")?
        };
        input.start_urls.retain(|u| !u.trim().is_empty());
        if input.start_urls.is_empty() {
            input.start_urls.push(DEFAULT_LISTING_URL.to_string());
        }
        Ok(input)
    }

    /// Reads the input file when present; a missing file yields the defaults.
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        match fs::read_to_string(path).await {
            Ok(text) => {
                Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_follow_storage_layout() {
        let config = SyncConfig::from_lookup(|_| None);
        assert_eq!(
            config.sink_dir(),
            PathBuf::from("./storage/datasets/default")
        );
        assert_eq!(
            config.state_dir(),
            PathBuf::from("./storage/key_value_stores/default")
        );
        assert_eq!(config.index_name, "bill-tracker");
        assert_eq!(config.index_dimension, 1536);
        assert_eq!(config.probe_failure_policy, ProbeFailurePolicy::AssumeZero);
        assert_eq!(config.count_mode, CountMode::Labelled);
        assert_eq!(config.sync_crons.len(), 2);
        assert!(config.pinecone_api_key.is_none());
    }

    #[test]
    fn environment_overrides_are_applied() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("BILLTRACK_STORAGE_DIR", "/tmp/bt"),
            ("BILLTRACK_MAX_CONCURRENCY", "0"),
            ("BILLTRACK_PROBE_FAILURE_POLICY", "skip-run"),
            ("BILLTRACK_COUNT_MODE", "first-statistic"),
            ("BILLTRACK_SCHEDULE_CRON", "0 0 5 * * *, ,0 0 17 * * *"),
            ("PINECONE_API_KEY", "  "),
            ("PINECONE_REGION", "eu-west-1"),
        ]);
        let config = SyncConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.sink_dir(), PathBuf::from("/tmp/bt/datasets/default"));
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.probe_failure_policy, ProbeFailurePolicy::SkipRun);
        assert_eq!(config.count_mode, CountMode::FirstStatistic);
        assert_eq!(config.sync_crons, vec!["0 0 5 * * *", "0 0 17 * * *"]);
        assert!(config.pinecone_api_key.is_none());
        assert_eq!(config.index_spec().region, "eu-west-1");
    }

    #[test]
    fn input_accepts_camel_case_yaml_and_json() {
        let yaml = "startUrls:\n  - https://www.nysenate.gov/search/legislation?type=bill\nmaxRequestsPerCrawl: 5\nforceRun: true\n";
        let input = SyncInput::parse(yaml).unwrap();
        assert_eq!(input.max_requests_per_crawl, 5);
        assert!(input.force_run);
        assert!(!input.skip_upload);

        let json = SyncInput::parse(r#"{"startUrls": [], "skipUpload": true}"#).unwrap();
        assert_eq!(json.start_urls, vec![DEFAULT_LISTING_URL.to_string()]);
        assert_eq!(json.max_requests_per_crawl, 100);
        assert!(json.skip_upload);
    }

    #[tokio::test]
    async fn missing_input_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let input = SyncInput::load_or_default(&dir.path().join("input.yaml"))
            .await
            .unwrap();
        assert_eq!(input, SyncInput::default());
    }
}
