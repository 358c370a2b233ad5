//! Whole-file JSON batch storage + HTTP fetch utilities for wmate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info_span, warn};
use uuid::Uuid;
use wmate_core::{
    CrawlCheckpoint, DetailBatch, EnrichmentBatch, Snapshot, TargetFlagsBatch,
};

pub const CRATE_NAME: &str = "wmate-storage";

pub const SNAPSHOT_FILE: &str = "welfare-snapshot.json";
pub const DETAIL_FILE: &str = "welfare-detail.json";
pub const DETAIL_SAMPLE_FILE: &str = "welfare-detail-sample.json";
pub const ENRICHED_FILE: &str = "welfare-enriched.json";
pub const GENERATED_FILE: &str = "welfare-ai.json";
pub const TARGETS_FILE: &str = "welfare-targets.json";
pub const CHECKPOINT_FILE: &str = "welfare-crawl-checkpoint.json";

/// Durable store for the pipeline's batch artifacts. Every write is a
/// whole-file replacement via temp file + atomic rename, so a crash never
/// leaves a half-written batch behind.
#[derive(Debug, Clone)]
pub struct BatchStore {
    data_dir: PathBuf,
}

impl BatchStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }

    /// Read a JSON artifact, treating a missing or unparsable file as
    /// absent. Corruption is logged and the pipeline proceeds fresh.
    async fn read_opt<T: DeserializeOwned>(&self, file: &str) -> anyhow::Result<Option<T>> {
        let path = self.path(file);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading {}", path.display()))
            }
        };
        match serde_json::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(file, %err, "discarding unparsable batch file");
                Ok(None)
            }
        }
    }

    async fn write_atomic<T: Serialize>(&self, file: &str, value: &T) -> anyhow::Result<()> {
        let path = self.path(file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating data directory {}", parent.display()))?;
        }

        let bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("serializing {file}"))?;

        let temp_path = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!(".{}.{}.tmp", file, Uuid::new_v4()));

        let mut f = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp file {}", temp_path.display()))?;
        f.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;
        f.flush()
            .await
            .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
        drop(f);

        match fs::rename(&temp_path, &path).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "atomically renaming {} -> {}",
                        temp_path.display(),
                        path.display()
                    )
                })
            }
        }
    }

    pub async fn load_snapshot(&self) -> anyhow::Result<Option<Snapshot>> {
        self.read_opt(SNAPSHOT_FILE).await
    }

    pub async fn save_snapshot(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        self.write_atomic(SNAPSHOT_FILE, snapshot).await
    }

    pub async fn load_detail(&self, sample: bool) -> anyhow::Result<Option<DetailBatch>> {
        let file = if sample { DETAIL_SAMPLE_FILE } else { DETAIL_FILE };
        self.read_opt(file).await
    }

    pub async fn save_detail(&self, batch: &DetailBatch, sample: bool) -> anyhow::Result<()> {
        let file = if sample { DETAIL_SAMPLE_FILE } else { DETAIL_FILE };
        self.write_atomic(file, batch).await
    }

    /// Rule-based enrichment batch.
    pub async fn load_enriched(&self) -> anyhow::Result<Option<EnrichmentBatch>> {
        self.read_opt(ENRICHED_FILE).await
    }

    pub async fn save_enriched(&self, batch: &EnrichmentBatch) -> anyhow::Result<()> {
        self.write_atomic(ENRICHED_FILE, batch).await
    }

    /// Output of the optional external generative pass, same schema.
    pub async fn load_generated(&self) -> anyhow::Result<Option<EnrichmentBatch>> {
        self.read_opt(GENERATED_FILE).await
    }

    pub async fn load_targets(&self) -> anyhow::Result<Option<TargetFlagsBatch>> {
        self.read_opt(TARGETS_FILE).await
    }

    pub async fn save_targets(&self, batch: &TargetFlagsBatch) -> anyhow::Result<()> {
        self.write_atomic(TARGETS_FILE, batch).await
    }

    pub async fn load_checkpoint(&self) -> anyhow::Result<Option<CrawlCheckpoint>> {
        self.read_opt(CHECKPOINT_FILE).await
    }

    pub async fn save_checkpoint(&self, checkpoint: &CrawlCheckpoint) -> anyhow::Result<()> {
        self.write_atomic(CHECKPOINT_FILE, checkpoint).await
    }

    pub async fn delete_checkpoint(&self) -> anyhow::Result<()> {
        let path = self.path(CHECKPOINT_FILE);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("deleting {}", path.display()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Sequential HTTP client for the pipeline. The crawl orchestrator is the
/// single caller at any time; back-pressure is its inter-request delay,
/// so no concurrency limiting lives here.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    /// GET a page as text, retrying retryable failures with backoff.
    pub async fn fetch_text(&self, run_id: Uuid, url: &str) -> Result<String, FetchError> {
        let span = info_span!("http_fetch", %run_id, url);
        let _guard = span.enter();

        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            let resp_result = self
                .client
                .get(url)
                .header("Accept", "text/html,application/xhtml+xml,application/json")
                .header("Accept-Language", "ko-KR,ko;q=0.9")
                .send()
                .await;

            match resp_result {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        return Ok(resp.text().await?);
                    }

                    let disposition = classify_status(status);
                    if disposition == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    let disposition = classify_reqwest_error(&err);
                    if disposition == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(FetchError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;
    use wmate_core::CrawlCheckpoint;

    #[tokio::test]
    async fn snapshot_round_trips_through_store() {
        let dir = tempdir().expect("tempdir");
        let store = BatchStore::new(dir.path());

        assert!(store.load_snapshot().await.unwrap().is_none());

        let snapshot = Snapshot::new(Utc::now(), Vec::new());
        store.save_snapshot(&snapshot).await.unwrap();

        let loaded = store.load_snapshot().await.unwrap().unwrap();
        assert_eq!(loaded.version, snapshot.version);
        assert_eq!(loaded.total_count, 0);
    }

    #[tokio::test]
    async fn corrupt_batch_file_is_treated_as_absent() {
        let dir = tempdir().expect("tempdir");
        let store = BatchStore::new(dir.path());

        tokio::fs::write(dir.path().join(SNAPSHOT_FILE), b"{not json")
            .await
            .unwrap();

        assert!(store.load_snapshot().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn checkpoint_delete_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let store = BatchStore::new(dir.path());

        store.delete_checkpoint().await.unwrap();

        let checkpoint = CrawlCheckpoint {
            last_processed_index: 99,
            pending_ids: vec!["A".to_string()],
            items: Default::default(),
        };
        store.save_checkpoint(&checkpoint).await.unwrap();
        assert_eq!(
            store
                .load_checkpoint()
                .await
                .unwrap()
                .unwrap()
                .last_processed_index,
            99
        );

        store.delete_checkpoint().await.unwrap();
        assert!(store.load_checkpoint().await.unwrap().is_none());
        store.delete_checkpoint().await.unwrap();
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }
}
