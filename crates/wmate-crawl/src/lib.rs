//! Rate-limited, checkpointed crawler for government detail pages.
//!
//! The orchestrator is strictly sequential. Politeness toward the source
//! portal is the inter-request delay, so no concurrency lives here.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;
use wmate_core::{CrawlCheckpoint, CrawlDetail, DetailBatch, Snapshot, BATCH_VERSION};
use wmate_extract::detail::parse_detail_page;
use wmate_storage::{BatchStore, FetchError, HttpFetcher};

pub const CRATE_NAME: &str = "wmate-crawl";

pub const DEFAULT_DETAIL_BASE_URL: &str = "https://www.gov.kr/portal/rcvfvrSvc/dtlEx";
pub const DEFAULT_CRAWL_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_CHECKPOINT_EVERY: usize = 100;

/// Fixed probe set used to validate parser selectors before a full run.
pub const SAMPLE_SERVICE_IDS: [&str; 5] = [
    "000000465790",
    "105100000001",
    "116010000001",
    "119200000001",
    "119200000007",
];

/// One unit of crawl work: a detail-page id plus the snapshot's upstream
/// modification stamp for that record, when it carries one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlCandidate {
    pub service_id: String,
    pub modified_stamp: Option<String>,
}

/// Candidates derived from a snapshot. Records without a service id are
/// skipped: they can never be associated with a detail page.
pub fn candidates_from_snapshot(snapshot: &Snapshot) -> Vec<CrawlCandidate> {
    let mut candidates: Vec<CrawlCandidate> = Vec::new();
    for record in &snapshot.items {
        let Some(service_id) = record.service_id() else {
            continue;
        };
        if candidates.iter().any(|c| c.service_id == service_id) {
            continue;
        }
        candidates.push(CrawlCandidate {
            service_id: service_id.to_string(),
            modified_stamp: record.modified_stamp().map(str::to_string),
        });
    }
    candidates
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlMode {
    /// Fixed probe ids, no checkpointing, written to the sample file.
    Sample,
    /// Every candidate, optionally truncated. Unlimited runs checkpoint.
    Full { limit: Option<usize> },
    /// Refetch only candidates whose upstream stamp changed.
    Incremental,
}

impl CrawlMode {
    fn is_sample(&self) -> bool {
        matches!(self, CrawlMode::Sample)
    }

    fn checkpointing(&self) -> bool {
        matches!(self, CrawlMode::Full { limit: None } | CrawlMode::Incremental)
    }
}

/// Seam between the orchestrator and the network, so crawl logic is
/// testable against canned pages.
#[async_trait]
pub trait DetailFetch: Send + Sync {
    async fn fetch(&self, service_id: &str) -> Result<String, FetchError>;
}

/// Production fetcher against the government service portal.
#[derive(Debug)]
pub struct GovPortalFetcher {
    http: HttpFetcher,
    base_url: String,
    run_id: Uuid,
}

impl GovPortalFetcher {
    pub fn new(http: HttpFetcher, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            run_id: Uuid::new_v4(),
        }
    }
}

#[async_trait]
impl DetailFetch for GovPortalFetcher {
    async fn fetch(&self, service_id: &str) -> Result<String, FetchError> {
        let url = format!("{}/{}", self.base_url, service_id);
        self.http.fetch_text(self.run_id, &url).await
    }
}

#[derive(Debug)]
pub struct CrawlOutcome {
    pub batch: DetailBatch,
    pub fetched: usize,
    pub reused: usize,
}

pub struct CrawlOrchestrator<F: DetailFetch> {
    fetcher: F,
    store: BatchStore,
    delay: Duration,
    checkpoint_every: usize,
}

impl<F: DetailFetch> CrawlOrchestrator<F> {
    pub fn new(fetcher: F, store: BatchStore) -> Self {
        Self {
            fetcher,
            store,
            delay: DEFAULT_CRAWL_DELAY,
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_checkpoint_every(mut self, every: usize) -> Self {
        self.checkpoint_every = every.max(1);
        self
    }

    /// Runs one crawl over the given candidates and persists the detail
    /// batch. A checkpointed run resumes where the last one stopped; the
    /// checkpoint is removed once the batch lands.
    pub async fn run(
        &self,
        mode: CrawlMode,
        candidates: &[CrawlCandidate],
    ) -> anyhow::Result<CrawlOutcome> {
        let run_id = Uuid::new_v4();
        let span = info_span!("crawl_run", %run_id, ?mode);

        async {
            let sample_candidates: Vec<CrawlCandidate>;
            let worklist: &[CrawlCandidate] = match mode {
                CrawlMode::Sample => {
                    sample_candidates = SAMPLE_SERVICE_IDS
                        .iter()
                        .map(|id| CrawlCandidate {
                            service_id: id.to_string(),
                            modified_stamp: None,
                        })
                        .collect();
                    &sample_candidates
                }
                CrawlMode::Full { limit } => {
                    let cap = limit.unwrap_or(candidates.len());
                    &candidates[..cap.min(candidates.len())]
                }
                CrawlMode::Incremental => candidates,
            };

            let mut results: BTreeMap<String, CrawlDetail> = BTreeMap::new();
            let mut reused = 0usize;

            // Incremental runs keep details whose stamp still matches.
            // A previous detail without a stamp is adopted as current and
            // backfilled, never refetched.
            let mut to_fetch: Vec<&CrawlCandidate> = Vec::new();
            if mode == CrawlMode::Incremental {
                let previous = self
                    .store
                    .load_detail(false)
                    .await?
                    .map(|b| b.items)
                    .unwrap_or_default();

                for candidate in worklist {
                    match previous.get(&candidate.service_id) {
                        Some(detail)
                            if detail.source_modified.is_none()
                                || detail.source_modified == candidate.modified_stamp =>
                        {
                            let mut kept = detail.clone();
                            kept.source_modified = candidate.modified_stamp.clone();
                            results.insert(candidate.service_id.clone(), kept);
                            reused += 1;
                        }
                        _ => to_fetch.push(candidate),
                    }
                }
            } else {
                to_fetch.extend(worklist.iter());
            }

            let pending_ids: Vec<String> = to_fetch
                .iter()
                .map(|c| c.service_id.clone())
                .collect();

            // A checkpoint is only meaningful for the worklist it was
            // written against. After a re-sync the candidate set may have
            // changed, so a mismatching checkpoint is discarded wholesale.
            let mut start = 0usize;
            if mode.checkpointing() {
                if let Some(checkpoint) = self.store.load_checkpoint().await? {
                    if checkpoint.pending_ids == pending_ids {
                        info!(
                            resumed_at = checkpoint.last_processed_index + 1,
                            carried = checkpoint.items.len(),
                            "resuming from checkpoint"
                        );
                        start = (checkpoint.last_processed_index + 1).min(to_fetch.len());
                        results.extend(checkpoint.items);
                    } else {
                        warn!("checkpoint was written for a different worklist, starting over");
                        self.store.delete_checkpoint().await?;
                    }
                }
            }

            let mut fetched = 0usize;
            for (index, candidate) in to_fetch.iter().enumerate().skip(start) {
                let service_id = candidate.service_id.as_str();

                match self.fetcher.fetch(service_id).await {
                    Ok(html) => match parse_detail_page(&html, Utc::now()) {
                        Some(mut detail) => {
                            detail.source_modified = candidate.modified_stamp.clone();
                            results.insert(service_id.to_string(), detail);
                            fetched += 1;
                        }
                        None => {
                            warn!(service_id, "detail page yielded nothing extractable");
                        }
                    },
                    Err(err) => {
                        warn!(service_id, %err, "detail fetch failed");
                    }
                }

                if mode.checkpointing() && (index + 1) % self.checkpoint_every == 0 {
                    self.store
                        .save_checkpoint(&CrawlCheckpoint {
                            last_processed_index: index,
                            pending_ids: pending_ids.clone(),
                            items: results.clone(),
                        })
                        .await?;
                }

                if index + 1 < to_fetch.len() {
                    tokio::time::sleep(self.delay).await;
                }
            }

            let failed_ids: Vec<String> = worklist
                .iter()
                .filter(|c| !results.contains_key(&c.service_id))
                .map(|c| c.service_id.clone())
                .collect();

            let batch = DetailBatch {
                version: BATCH_VERSION.to_string(),
                generated_at: Utc::now(),
                total_count: worklist.len(),
                success_count: results.len(),
                failed_ids,
                items: results,
            };

            self.store.save_detail(&batch, mode.is_sample()).await?;
            if mode.checkpointing() {
                self.store.delete_checkpoint().await?;
            }

            info!(
                total = batch.total_count,
                ok = batch.success_count,
                failed = batch.failed_ids.len(),
                fetched,
                reused,
                "crawl complete"
            );

            Ok(CrawlOutcome {
                batch,
                fetched,
                reused,
            })
        }
        .instrument(span)
        .await
    }
}
