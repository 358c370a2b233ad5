//! Snapshot synchronization: pull the upstream service list, normalize
//! it, diff against the previous snapshot and persist the result.

pub mod enrich;
pub mod targets;
pub mod view;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;
use wmate_core::{BenefitRecord, RawServiceRecord, Snapshot};
use wmate_extract::transform::transform_records;
use wmate_storage::{BatchStore, HttpClientConfig, HttpFetcher};

pub const CRATE_NAME: &str = "wmate-sync";

pub const DEFAULT_SERVICE_LIST_URL: &str = "https://api.odcloud.kr/api/gov24/v3/serviceList";
pub const DEFAULT_DETAIL_BASE_URL: &str = "https://www.gov.kr/portal/rcvfvrSvc/dtlEx";
const DEFAULT_PAGE_SIZE: usize = 100;
const PAGE_FETCH_PAUSE: Duration = Duration::from_millis(100);

/// Environment-driven pipeline configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Catalog API key. Absent key switches the list client to its
    /// built-in fixture records so the pipeline stays runnable offline.
    pub api_key: Option<String>,
    pub data_dir: String,
    pub service_list_url: String,
    pub detail_base_url: String,
    pub user_agent: Option<String>,
    pub http_timeout_secs: u64,
    pub crawl_delay_ms: u64,
    pub page_size: usize,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("PUBLIC_DATA_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        let data_dir =
            std::env::var("WMATE_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
        let http_timeout_secs = match std::env::var("WMATE_HTTP_TIMEOUT_SECS") {
            Ok(raw) => raw
                .parse()
                .context("parsing WMATE_HTTP_TIMEOUT_SECS as seconds")?,
            Err(_) => 20,
        };
        let crawl_delay_ms = match std::env::var("WMATE_CRAWL_DELAY_MS") {
            Ok(raw) => raw
                .parse()
                .context("parsing WMATE_CRAWL_DELAY_MS as milliseconds")?,
            Err(_) => 500,
        };

        Ok(Self {
            api_key,
            data_dir,
            service_list_url: DEFAULT_SERVICE_LIST_URL.to_string(),
            detail_base_url: DEFAULT_DETAIL_BASE_URL.to_string(),
            user_agent: std::env::var("WMATE_USER_AGENT").ok(),
            http_timeout_secs,
            crawl_delay_ms,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: self.user_agent.clone(),
            ..Default::default()
        }
    }
}

/// Envelope of one service-list API page.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    current_count: usize,
    #[serde(default)]
    total_count: usize,
    #[serde(default)]
    data: Vec<RawServiceRecord>,
}

/// Paginated client for the public service-list API.
pub struct ServiceListClient {
    http: HttpFetcher,
    base_url: String,
    api_key: Option<String>,
    page_size: usize,
}

impl ServiceListClient {
    pub fn new(http: HttpFetcher, config: &SyncConfig) -> Self {
        Self {
            http,
            base_url: config.service_list_url.clone(),
            api_key: config.api_key.clone(),
            page_size: config.page_size,
        }
    }

    /// Fetches every page of the catalog. A failed page ends the walk
    /// with whatever was collected so far rather than aborting the run.
    pub async fn fetch_all(&self) -> anyhow::Result<Vec<RawServiceRecord>> {
        let Some(api_key) = &self.api_key else {
            info!("no api key configured, using built-in fixture records");
            return Ok(mock_records());
        };

        let run_id = Uuid::new_v4();
        let mut records: Vec<RawServiceRecord> = Vec::new();
        let mut page = 1usize;

        loop {
            let url = reqwest::Url::parse_with_params(
                &self.base_url,
                &[
                    ("serviceKey", api_key.as_str()),
                    ("page", &page.to_string()),
                    ("perPage", &self.page_size.to_string()),
                ],
            )
            .context("building service list url")?;

            let text = match self.http.fetch_text(run_id, url.as_str()).await {
                Ok(text) => text,
                Err(err) => {
                    warn!(page, %err, "service list page failed, keeping partial catalog");
                    break;
                }
            };

            let response: ApiResponse = match serde_json::from_str(&text) {
                Ok(response) => response,
                Err(err) => {
                    warn!(page, %err, "unparsable service list page, keeping partial catalog");
                    break;
                }
            };

            if response.data.is_empty() {
                break;
            }
            records.extend(response.data);
            info!(
                page,
                current = response.current_count,
                collected = records.len(),
                total = response.total_count,
                "fetched service list page"
            );

            if response.total_count > 0 && records.len() >= response.total_count {
                break;
            }
            page += 1;
            tokio::time::sleep(PAGE_FETCH_PAUSE).await;
        }

        Ok(records)
    }
}

/// Offline fixture catalog, mirroring the upstream payload shape.
pub fn mock_records() -> Vec<RawServiceRecord> {
    let fixtures = [
        (
            "WF0001",
            "청년 월세 특별지원",
            "청년의 주거비 부담 완화",
            "월 최대 20만원, 최대 12개월 지원",
            "만 19~34세, 중위소득 60% 이하, 무주택 청년",
            "주거",
            "청년",
        ),
        (
            "WF0002",
            "어르신 건강검진 지원",
            "노인 건강관리 강화",
            "검진비 최대 100,000원 지원",
            "만 65세 이상 어르신",
            "건강",
            "노인",
        ),
        (
            "WF0003",
            "한부모가족 아동양육비",
            "한부모가족의 양육 부담 경감",
            "자녀 1인당 월 210,000원 지급",
            "중위소득 63% 이하 한부모가족",
            "보육",
            "한부모",
        ),
        (
            "WF0004",
            "국가장학금 Ⅰ유형",
            "대학생 등록금 부담 경감",
            "연간 최대 5,700,000원 지원",
            "대학교 재학생, 중위소득 200% 이하",
            "교육",
            "대학생",
        ),
        (
            "WF0005",
            "장애인 고용장려금",
            "장애인 고용 촉진",
            "월 최대 90만원 지급",
            "등록장애인을 고용한 사업주",
            "고용",
            "장애인",
        ),
    ];

    fixtures
        .into_iter()
        .map(
            |(id, name, purpose, content, criteria, field, target)| RawServiceRecord {
                service_id: Some(id.to_string()),
                service_name: Some(name.to_string()),
                purpose: Some(purpose.to_string()),
                support_content: Some(content.to_string()),
                selection_criteria: Some(criteria.to_string()),
                application_method: Some("온라인 신청".to_string()),
                deadline: Some("상시".to_string()),
                agency_name: Some("보건복지부".to_string()),
                service_field: Some(field.to_string()),
                support_target: Some(target.to_string()),
                modified_at: Some("2026-01-01T00:00:00".to_string()),
                ..Default::default()
            },
        )
        .collect()
}

/// Result of comparing a fresh catalog against the previous snapshot.
#[derive(Debug, Default)]
pub struct SnapshotDiff {
    pub added: Vec<BenefitRecord>,
    pub modified: Vec<BenefitRecord>,
    pub unchanged: Vec<BenefitRecord>,
}

fn watched_fields_differ(previous: &BenefitRecord, current: &BenefitRecord) -> bool {
    previous.title != current.title
        || previous.benefit.description != current.benefit.description
        || previous.eligibility.conditions_explained != current.eligibility.conditions_explained
        || previous.schedule.end_date() != current.schedule.end_date()
}

/// Partitions the current records against the previous snapshot. Every
/// current record lands in exactly one bucket; records that vanished
/// upstream simply stop appearing.
pub fn diff_snapshots(previous: &[BenefitRecord], current: Vec<BenefitRecord>) -> SnapshotDiff {
    let by_id: BTreeMap<&str, &BenefitRecord> =
        previous.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut diff = SnapshotDiff::default();
    for record in current {
        match by_id.get(record.id.as_str()) {
            None => diff.added.push(record),
            Some(prev) if watched_fields_differ(prev, &record) => diff.modified.push(record),
            Some(_) => diff.unchanged.push(record),
        }
    }
    diff
}

/// Post-diff summary pass over added and modified records. The default
/// is a no-op; an external generative summarizer plugs in here.
#[async_trait]
pub trait SummaryHook: Send + Sync {
    async fn summarize(&self, records: &mut [BenefitRecord]) -> anyhow::Result<()>;
}

pub struct NoopSummaryHook;

#[async_trait]
impl SummaryHook for NoopSummaryHook {
    async fn summarize(&self, _records: &mut [BenefitRecord]) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct SyncOutcome {
    pub total: usize,
    pub added: usize,
    pub modified: usize,
    pub unchanged: usize,
    pub saved: bool,
}

pub struct SnapshotPipeline {
    client: ServiceListClient,
    store: BatchStore,
    hook: Box<dyn SummaryHook>,
}

impl SnapshotPipeline {
    pub fn new(client: ServiceListClient, store: BatchStore) -> Self {
        Self {
            client,
            store,
            hook: Box::new(NoopSummaryHook),
        }
    }

    pub fn with_hook(mut self, hook: Box<dyn SummaryHook>) -> Self {
        self.hook = hook;
        self
    }

    /// One full synchronization: fetch, normalize, diff, persist. When
    /// nothing was added or modified the previous snapshot stays as is.
    pub async fn run_once(&self) -> anyhow::Result<SyncOutcome> {
        let run_id = Uuid::new_v4();
        let span = info_span!("snapshot_sync", %run_id);

        async {
            let previous = self.store.load_snapshot().await?;
            let previous_items = previous.map(|s| s.items).unwrap_or_default();

            let raw = self.client.fetch_all().await?;
            let now = Utc::now();
            let current = transform_records(&raw, now);
            let total = current.len();

            let mut diff = diff_snapshots(&previous_items, current);

            // Unchanged records keep the summary a generative pass may
            // have written for them before.
            let previous_by_id: BTreeMap<&str, &BenefitRecord> =
                previous_items.iter().map(|r| (r.id.as_str(), r)).collect();
            for record in &mut diff.unchanged {
                if let Some(prev) = previous_by_id.get(record.id.as_str()) {
                    if prev.summary.generated {
                        record.summary = prev.summary.clone();
                    }
                }
            }

            self.hook.summarize(&mut diff.added).await?;
            self.hook.summarize(&mut diff.modified).await?;

            let outcome = SyncOutcome {
                total,
                added: diff.added.len(),
                modified: diff.modified.len(),
                unchanged: diff.unchanged.len(),
                saved: !diff.added.is_empty() || !diff.modified.is_empty(),
            };

            if outcome.saved {
                let mut items = diff.unchanged;
                items.extend(diff.modified);
                items.extend(diff.added);
                self.store.save_snapshot(&Snapshot::new(now, items)).await?;
            }

            info!(
                total = outcome.total,
                added = outcome.added,
                modified = outcome.modified,
                unchanged = outcome.unchanged,
                saved = outcome.saved,
                "snapshot sync complete"
            );
            Ok(outcome)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wmate_core::Schedule;
    use wmate_extract::transform::transform_record;

    fn record(id: &str, title: &str) -> BenefitRecord {
        let raw = RawServiceRecord {
            service_id: Some(id.to_string()),
            service_name: Some(title.to_string()),
            ..Default::default()
        };
        transform_record(&raw, Utc::now())
    }

    #[test]
    fn identical_batches_are_all_unchanged() {
        let previous = vec![record("A", "가"), record("B", "나")];
        let diff = diff_snapshots(&previous, previous.clone());

        assert!(diff.added.is_empty());
        assert!(diff.modified.is_empty());
        assert_eq!(diff.unchanged.len(), 2);
    }

    #[test]
    fn every_record_lands_in_exactly_one_bucket() {
        let previous = vec![record("A", "가"), record("B", "나")];
        let current = vec![
            record("A", "가"),
            record("B", "나 (개정)"),
            record("C", "다"),
        ];
        let total = current.len();

        let diff = diff_snapshots(&previous, current);
        assert_eq!(
            diff.added.len() + diff.modified.len() + diff.unchanged.len(),
            total
        );
        assert_eq!(diff.added[0].id, "welfare_C");
        assert_eq!(diff.modified[0].id, "welfare_B");
        assert_eq!(diff.unchanged[0].id, "welfare_A");
    }

    #[test]
    fn schedule_end_date_is_a_watched_field() {
        let mut previous = record("A", "가");
        previous.schedule = Schedule::Period {
            end: "2026-03-31".to_string(),
            note: None,
        };
        let mut current = previous.clone();
        current.schedule = Schedule::Period {
            end: "2026-06-30".to_string(),
            note: None,
        };

        let diff = diff_snapshots(&[previous], vec![current]);
        assert_eq!(diff.modified.len(), 1);
    }

    #[test]
    fn cosmetic_changes_do_not_count_as_modified() {
        let previous = record("A", "가");
        let mut current = previous.clone();
        current.tags.push("청년".to_string());

        let diff = diff_snapshots(&[previous], vec![current]);
        assert_eq!(diff.unchanged.len(), 1);
    }

    #[test]
    fn mock_catalog_transforms_cleanly() {
        let records = transform_records(&mock_records(), Utc::now());
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.id.starts_with("welfare_WF")));
        assert!(records.iter().all(|r| r.modified_stamp().is_some()));
    }

    struct StampingHook;

    #[async_trait]
    impl SummaryHook for StampingHook {
        async fn summarize(&self, records: &mut [BenefitRecord]) -> anyhow::Result<()> {
            for record in records {
                record.summary.generated = true;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn generated_summaries_are_carried_forward() {
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let store = BatchStore::new(dir.path());

        let config = SyncConfig {
            api_key: None,
            data_dir: dir.path().display().to_string(),
            service_list_url: DEFAULT_SERVICE_LIST_URL.to_string(),
            detail_base_url: String::new(),
            user_agent: None,
            http_timeout_secs: 5,
            crawl_delay_ms: 0,
            page_size: 100,
        };
        let http = HttpFetcher::new(config.http_client_config()).unwrap();
        let client = ServiceListClient::new(http, &config);
        let pipeline =
            SnapshotPipeline::new(client, store.clone()).with_hook(Box::new(StampingHook));

        // First run: everything is added and summarized by the hook.
        let first = pipeline.run_once().await.unwrap();
        assert!(first.saved);
        assert_eq!(first.added, 5);

        // Second run over the identical catalog: nothing changed, the
        // snapshot is left alone and summaries survive in it.
        let second = pipeline.run_once().await.unwrap();
        assert!(!second.saved);
        assert_eq!(second.unchanged, 5);

        let snapshot = store.load_snapshot().await.unwrap().unwrap();
        assert!(snapshot.items.iter().all(|r| r.summary.generated));
    }
}
