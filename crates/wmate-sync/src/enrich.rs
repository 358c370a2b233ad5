//! Rule-based reformatter. Deterministically rewrites each benefit into
//! the fixed display shape, optionally folding in crawled detail data.

use std::collections::BTreeMap;

use anyhow::Context;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;
use wmate_core::{
    BenefitLine, BenefitRecord, CrawlDetail, DocumentHint, EligibilitySummary, Enrichment,
    EnrichmentBatch, BATCH_VERSION,
};
use wmate_extract::truncate_chars;
use wmate_storage::BatchStore;

const SUMMARY_MAX_CHARS: usize = 120;
const SIMPLE_MAX_CHARS: usize = 80;
const MAX_BENEFIT_LINES: usize = 5;
const MAX_DETAIL_LINES: usize = 5;

const FALLBACK_SUMMARY: &str = "정보 없음";
const FALLBACK_ELIGIBILITY: &str = "자격조건은 상세 내용을 확인하세요.";

static BENEFIT_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?)\s+(\d[\d,]*)\s*(만\s*)?원\s*$").expect("static regex"));
static LINE_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s+|、\s*").expect("static regex"));
static BULLET_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\s○\-*·]+").expect("static regex"));

/// Issuance hints keyed by document-name keyword, first match wins.
const DOC_HOW: [(&str, &str); 5] = [
    ("주민등록", "정부24에서 발급"),
    ("소득", "홈택스에서 발급"),
    ("등기", "인터넷등기소에서 발급"),
    ("건강보험", "건강보험공단에서 발급"),
    ("가족관계", "대법원 전자가족관계등록시스템에서 발급"),
];
const DOC_HOW_DEFAULT: &str = "신청기관 비치 및 작성";

/// Truncation with the ellipsis counted inside the bound, so output
/// never exceeds `max_chars`.
fn ellipsize(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", truncate_chars(text, max_chars.saturating_sub(3)))
    } else {
        text.to_string()
    }
}

fn build_summary(record: &BenefitRecord) -> String {
    let combined = format!("{} {}", record.title, record.summary.description);
    let combined = combined.trim();
    if combined.is_empty() {
        FALLBACK_SUMMARY.to_string()
    } else {
        ellipsize(combined, SUMMARY_MAX_CHARS)
    }
}

/// Labeled amount lines out of free-form support text. Bulleted lines
/// are preferred; an unstructured description collapses to one line.
fn build_benefit_lines(record: &BenefitRecord) -> Vec<BenefitLine> {
    let description = record.benefit.description.as_str();
    let mut lines: Vec<BenefitLine> = Vec::new();

    for line in description.lines() {
        let trimmed = line.trim();
        if !trimmed.starts_with('○') && !trimmed.starts_with('-') {
            continue;
        }
        let stripped = BULLET_PREFIX_RE.replace(trimmed, "");
        for part in LINE_SPLIT_RE.split(&stripped) {
            let Some(caps) = BENEFIT_LINE_RE.captures(part.trim()) else {
                continue;
            };
            let unit = if caps.get(3).is_some() { "만원" } else { "원" };
            lines.push(BenefitLine {
                label: caps[1].trim().to_string(),
                value: format!("{}{}", &caps[2], unit),
            });
            if lines.len() == MAX_BENEFIT_LINES {
                return lines;
            }
        }
    }

    if lines.is_empty() {
        let value = if description.trim().is_empty() {
            "-".to_string()
        } else {
            ellipsize(description.trim(), 100)
        };
        lines.push(BenefitLine {
            label: "지원 내용".to_string(),
            value,
        });
    }
    lines
}

fn build_eligibility(record: &BenefitRecord) -> EligibilitySummary {
    let explained = record.eligibility.conditions_explained.trim();
    let source = if explained.is_empty() {
        let raw = record.raw.as_ref();
        let target = raw.and_then(|r| r.support_target.as_deref()).unwrap_or("");
        let criteria = raw
            .and_then(|r| r.selection_criteria.as_deref())
            .unwrap_or("");
        format!("{target}\n{criteria}")
    } else {
        explained.to_string()
    };

    let mut details: Vec<String> = Vec::new();
    for chunk in source.split(['\n', '○']) {
        let line = BULLET_PREFIX_RE.replace(chunk.trim(), "").trim().to_string();
        if line.chars().count() <= 2 || details.iter().any(|d| d == &line) {
            continue;
        }
        details.push(line);
        if details.len() == MAX_DETAIL_LINES {
            break;
        }
    }

    let simple = details
        .first()
        .map(|d| ellipsize(d, SIMPLE_MAX_CHARS))
        .unwrap_or_else(|| FALLBACK_ELIGIBILITY.to_string());

    EligibilitySummary { simple, details }
}

fn how_to_get(name: &str) -> &'static str {
    for (keyword, how) in DOC_HOW {
        if name.contains(keyword) {
            return how;
        }
    }
    DOC_HOW_DEFAULT
}

fn build_documents(record: &BenefitRecord, detail: Option<&CrawlDetail>) -> Vec<DocumentHint> {
    let names: Vec<String> = match detail.filter(|d| !d.documents.required.is_empty()) {
        Some(detail) => detail.documents.required.clone(),
        None => record.documents.iter().map(|d| d.name.clone()).collect(),
    };
    names
        .into_iter()
        .map(|name| {
            let how = how_to_get(&name);
            DocumentHint {
                name,
                how: Some(how.to_string()),
            }
        })
        .collect()
}

fn build_tips(documents: &[DocumentHint]) -> Vec<String> {
    let mut tips = Vec::new();
    if documents
        .iter()
        .any(|d| d.how.as_deref() == Some("홈택스에서 발급"))
    {
        tips.push("소득 서류는 홈택스에서 미리 발급해 두면 신청이 빠릅니다.".to_string());
    }
    tips.push("복지로(bokjiro.go.kr)에서 함께 받을 수 있는 제도를 확인하세요.".to_string());
    tips
}

/// One record through the reformatter. Same inputs always produce the
/// same output, so re-running the stage is safe.
pub fn reformat(record: &BenefitRecord, detail: Option<&CrawlDetail>) -> Enrichment {
    let documents = build_documents(record, detail);
    let tips = build_tips(&documents);
    let warning = detail
        .and_then(|d| d.duplicate_warning.as_deref())
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(str::to_string);

    Enrichment {
        summary: build_summary(record),
        benefits: build_benefit_lines(record),
        eligibility: build_eligibility(record),
        documents,
        tips,
        warning,
    }
}

/// Reformats the whole snapshot and persists the enrichment batch.
pub async fn run_enrichment(store: &BatchStore, now: DateTime<Utc>) -> anyhow::Result<usize> {
    let snapshot = store
        .load_snapshot()
        .await?
        .context("no snapshot on disk, run the snapshot stage first")?;
    let details = store
        .load_detail(false)
        .await?
        .map(|b| b.items)
        .unwrap_or_default();

    let mut items: BTreeMap<String, Enrichment> = BTreeMap::new();
    for record in &snapshot.items {
        let detail = record.service_id().and_then(|id| details.get(id));
        items.insert(record.id.clone(), reformat(record, detail));
    }

    let count = items.len();
    store
        .save_enriched(&EnrichmentBatch {
            version: BATCH_VERSION.to_string(),
            generated_at: now,
            items,
        })
        .await?;

    info!(count, "enrichment batch written");
    Ok(count)
}
