//! Core domain model and persisted batch formats for wmate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "wmate-core";

/// Schema version stamped into every persisted batch file.
pub const BATCH_VERSION: &str = "1.0.0";

/// Closed category enumeration for benefit programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Housing,
    Job,
    Education,
    Childcare,
    Health,
    Culture,
    Finance,
    Other,
}

/// Derived age restriction. Absence of a bound means "no restriction".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgeRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
}

impl AgeRange {
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncomeBasis {
    Median,
}

/// Income threshold, only ever derived from explicit median-income text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeCondition {
    #[serde(rename = "type")]
    pub basis: IncomeBasis,
    pub percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eligibility {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<AgeRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub income: Option<IncomeCondition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<Vec<String>>,
    pub conditions: Vec<String>,
    pub conditions_explained: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BenefitKind {
    Money,
    Service,
    Discount,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Benefit {
    #[serde(rename = "type")]
    pub kind: BenefitKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentItem {
    pub name: String,
    pub required: bool,
}

/// Application window. Unparseable deadlines stay open-ended with the
/// original text retained as a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schedule {
    Always {
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    Period {
        end: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
}

impl Schedule {
    pub fn always() -> Self {
        Schedule::Always { note: None }
    }

    /// End date, if the schedule has one. Watched by the snapshot differ.
    pub fn end_date(&self) -> Option<&str> {
        match self {
            Schedule::Always { .. } => None,
            Schedule::Period { end, .. } => Some(end),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub method: Vec<String>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiving_agency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub name: String,
    pub url: String,
    pub api_source: String,
    pub last_sync: DateTime<Utc>,
}

/// Display summary. Carried forward across snapshot runs for unchanged
/// records so enrichment is not churned needlessly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub one_liner: String,
    pub description: String,
    pub generated: bool,
    pub generated_at: String,
}

/// Raw upstream record with the source's own Korean field names.
/// Unmodeled fields survive verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawServiceRecord {
    #[serde(rename = "서비스ID", skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(rename = "서비스명", skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(rename = "서비스목적", skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(rename = "신청기한", skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(rename = "지원내용", skip_serializing_if = "Option::is_none")]
    pub support_content: Option<String>,
    #[serde(rename = "선정기준", skip_serializing_if = "Option::is_none")]
    pub selection_criteria: Option<String>,
    #[serde(rename = "신청방법", skip_serializing_if = "Option::is_none")]
    pub application_method: Option<String>,
    #[serde(rename = "구비서류", skip_serializing_if = "Option::is_none")]
    pub required_documents: Option<String>,
    #[serde(rename = "온라인신청사이트URL", skip_serializing_if = "Option::is_none")]
    pub online_application_url: Option<String>,
    #[serde(rename = "상세조회URL", skip_serializing_if = "Option::is_none")]
    pub detail_url: Option<String>,
    #[serde(rename = "소관기관명", skip_serializing_if = "Option::is_none")]
    pub agency_name: Option<String>,
    #[serde(rename = "부서명", skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(rename = "문의처", skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(rename = "전화문의", skip_serializing_if = "Option::is_none")]
    pub phone_contact: Option<String>,
    #[serde(rename = "지원대상", skip_serializing_if = "Option::is_none")]
    pub support_target: Option<String>,
    #[serde(rename = "지원유형", skip_serializing_if = "Option::is_none")]
    pub support_type: Option<String>,
    #[serde(rename = "서비스분야", skip_serializing_if = "Option::is_none")]
    pub service_field: Option<String>,
    #[serde(rename = "수정일시", skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Canonical normalized representation of one benefit program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenefitRecord {
    pub id: String,
    pub title: String,
    pub category: Category,
    pub tags: Vec<String>,
    pub summary: Summary,
    pub eligibility: Eligibility,
    pub benefit: Benefit,
    pub documents: Vec<DocumentItem>,
    pub schedule: Schedule,
    pub application: Application,
    pub warnings: Vec<String>,
    pub source: SourceInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<RawServiceRecord>,
}

impl BenefitRecord {
    /// Upstream detail-page identifier, when the raw payload carries one.
    /// Records without it can never be cross-referenced to a crawl detail.
    pub fn service_id(&self) -> Option<&str> {
        self.raw
            .as_ref()
            .and_then(|r| r.service_id.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// Upstream "last modified" stamp, compared by equality only.
    pub fn modified_stamp(&self) -> Option<&str> {
        self.raw
            .as_ref()
            .and_then(|r| r.modified_at.as_deref())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetailDocuments {
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalBasis {
    pub name: String,
    pub article: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetailContact {
    pub agency: String,
    pub phone: Vec<String>,
}

/// Supplementary data parsed from one detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlDetail {
    pub documents: DetailDocuments,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_warning: Option<String>,
    pub legal_basis: Vec<LegalBasis>,
    pub contact: DetailContact,
    pub last_crawled: DateTime<Utc>,
    /// The snapshot's 수정일시 stamp this detail was crawled against.
    /// Never shown to consumers; equality drives incremental re-crawl.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_modified: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenefitLine {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilitySummary {
    pub simple: String,
    pub details: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHint {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub how: Option<String>,
}

/// Fixed-shape enrichment produced by the rule-based reformatter (or by
/// an optional external generative pass with the same schema).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    pub summary: String,
    pub benefits: Vec<BenefitLine>,
    pub eligibility: EligibilitySummary,
    pub documents: Vec<DocumentHint>,
    pub tips: Vec<String>,
    pub warning: Option<String>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Narrow-eligibility markers. Only ever tighten eligibility inferred
/// elsewhere; sparse, persisted only when at least one signal matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetFlags {
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_care_leaver_only: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_single_parent_only: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub requires_basic_livelihood: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub requires_student: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub requires_disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<AgeRange>,
}

impl TargetFlags {
    pub fn is_empty(&self) -> bool {
        !self.is_care_leaver_only
            && !self.is_single_parent_only
            && !self.requires_basic_livelihood
            && !self.requires_student
            && !self.requires_disabled
            && self.age.is_none()
    }
}

/// Versioned canonical snapshot batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub total_count: usize,
    pub items: Vec<BenefitRecord>,
}

impl Snapshot {
    pub fn new(generated_at: DateTime<Utc>, items: Vec<BenefitRecord>) -> Self {
        Self {
            version: BATCH_VERSION.to_string(),
            generated_at,
            total_count: items.len(),
            items,
        }
    }
}

/// Persisted detail batch, keyed by the upstream page identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailBatch {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub total_count: usize,
    pub success_count: usize,
    pub failed_ids: Vec<String>,
    pub items: BTreeMap<String, CrawlDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentBatch {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub items: BTreeMap<String, Enrichment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetFlagsBatch {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub items: BTreeMap<String, TargetFlags>,
}

/// Transient crawl progress; deleted on successful full-run completion.
/// `pending_ids` records the worklist the index counts into, so a resume
/// can tell a checkpoint from an earlier worklist apart and discard it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlCheckpoint {
    pub last_processed_index: usize,
    #[serde(default)]
    pub pending_ids: Vec<String>,
    pub items: BTreeMap<String, CrawlDetail>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_serializes_with_type_tag() {
        let always = Schedule::always();
        let json = serde_json::to_value(&always).unwrap();
        assert_eq!(json["type"], "always");

        let period = Schedule::Period {
            end: "2026-03-31".to_string(),
            note: None,
        };
        let json = serde_json::to_value(&period).unwrap();
        assert_eq!(json["type"], "period");
        assert_eq!(json["end"], "2026-03-31");
        assert_eq!(period.end_date(), Some("2026-03-31"));
    }

    #[test]
    fn raw_record_round_trips_unmodeled_fields() {
        let json = serde_json::json!({
            "서비스ID": "WF0001",
            "서비스명": "청년 월세 지원",
            "수정일시": "2026-01-01T00:00:00",
            "미래필드": "그대로 보존"
        });
        let raw: RawServiceRecord = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(raw.service_id.as_deref(), Some("WF0001"));
        assert_eq!(raw.extra["미래필드"], "그대로 보존");

        let back = serde_json::to_value(&raw).unwrap();
        assert_eq!(back, json);
    }

    #[test]
    fn empty_target_flags_detected() {
        assert!(TargetFlags::default().is_empty());
        let flagged = TargetFlags {
            requires_student: true,
            ..Default::default()
        };
        assert!(!flagged.is_empty());
    }

    #[test]
    fn sparse_flags_serialize_compactly() {
        let flags = TargetFlags {
            is_single_parent_only: true,
            ..Default::default()
        };
        let json = serde_json::to_value(flags).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "isSingleParentOnly": true })
        );
    }
}
