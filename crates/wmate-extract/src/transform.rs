//! Raw upstream records → canonical benefit records. Never drops a
//! record: extraction misses become explicit absent values.

use chrono::{DateTime, Utc};
use uuid::Uuid;
use wmate_core::{
    Application, Benefit, BenefitKind, BenefitRecord, Category, Eligibility, RawServiceRecord,
    SourceInfo, Summary,
};

use crate::fields;
use crate::truncate_chars;

pub const API_SOURCE: &str = "행안부_공공서비스API";
const FALLBACK_APPLICATION_URL: &str = "https://www.bokjiro.go.kr";
const ONE_LINER_MAX_CHARS: usize = 50;

/// Ordered service-domain keyword rules; first match wins.
const CATEGORY_RULES: [(&str, Category); 15] = [
    ("주거", Category::Housing),
    ("취업", Category::Job),
    ("창업", Category::Job),
    ("고용", Category::Job),
    ("교육", Category::Education),
    ("보육", Category::Childcare),
    ("임신", Category::Childcare),
    ("출산", Category::Childcare),
    ("육아", Category::Childcare),
    ("건강", Category::Health),
    ("의료", Category::Health),
    ("문화", Category::Culture),
    ("여가", Category::Culture),
    ("금융", Category::Finance),
    ("대출", Category::Finance),
];

/// Target-population keyword → tag rules.
const TAG_RULES: [(&[&str], &str); 8] = [
    (&["청년"], "청년"),
    (&["노인", "어르신"], "어르신"),
    (&["장애"], "장애인"),
    (&["임산부", "임신"], "임산부"),
    (&["영유아", "아동"], "영유아"),
    (&["저소득"], "저소득"),
    (&["다문화"], "다문화"),
    (&["한부모"], "한부모"),
];

pub fn map_category(service_field: Option<&str>) -> Category {
    let Some(field) = service_field else {
        return Category::Other;
    };
    for (keyword, category) in CATEGORY_RULES {
        if field.contains(keyword) {
            return category;
        }
    }
    Category::Other
}

pub fn generate_tags(raw: &RawServiceRecord) -> Vec<String> {
    let target = raw.support_target.as_deref().unwrap_or("");
    let mut tags: Vec<String> = Vec::new();
    for (keywords, tag) in TAG_RULES {
        if keywords.iter().any(|k| target.contains(k)) {
            tags.push(tag.to_string());
        }
    }
    // The raw service-domain label rides along as a tag.
    if let Some(field) = raw.service_field.as_deref() {
        if !field.is_empty() && !tags.iter().any(|t| t == field) {
            tags.push(field.to_string());
        }
    }
    tags
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_benefit(content: Option<&str>) -> Benefit {
    let Some(content) = non_empty(content) else {
        return Benefit {
            kind: BenefitKind::Other,
            amount: None,
            duration: None,
            description: String::new(),
        };
    };
    Benefit {
        kind: BenefitKind::Money,
        amount: fields::parse_amount(content),
        duration: None,
        description: content.to_string(),
    }
}

/// Region derivation runs against the eligibility text first and falls
/// back to agency name + title.
fn derive_regions(raw: &RawServiceRecord) -> Option<Vec<String>> {
    let criteria = raw.selection_criteria.as_deref().unwrap_or("");
    let regions = fields::parse_regions(criteria);
    if !regions.is_empty() {
        return Some(regions);
    }

    let combined = [raw.agency_name.as_deref(), raw.service_name.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    let regions = fields::parse_regions(&combined);
    if regions.is_empty() {
        None
    } else {
        Some(regions)
    }
}

/// Transforms one raw record into its canonical form. Total: a record
/// with every extraction missing still comes out the other side.
pub fn transform_record(raw: &RawServiceRecord, now: DateTime<Utc>) -> BenefitRecord {
    let criteria = raw.selection_criteria.as_deref().unwrap_or("");
    let conditions: Vec<String> = criteria
        .split([',', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let support_content = raw.support_content.as_deref().unwrap_or("");
    let one_liner = if support_content.chars().count() > ONE_LINER_MAX_CHARS {
        format!("{}...", truncate_chars(support_content, ONE_LINER_MAX_CHARS))
    } else {
        support_content.to_string()
    };

    let id = match non_empty(raw.service_id.as_deref()) {
        Some(service_id) => format!("welfare_{service_id}"),
        None => format!("welfare_{}", Uuid::new_v4()),
    };

    let application_url = non_empty(raw.online_application_url.as_deref())
        .or_else(|| non_empty(raw.detail_url.as_deref()))
        .unwrap_or(FALLBACK_APPLICATION_URL)
        .to_string();

    let receiving_agency = raw
        .extra
        .get("접수기관")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    BenefitRecord {
        id,
        title: non_empty(raw.service_name.as_deref())
            .unwrap_or("제목 없음")
            .to_string(),
        category: map_category(raw.service_field.as_deref()),
        tags: generate_tags(raw),
        summary: Summary {
            one_liner,
            description: raw.purpose.clone().unwrap_or_default(),
            generated: false,
            generated_at: String::new(),
        },
        eligibility: Eligibility {
            age: fields::parse_age(criteria),
            income: fields::parse_income(criteria),
            region: derive_regions(raw),
            conditions,
            conditions_explained: criteria.to_string(),
        },
        benefit: parse_benefit(raw.support_content.as_deref()),
        documents: fields::parse_documents(raw.required_documents.as_deref().unwrap_or("")),
        schedule: fields::parse_schedule(raw.deadline.as_deref()),
        application: Application {
            method: fields::parse_methods(raw.application_method.as_deref()),
            url: application_url,
            contact: non_empty(raw.contact.as_deref())
                .or_else(|| non_empty(raw.phone_contact.as_deref()))
                .map(str::to_string),
            receiving_agency,
        },
        warnings: Vec::new(),
        source: SourceInfo {
            name: raw.agency_name.clone().unwrap_or_default(),
            url: non_empty(raw.online_application_url.as_deref())
                .or_else(|| non_empty(raw.detail_url.as_deref()))
                .unwrap_or_default()
                .to_string(),
            api_source: API_SOURCE.to_string(),
            last_sync: now,
        },
        raw: Some(raw.clone()),
    }
}

pub fn transform_records(raw: &[RawServiceRecord], now: DateTime<Utc>) -> Vec<BenefitRecord> {
    raw.iter().map(|r| transform_record(r, now)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wmate_core::Schedule;

    fn sample_raw() -> RawServiceRecord {
        RawServiceRecord {
            service_id: Some("WF0001".to_string()),
            service_name: Some("청년 월세 지원".to_string()),
            purpose: Some("청년의 주거비 부담 완화".to_string()),
            deadline: Some("2026-03-31".to_string()),
            support_content: Some("월 최대 20만원, 최대 12개월 지원".to_string()),
            selection_criteria: Some("만 19~34세, 중위소득 60% 이하, 무주택자".to_string()),
            application_method: Some("온라인 신청".to_string()),
            required_documents: Some("주민등록등본, 소득증명서".to_string()),
            online_application_url: Some("https://www.bokjiro.go.kr".to_string()),
            agency_name: Some("서울시".to_string()),
            contact: Some("02-120".to_string()),
            support_target: Some("청년".to_string()),
            service_field: Some("주거".to_string()),
            modified_at: Some("2026-01-01T00:00:00".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn transforms_fully_populated_record() {
        let record = transform_record(&sample_raw(), Utc::now());

        assert_eq!(record.id, "welfare_WF0001");
        assert_eq!(record.category, Category::Housing);
        assert_eq!(record.eligibility.age.unwrap().min, Some(19));
        assert_eq!(record.eligibility.income.unwrap().percent, 60);
        assert_eq!(record.benefit.amount.as_deref(), Some("월 최대 20만원"));
        assert_eq!(
            record.schedule,
            Schedule::Period {
                end: "2026-03-31".to_string(),
                note: None
            }
        );
        assert_eq!(record.application.method, vec!["온라인"]);
        assert!(record.tags.iter().any(|t| t == "청년"));
        assert!(record.tags.iter().any(|t| t == "주거"));
        assert_eq!(record.service_id(), Some("WF0001"));
        assert_eq!(record.modified_stamp(), Some("2026-01-01T00:00:00"));
    }

    #[test]
    fn empty_record_is_never_dropped() {
        let record = transform_record(&RawServiceRecord::default(), Utc::now());

        assert!(record.id.starts_with("welfare_"));
        assert_eq!(record.title, "제목 없음");
        assert_eq!(record.category, Category::Other);
        assert!(record.eligibility.age.is_none());
        assert!(record.eligibility.income.is_none());
        assert!(record.eligibility.region.is_none());
        assert!(record.documents.is_empty());
        assert_eq!(record.schedule, Schedule::always());
        assert_eq!(record.application.method, vec!["기타"]);
        assert_eq!(record.application.url, FALLBACK_APPLICATION_URL);
        assert!(record.application.contact.is_none());
        assert_eq!(record.benefit.kind, BenefitKind::Other);
        assert!(record.service_id().is_none());
    }

    #[test]
    fn region_prefers_eligibility_text_over_agency() {
        let mut raw = sample_raw();
        raw.selection_criteria = Some("부산 거주 청년".to_string());
        let record = transform_record(&raw, Utc::now());
        let regions = record.eligibility.region.unwrap();
        assert!(regions.iter().any(|r| r == "부산"));
        assert!(!regions.iter().any(|r| r == "서울"));
    }

    #[test]
    fn region_falls_back_to_agency_and_title() {
        let record = transform_record(&sample_raw(), Utc::now());
        // Criteria carry no region, so 서울 comes from the agency name.
        let regions = record.eligibility.region.unwrap();
        assert!(regions.iter().any(|r| r == "서울"));
    }

    #[test]
    fn category_first_match_wins() {
        assert_eq!(map_category(Some("취업·창업")), Category::Job);
        assert_eq!(map_category(Some("기타 분야")), Category::Other);
        assert_eq!(map_category(None), Category::Other);
    }

    #[test]
    fn long_support_content_is_truncated_with_ellipsis() {
        let mut raw = sample_raw();
        raw.support_content = Some("가".repeat(80));
        let record = transform_record(&raw, Utc::now());
        assert_eq!(record.summary.one_liner.chars().count(), 53); // 50 + "..."
    }
}
