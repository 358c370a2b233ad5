//! Narrow-eligibility flag extraction. Flags only ever tighten matching
//! downstream; a record with no signal simply gets no entry.

use std::collections::BTreeMap;

use anyhow::Context;
use chrono::{DateTime, Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;
use wmate_core::{AgeRange, TargetFlags, TargetFlagsBatch, BATCH_VERSION};
use wmate_storage::BatchStore;

const AGE_MIN_CLAMP: u32 = 0;
const AGE_MAX_CLAMP: u32 = 99;
const YOUTH_MIN: u32 = 19;
const YOUTH_MAX: u32 = 34;
const BIRTH_YEAR_FLOOR: i32 = 1920;

static CARE_LEAVER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"보호종료아동|보호종료청소년|자립준비청년|시설\s*퇴소청소년|만기\s*퇴소|가정위탁\s*보호종료",
    )
    .expect("static regex")
});
static SINGLE_PARENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"한부모\s*가정|한부모\s*가족").expect("static regex"));
static BASIC_LIVELIHOOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"기초생활\s*수급자|차상위\s*계층").expect("static regex"));
static STUDENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"대학교\s*재학생|대학생|재학\s*중인\s*자|재학중인\s*자").expect("static regex")
});
static DISABLED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"등록장애인|장애인|중증장애").expect("static regex"));

static BIRTH_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})\s*[~\-]\s*(\d{4})\s*년\s*출생").expect("static regex"));
static AGE_SPAN_MAN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"만\s*(\d+)\s*[~\-]\s*(\d+)\s*세?").expect("static regex"));
static AGE_SPAN_SE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*[~\-]\s*(\d+)\s*세").expect("static regex"));
static AGE_GE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*세\s*이상").expect("static regex"));
static AGE_LE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*세\s*이하").expect("static regex"));

fn clamp(age: u32) -> u32 {
    age.clamp(AGE_MIN_CLAMP, AGE_MAX_CLAMP)
}

/// Age window for the flag set. Unlike the snapshot extractor this also
/// reads birth-year spans and combines independent bound phrases; a
/// window that ends up inverted is dropped wholesale.
fn parse_age_window(text: &str, current_year: i32) -> Option<AgeRange> {
    let mut min: Option<u32> = None;
    let mut max: Option<u32> = None;

    if let Some(caps) = BIRTH_YEAR_RE.captures(text) {
        let first: i32 = caps[1].parse().ok()?;
        let second: i32 = caps[2].parse().ok()?;
        let (early, late) = if first <= second {
            (first, second)
        } else {
            (second, first)
        };
        if early >= BIRTH_YEAR_FLOOR && late < current_year {
            min = Some((current_year - late) as u32);
            max = Some((current_year - early) as u32);
        }
    } else if let Some(caps) = AGE_SPAN_MAN_RE
        .captures(text)
        .or_else(|| AGE_SPAN_SE_RE.captures(text))
    {
        min = caps[1].parse().ok();
        max = caps[2].parse().ok();
    }

    // Standalone bound phrases tighten whatever the span gave.
    if let Some(caps) = AGE_GE_RE.captures(text) {
        let bound: u32 = caps[1].parse().ok()?;
        min = Some(min.map_or(bound, |m| m.max(bound)));
    }
    if let Some(caps) = AGE_LE_RE.captures(text) {
        let bound: u32 = caps[1].parse().ok()?;
        max = Some(max.map_or(bound, |m| m.min(bound)));
    }

    if min.is_none() && max.is_none() && text.contains("청년") {
        min = Some(YOUTH_MIN);
        max = Some(YOUTH_MAX);
    }

    let min = min.map(clamp);
    let max = max.map(clamp);
    if let (Some(lo), Some(hi)) = (min, max) {
        if lo > hi {
            return None;
        }
    }

    let range = AgeRange { min, max };
    (!range.is_empty()).then_some(range)
}

/// Scans eligibility text for narrow-target vocabulary.
pub fn build_flags(text: &str, current_year: i32) -> TargetFlags {
    TargetFlags {
        is_care_leaver_only: CARE_LEAVER_RE.is_match(text),
        is_single_parent_only: SINGLE_PARENT_RE.is_match(text),
        requires_basic_livelihood: BASIC_LIVELIHOOD_RE.is_match(text),
        requires_student: STUDENT_RE.is_match(text),
        requires_disabled: DISABLED_RE.is_match(text),
        age: parse_age_window(text, current_year),
    }
}

/// Extracts flags for the whole snapshot and persists the sparse batch.
pub async fn run_targets(store: &BatchStore, now: DateTime<Utc>) -> anyhow::Result<usize> {
    let snapshot = store
        .load_snapshot()
        .await?
        .context("no snapshot on disk, run the snapshot stage first")?;

    let current_year = now.year();
    let mut items: BTreeMap<String, TargetFlags> = BTreeMap::new();
    for record in &snapshot.items {
        let raw = record.raw.as_ref();
        let criteria = raw
            .and_then(|r| r.selection_criteria.as_deref())
            .unwrap_or("");
        let target = raw.and_then(|r| r.support_target.as_deref()).unwrap_or("");
        let text = format!("{criteria}\n{target}");

        let flags = build_flags(&text, current_year);
        if !flags.is_empty() {
            items.insert(record.id.clone(), flags);
        }
    }

    let count = items.len();
    store
        .save_targets(&TargetFlagsBatch {
            version: BATCH_VERSION.to_string(),
            generated_at: now,
            items,
        })
        .await?;

    info!(count, total = snapshot.items.len(), "target flags written");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    const YEAR: i32 = 2026;

    #[test]
    fn vocabulary_flags_match() {
        let flags = build_flags("자립준비청년(보호종료아동) 중 기초생활 수급자", YEAR);
        assert!(flags.is_care_leaver_only);
        assert!(flags.requires_basic_livelihood);
        assert!(!flags.is_single_parent_only);

        let flags = build_flags("한부모가족 지원, 등록장애인 우대", YEAR);
        assert!(flags.is_single_parent_only);
        assert!(flags.requires_disabled);
    }

    #[test]
    fn birth_year_span_converts_to_ages() {
        let flags = build_flags("1992~1999년 출생자", YEAR);
        assert_eq!(
            flags.age,
            Some(AgeRange {
                min: Some(27),
                max: Some(34)
            })
        );
    }

    #[test]
    fn implausible_birth_years_are_ignored() {
        assert!(build_flags("1800~1810년 출생", YEAR).age.is_none());
        assert!(build_flags("2030~2040년 출생", YEAR).age.is_none());
    }

    #[test]
    fn bound_phrases_tighten_a_span() {
        let flags = build_flags("만 19~39세, 단 25세 이상 우선", YEAR);
        assert_eq!(
            flags.age,
            Some(AgeRange {
                min: Some(25),
                max: Some(39)
            })
        );
    }

    #[test]
    fn inverted_combined_window_is_dropped() {
        // The span and the standalone bounds contradict each other.
        let flags = build_flags("만 19~24세, 30세 이상, 28세 이하", YEAR);
        assert!(flags.age.is_none());
    }

    #[test]
    fn bare_youth_keyword_gets_default_window() {
        let flags = build_flags("청년 구직자 대상", YEAR);
        assert_eq!(
            flags.age,
            Some(AgeRange {
                min: Some(YOUTH_MIN),
                max: Some(YOUTH_MAX)
            })
        );
    }

    #[test]
    fn no_signal_means_empty_flags() {
        assert!(build_flags("전 국민 대상 안내", YEAR).is_empty());
        assert!(build_flags("", YEAR).is_empty());
    }

    #[tokio::test]
    async fn targets_stage_persists_only_flagged_records() {
        use tempfile::tempdir;
        use wmate_core::Snapshot;
        use wmate_extract::transform::transform_records;

        let dir = tempdir().unwrap();
        let store = BatchStore::new(dir.path());
        let now = Utc::now();

        let mut raw = crate::mock_records();
        raw.push(wmate_core::RawServiceRecord {
            service_id: Some("WF0006".to_string()),
            service_name: Some("전 국민 문화 바우처".to_string()),
            selection_criteria: Some("전 국민 대상".to_string()),
            ..Default::default()
        });
        let records = transform_records(&raw, now);
        let total = records.len();
        store.save_snapshot(&Snapshot::new(now, records)).await.unwrap();

        let count = run_targets(&store, now).await.unwrap();
        let batch = store.load_targets().await.unwrap().unwrap();
        assert_eq!(batch.items.len(), count);
        assert!(count < total);
        // The single-parent fixture must carry its flag, the universal
        // program must not appear at all.
        assert!(batch.items["welfare_WF0003"].is_single_parent_only);
        assert!(!batch.items.contains_key("welfare_WF0006"));
    }
}
