//! Pure, total extractors over free-form upstream text. Every function
//! fails soft: unmatched text yields an absent value, never an error.

use once_cell::sync::Lazy;
use regex::Regex;
use wmate_core::{AgeRange, DocumentItem, IncomeBasis, IncomeCondition, Schedule};

const AGE_MIN_CLAMP: u32 = 0;
const AGE_MAX_CLAMP: u32 = 99;

/// Default range applied when the youth keyword appears with no numbers.
pub const YOUTH_DEFAULT: AgeRange = AgeRange {
    min: Some(19),
    max: Some(34),
};

static AGE_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"만?\s*(\d+)\s*[~\-]\s*(\d+)\s*세").expect("static regex"));
static AGE_MIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"만?\s*(\d+)\s*세\s*이상").expect("static regex"));
static AGE_MAX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"만?\s*(\d+)\s*세\s*이하").expect("static regex"));
static YOUTH_PAREN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"청년\s*\([^)]*?만\s*(\d+)\s*[~\-]\s*(\d+)").expect("static regex"));
static INCOME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"중위소득\s*(\d+)\s*%").expect("static regex"));
static SIGUNGU_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[가-힣]{2,}(?:시|군|구)\b").expect("static regex"));
static AMOUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:월\s*)?(?:최대\s*)?\d[\d,]*\s*(?:만\s*)?원").expect("static regex")
});
static DATE_ISO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").expect("static regex"));
static DATE_DOT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})\.(\d{2})\.(\d{2})").expect("static regex"));

const SIDO_SHORT: [&str; 17] = [
    "서울", "부산", "대구", "인천", "광주", "대전", "울산", "세종", "경기", "강원", "충북",
    "충남", "전북", "전남", "경북", "경남", "제주",
];

const SIDO_FULL_TO_SHORT: [(&str, &str); 6] = [
    ("충청북도", "충북"),
    ("충청남도", "충남"),
    ("경상북도", "경북"),
    ("경상남도", "경남"),
    ("전라북도", "전북"),
    ("전라남도", "전남"),
];

/// Frequent false positive of the city/district pattern's vocabulary.
const SERVICE_TOKEN: &str = "서비스";

fn clamp_age(n: u32) -> u32 {
    n.clamp(AGE_MIN_CLAMP, AGE_MAX_CLAMP)
}

fn normalize_range(min: Option<u32>, max: Option<u32>) -> AgeRange {
    let (min, max) = match (min, max) {
        // Inverted bounds are swapped, never rejected.
        (Some(a), Some(b)) if a > b => (Some(b), Some(a)),
        other => other,
    };
    AgeRange {
        min: min.map(clamp_age),
        max: max.map(clamp_age),
    }
}

/// Recognizes "만 N~M세", "N세 이상", "N세 이하" and the youth-specific
/// "청년(만 N~M)" pattern; bare 청년 falls back to 19–34.
pub fn parse_age(text: &str) -> Option<AgeRange> {
    if let Some(caps) = AGE_RANGE_RE.captures(text) {
        let min = caps[1].parse().ok();
        let max = caps[2].parse().ok();
        return Some(normalize_range(min, max));
    }
    if let Some(caps) = AGE_MIN_RE.captures(text) {
        return Some(normalize_range(caps[1].parse().ok(), None));
    }
    if let Some(caps) = AGE_MAX_RE.captures(text) {
        return Some(normalize_range(None, caps[1].parse().ok()));
    }
    if let Some(caps) = YOUTH_PAREN_RE.captures(text) {
        let min = caps[1].parse().ok();
        let max = caps[2].parse().ok();
        return Some(normalize_range(min, max));
    }
    if text.contains("청년") {
        return Some(YOUTH_DEFAULT);
    }
    None
}

/// Recognizes "중위소득 N%" only; anything else is no condition, never
/// a guess.
pub fn parse_income(text: &str) -> Option<IncomeCondition> {
    let caps = INCOME_RE.captures(text)?;
    let percent = caps[1].parse().ok()?;
    Some(IncomeCondition {
        basis: IncomeBasis::Median,
        percent,
    })
}

/// Province/city extraction: long-form province names are shortened,
/// then matched against the fixed 17-entry list plus a generic
/// city/district suffix pattern. The literal token 서비스 is excluded.
pub fn parse_regions(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut normalized = text.to_string();
    for (full, short) in SIDO_FULL_TO_SHORT {
        normalized = normalized.replace(full, short);
    }

    let mut regions: Vec<String> = Vec::new();
    for sido in SIDO_SHORT {
        if normalized.contains(sido) {
            regions.push(sido.to_string());
        }
    }
    for m in SIGUNGU_RE.find_iter(text) {
        let token = m.as_str();
        if token != SERVICE_TOKEN && !regions.iter().any(|r| r == token) {
            regions.push(token.to_string());
        }
    }
    regions
}

/// First monetary-looking substring: optional 월/최대 prefix, digits,
/// currency-unit suffix.
pub fn parse_amount(text: &str) -> Option<String> {
    AMOUNT_RE.find(text).map(|m| m.as_str().to_string())
}

/// Splits on comma/newline/bullet characters, trims, drops empties.
pub fn parse_documents(text: &str) -> Vec<DocumentItem> {
    text.split([',', '\n', '·', '•'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| DocumentItem {
            name: name.to_string(),
            required: true,
        })
        .collect()
}

/// Keyword scan for application channels; 기타 when nothing matched.
pub fn parse_methods(text: Option<&str>) -> Vec<String> {
    let mut methods = Vec::new();
    if let Some(text) = text {
        for keyword in ["온라인", "방문", "우편", "팩스"] {
            if text.contains(keyword) {
                methods.push(keyword.to_string());
            }
        }
    }
    if methods.is_empty() {
        methods.push("기타".to_string());
    }
    methods
}

/// 상시 keyword means open-ended; an explicit ISO or dotted date fixes
/// the end; unparseable text stays open-ended with the original retained
/// as a note.
pub fn parse_schedule(deadline: Option<&str>) -> Schedule {
    let deadline = match deadline {
        Some(d) if !d.trim().is_empty() => d.trim(),
        _ => return Schedule::always(),
    };

    if deadline.contains("상시") {
        return Schedule::always();
    }

    if let Some(m) = DATE_ISO_RE.find(deadline) {
        return Schedule::Period {
            end: m.as_str().to_string(),
            note: None,
        };
    }

    if let Some(caps) = DATE_DOT_RE.captures(deadline) {
        return Schedule::Period {
            end: format!("{}-{}-{}", &caps[1], &caps[2], &caps[3]),
            note: None,
        };
    }

    Schedule::Always {
        note: Some(deadline.to_string()),
    }
}
