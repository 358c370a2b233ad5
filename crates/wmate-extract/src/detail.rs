//! Heuristic parser for government detail pages. Extraction is keyed on
//! heading/label text, not document structure, because the upstream
//! markup varies page to page.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use wmate_core::{CrawlDetail, DetailContact, DetailDocuments, LegalBasis};

const MAX_PHONE_NUMBERS: usize = 5;
const NOT_APPLICABLE: &str = "해당없음";

static HEADING_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h3, h4, strong").expect("static selector"));
static WARNING_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h3, h4, strong, p").expect("static selector"));
static LI_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("li").expect("static selector"));
static P_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("p").expect("static selector"));
static ANY_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("*").expect("static selector"));

static WARNING_INLINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:보육료|양육수당|다른\s*복지)[^.]*중복[^.]*").expect("static regex")
});
static WARNING_PAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([가-힣\s,]+(?:와|과|,\s*)\s*중복(?:수혜|지원|혜택)\s*불가)").expect("static regex")
});
static LEGAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[법령\]\s*([^(]+)\(([^)]+)\)").expect("static regex"));
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{2,4}-\d{3,4}-\d{4}").expect("static regex"));

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// First `pre` element among the heading's following siblings.
fn following_pre_text(heading: ElementRef<'_>) -> Option<String> {
    for sibling in heading.next_siblings() {
        if let Some(el) = ElementRef::wrap(sibling) {
            if el.value().name() == "pre" {
                return Some(element_text(el));
            }
        }
    }
    None
}

fn push_document_lines(content: &str, out: &mut Vec<String>) {
    if content.is_empty() || content == NOT_APPLICABLE {
        return;
    }
    for line in content.split(['-', '\n']) {
        let trimmed = line.trim();
        if trimmed.chars().count() > 2 {
            out.push(trimmed.to_string());
        }
    }
}

fn parse_documents(doc: &Html) -> DetailDocuments {
    let mut documents = DetailDocuments::default();

    for heading in doc.select(&HEADING_SEL) {
        let text = element_text(heading);

        if text.contains("민원인이 제출해야하는 서류") || text.contains("구비서류") {
            if let Some(content) = following_pre_text(heading) {
                push_document_lines(&content, &mut documents.required);
            }
        }

        if text.contains("민원인이 제출하지 않아도") {
            if let Some(content) = following_pre_text(heading) {
                push_document_lines(&content, &mut documents.optional);
            }
        }
    }

    documents
}

fn parse_duplicate_warning(doc: &Html) -> Option<String> {
    for el in doc.select(&WARNING_SEL) {
        let text = element_text(el);
        if !text.contains("중복혜택 안돼요") && !text.contains("중복수혜 불가") {
            continue;
        }

        let body = el
            .parent()
            .and_then(ElementRef::wrap)
            .and_then(|parent| parent.select(&P_SEL).next())
            .map(element_text)
            .filter(|t| !t.is_empty());
        if body.is_some() {
            return body;
        }
        if let Some(m) = WARNING_INLINE_RE.find(&text) {
            return Some(m.as_str().trim().to_string());
        }
    }

    // No heading matched: fall back to a whole-page scan.
    let full_text = doc.root_element().text().collect::<String>();
    WARNING_PAGE_RE
        .captures(&full_text)
        .map(|caps| caps[1].trim().to_string())
}

fn parse_legal_basis(doc: &Html) -> Vec<LegalBasis> {
    let mut basis = Vec::new();
    for li in doc.select(&LI_SEL) {
        let text = element_text(li);
        if !text.contains("[법령]") {
            continue;
        }
        if let Some(caps) = LEGAL_RE.captures(&text) {
            basis.push(LegalBasis {
                name: caps[1].trim().to_string(),
                article: caps[2].trim().to_string(),
            });
        }
    }
    basis
}

fn parse_contact(doc: &Html) -> DetailContact {
    let mut agency = String::new();
    for el in doc.select(&ANY_SEL) {
        if !el.text().any(|t| t.contains("접수기관")) {
            continue;
        }
        let next = el
            .next_siblings()
            .find_map(ElementRef::wrap)
            .map(element_text)
            .filter(|t| !t.is_empty());
        if let Some(next) = next {
            agency = next;
        }
    }

    let full_text = doc.root_element().text().collect::<String>();
    let mut phone: Vec<String> = Vec::new();
    for m in PHONE_RE.find_iter(&full_text) {
        let number = m.as_str();
        if !phone.iter().any(|p| p == number) {
            phone.push(number.to_string());
        }
        if phone.len() == MAX_PHONE_NUMBERS {
            break;
        }
    }

    DetailContact { agency, phone }
}

/// Parses one detail page. A page yielding no extractable section at all
/// is a parse failure (`None`), reported like a fetch failure upstream.
pub fn parse_detail_page(html: &str, now: DateTime<Utc>) -> Option<CrawlDetail> {
    let doc = Html::parse_document(html);

    let documents = parse_documents(&doc);
    let duplicate_warning = parse_duplicate_warning(&doc);
    let legal_basis = parse_legal_basis(&doc);
    let contact = parse_contact(&doc);

    let nothing_extracted = documents.required.is_empty()
        && documents.optional.is_empty()
        && duplicate_warning.is_none()
        && legal_basis.is_empty()
        && contact.agency.is_empty()
        && contact.phone.is_empty();
    if nothing_extracted {
        return None;
    }

    Some(CrawlDetail {
        documents,
        duplicate_warning,
        legal_basis,
        contact,
        last_crawled: now,
        source_modified: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(html: &str) -> Option<CrawlDetail> {
        parse_detail_page(html, Utc::now())
    }

    #[test]
    fn required_and_optional_documents_from_headings() {
        let html = r#"
            <html><body>
              <h3>민원인이 제출해야하는 서류</h3>
              <pre>- 주민등록등본
- 소득증명서</pre>
              <h4>민원인이 제출하지 않아도 되는 서류</h4>
              <pre>- 건강보험 자격확인서</pre>
            </body></html>
        "#;
        let detail = parse(html).expect("extractable page");
        assert_eq!(detail.documents.required, vec!["주민등록등본", "소득증명서"]);
        assert_eq!(detail.documents.optional, vec!["건강보험 자격확인서"]);
    }

    #[test]
    fn not_applicable_document_section_is_empty() {
        let html = r#"
            <html><body>
              <h3>구비서류</h3>
              <pre>해당없음</pre>
              <p>문의: 02-120-1234</p>
            </body></html>
        "#;
        let detail = parse(html).expect("phone keeps page extractable");
        assert!(detail.documents.required.is_empty());
    }

    #[test]
    fn duplicate_warning_from_heading_section() {
        let html = r#"
            <html><body>
              <div>
                <h4>중복혜택 안돼요</h4>
                <p>보육료 지원과 중복수혜 불가</p>
              </div>
            </body></html>
        "#;
        let detail = parse(html).expect("extractable page");
        assert_eq!(
            detail.duplicate_warning.as_deref(),
            Some("보육료 지원과 중복수혜 불가")
        );
    }

    #[test]
    fn duplicate_warning_whole_page_fallback() {
        let html = r#"
            <html><body>
              <div>양육수당과 중복지원 불가</div>
            </body></html>
        "#;
        let detail = parse(html).expect("extractable page");
        assert_eq!(
            detail.duplicate_warning.as_deref(),
            Some("양육수당과 중복지원 불가")
        );
    }

    #[test]
    fn legal_basis_split_on_parentheses() {
        let html = r#"
            <html><body>
              <ul>
                <li>[법령] 주거기본법(제15조)</li>
                <li>[법령] 청년기본법(제3조, 제24조)</li>
                <li>일반 안내 항목</li>
              </ul>
            </body></html>
        "#;
        let detail = parse(html).expect("extractable page");
        assert_eq!(detail.legal_basis.len(), 2);
        assert_eq!(detail.legal_basis[0].name, "주거기본법");
        assert_eq!(detail.legal_basis[0].article, "제15조");
    }

    #[test]
    fn phone_numbers_deduplicated_and_capped() {
        let html = r#"
            <html><body>
              <p>02-120-0001 02-120-0001 02-120-0002 02-120-0003</p>
              <p>02-120-0004 02-120-0005 02-120-0006</p>
            </body></html>
        "#;
        let detail = parse(html).expect("extractable page");
        assert_eq!(detail.contact.phone.len(), 5);
        assert_eq!(detail.contact.phone[0], "02-120-0001");
        assert!(!detail.contact.phone.contains(&"02-120-0006".to_string()));
    }

    #[test]
    fn receiving_agency_from_label_sibling() {
        let html = r#"
            <html><body>
              <dl><dt>접수기관</dt><dd>서울시 주거복지과</dd></dl>
            </body></html>
        "#;
        let detail = parse(html).expect("extractable page");
        assert_eq!(detail.contact.agency, "서울시 주거복지과");
    }

    #[test]
    fn page_with_nothing_extractable_is_a_parse_failure() {
        assert!(parse("<html><body><p>빈 페이지</p></body></html>").is_none());
        assert!(parse("").is_none());
    }
}
