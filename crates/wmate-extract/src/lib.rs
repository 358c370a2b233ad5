//! Heuristic extraction of structured fields from upstream free text,
//! plus the transformer producing canonical benefit records.

pub mod detail;
pub mod fields;
pub mod transform;

pub const CRATE_NAME: &str = "wmate-extract";

/// Character-based truncation. Upstream text is Hangul-heavy, so byte
/// slicing would split code points.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
