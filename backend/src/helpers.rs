use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use lazy_static::lazy_static;

lazy_static! {
    static ref RE_MARKUP_TAG: Regex = Regex::new(r"<[^>]+>").unwrap();
    static ref RE_WHITESPACE_RUN: Regex = Regex::new(r"\s+").unwrap();
}

// Timezone abbreviations seen in DailyMed RSS dates. chrono has no
// format code for named zones, so they are stripped before parsing.
static TZ_SUFFIXES: &[&str] = &[" EST", " EDT", " UTC", " GMT", " PST", " PDT"];

static DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%b %d, %Y",
    "%d %b %Y",
];

/// Strip markup tags from a fragment and collapse whitespace runs to
/// single spaces.
pub fn strip_markup_to_text(fragment: &str) -> String {
    if fragment.is_empty() {
        return String::new();
    }
    let no_tags = RE_MARKUP_TAG.replace_all(fragment, " ");
    collapse_whitespace(&no_tags)
}

pub fn collapse_whitespace(s: &str) -> String {
    RE_WHITESPACE_RUN.replace_all(s, " ").trim().to_string()
}

/// Truncate to at most `max` characters, on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Parse a feed date string (e.g. "Fri, 13 Feb 2026 00:00:00 EST") to
/// a date. Returns None when no known format matches; an unparseable
/// date is always represented explicitly, never defaulted.
pub fn parse_label_date(date_str: &str) -> Option<NaiveDate> {
    if date_str.is_empty() {
        return None;
    }
    let mut s = date_str.trim();
    for tz in TZ_SUFFIXES {
        if let Some(stripped) = s.strip_suffix(tz) {
            s = stripped.trim_end();
            break;
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%a, %d %b %Y %H:%M:%S") {
        return Some(dt.date());
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    None
}
