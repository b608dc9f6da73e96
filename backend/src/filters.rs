//! Filtering of label updates.
//!
//! Watchlist matching plus the criteria filter pipeline: date range,
//! drug-class membership, keyword-in-title and manufacturer-in-title.
//! All criteria are optional and combine with AND semantics; the stages
//! are independent, so applying a subset gives the same records as
//! applying the full set and intersecting.
//!
//! Records can carry a parallel auxiliary sequence (change summaries).
//! Filtering zips the two sequences into pairs up front and unzips at
//! the end, so positional alignment holds by construction. A
//! mismatched auxiliary length is rejected rather than padded.

use std::collections::HashSet;

use chrono::NaiveDate;

use crate::helpers::parse_label_date;
use crate::types::{FilterError, LabelUpdate};

#[derive(Debug, Clone, Default)]
pub struct FilterCriteria {
    /// Inclusive lower bound on the record date.
    pub date_start: Option<NaiveDate>,
    /// Inclusive upper bound on the record date.
    pub date_end: Option<NaiveDate>,
    /// Setids belonging to a drug class, resolved externally. An empty
    /// set means the class could not be resolved and the stage is
    /// skipped rather than dropping everything.
    pub class_setids: Option<HashSet<String>>,
    /// Case-insensitive substring match against the title.
    pub keyword: Option<String>,
    /// Case-insensitive substring match against the title. The
    /// manufacturer usually appears in [brackets] at the end of the
    /// title, but the match is deliberately loose.
    pub manufacturer: Option<String>,
}

impl FilterCriteria {
    pub fn is_empty(&self) -> bool {
        self.date_start.is_none()
            && self.date_end.is_none()
            && self.class_setids.is_none()
            && normalized(&self.keyword).is_none()
            && normalized(&self.manufacturer).is_none()
    }
}

fn normalized(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

/// Keep only updates whose title contains any of the watchlist
/// substrings, case-insensitive.
pub fn filter_by_watchlist(updates: Vec<LabelUpdate>, watchlist: &[String]) -> Vec<LabelUpdate> {
    let needles: Vec<String> = watchlist.iter().map(|s| s.to_lowercase()).collect();
    updates
        .into_iter()
        .filter(|u| {
            let title = u.title.to_lowercase();
            needles.iter().any(|n| title.contains(n))
        })
        .collect()
}

/// Apply the provided criteria to a batch of records and an optional
/// parallel summary sequence. Records whose date cannot be parsed are
/// never dropped by the date stage. Returns the retained records and,
/// when given, the positionally matching summaries.
pub fn apply_filters(
    records: Vec<LabelUpdate>,
    summaries: Option<Vec<String>>,
    criteria: &FilterCriteria,
) -> Result<(Vec<LabelUpdate>, Option<Vec<String>>), FilterError> {
    let had_summaries = summaries.is_some();
    if let Some(texts) = &summaries {
        if texts.len() != records.len() {
            return Err(FilterError::LengthMismatch {
                records: records.len(),
                aux: texts.len(),
            });
        }
    }

    let mut pairs: Vec<(LabelUpdate, Option<String>)> = match summaries {
        Some(texts) => records.into_iter().zip(texts.into_iter().map(Some)).collect(),
        None => records.into_iter().map(|u| (u, None)).collect(),
    };

    if criteria.date_start.is_some() || criteria.date_end.is_some() {
        pairs.retain(|(u, _)| match parse_label_date(u.best_date_str()) {
            // Unparseable dates opt out of date filtering.
            None => true,
            Some(d) => {
                criteria.date_start.is_none_or(|start| d >= start)
                    && criteria.date_end.is_none_or(|end| d <= end)
            }
        });
    }

    if let Some(allowed) = &criteria.class_setids {
        if !allowed.is_empty() {
            pairs.retain(|(u, _)| allowed.contains(&u.setid));
        }
    }

    if let Some(keyword) = normalized(&criteria.keyword) {
        pairs.retain(|(u, _)| u.title.to_lowercase().contains(&keyword));
    }

    if let Some(manufacturer) = normalized(&criteria.manufacturer) {
        pairs.retain(|(u, _)| u.title.to_lowercase().contains(&manufacturer));
    }

    let mut kept_records = Vec::with_capacity(pairs.len());
    let mut kept_texts = Vec::with_capacity(pairs.len());
    for (record, text) in pairs {
        kept_records.push(record);
        if let Some(text) = text {
            kept_texts.push(text);
        }
    }

    Ok((kept_records, had_summaries.then_some(kept_texts)))
}
