use std::collections::HashMap;

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// One label update notification, as parsed from the DailyMed RSS feed.
///
/// Immutable once constructed. The date strings come straight from the
/// feed and are not guaranteed to be machine-parseable; see
/// `helpers::parse_label_date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelUpdate {
    pub title: String,
    pub link: String,
    /// Stable identifier for the label document family across versions.
    pub setid: String,
    /// SPL version number of this revision.
    pub version: i32,
    /// From the item description, e.g. "Fri, 13 Feb 2026 00:00:00 EST".
    pub updated_date: String,
    /// RSS pubDate, used when updated_date is missing.
    pub pub_date: String,
}

impl LabelUpdate {
    /// The date string to use for filtering and cross-validation:
    /// updated_date when present, otherwise pub_date.
    pub fn best_date_str(&self) -> &str {
        if self.updated_date.is_empty() {
            &self.pub_date
        } else {
            &self.updated_date
        }
    }
}

/// Section display name -> extracted plain text.
///
/// A missing key means the section was not found in that document
/// version. An empty string means the section exists but its text
/// element is empty. Downstream diffing relies on the distinction.
pub type SectionMap = HashMap<String, String>;

/// Failure at a collaborator boundary (DailyMed, openFDA).
///
/// Callers in the pipeline degrade these to absent results after
/// logging; the variants exist so the cause stays inspectable.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("resource not found")]
    NotFound,
    #[error("server returned status {0}")]
    Http(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("response could not be parsed: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return FetchError::Timeout;
        }
        if let Some(status) = e.status() {
            if status == reqwest::StatusCode::NOT_FOUND {
                return FetchError::NotFound;
            }
            return FetchError::Http(status.as_u16());
        }
        if e.is_decode() {
            return FetchError::Parse(e.to_string());
        }
        FetchError::Network(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("auxiliary sequence has {aux} entries but there are {records} records")]
    LengthMismatch { records: usize, aux: usize },
}
