//! Change summary orchestration.
//!
//! Ties together version resolution, document retrieval, section
//! extraction and diffing into one textual summary per label update.
//! Retrieval failures never abort a summary: they degrade to absent
//! content and one of the terminal sentinel summaries below.

use tracing::warn;

use crate::config::SectionCode;
use crate::dailymed::previous_version;
use crate::diff::render_change_report;
use crate::section_extract::parse_spl_sections;
use crate::types::{FetchError, SectionMap};

pub const NO_PREVIOUS_VERSION: &str = "No previous version available for comparison.";
pub const NO_CONTENT: &str =
    "Could not retrieve label content for comparison (API may be temporarily unavailable).";
pub const NO_TEXT_CHANGES: &str =
    "No text changes detected in key sections (Warnings, Dosage, etc.).";

/// Document retrieval boundary. Implemented by the DailyMed client and
/// by test doubles. `Ok(None)` means the collaborator answered but had
/// no content; `Err` carries the transport-level cause.
pub trait DocumentFetcher {
    /// Current SPL document as XML text.
    fn fetch_current(&self, setid: &str) -> Result<Option<String>, FetchError>;
    /// Known version numbers for the setid, unordered.
    fn fetch_history(&self, setid: &str) -> Result<Option<Vec<i32>>, FetchError>;
    /// Archived package bytes for a specific prior version.
    fn fetch_archived_version(&self, setid: &str, version: i32) -> Result<Option<Vec<u8>>, FetchError>;
    /// Pull the SPL XML document out of an archived package.
    fn extract_document_from_package(&self, package: &[u8]) -> Option<String>;
}

pub struct ChangeSummaryBuilder<'a, F: DocumentFetcher> {
    fetcher: &'a F,
    registry: &'a [SectionCode],
}

impl<'a, F: DocumentFetcher> ChangeSummaryBuilder<'a, F> {
    pub fn new(fetcher: &'a F, registry: &'a [SectionCode]) -> Self {
        Self { fetcher, registry }
    }

    /// Compare the current SPL version to the immediately previous one
    /// and return a human-readable summary of changes in the tracked
    /// sections, or one of the terminal sentinels.
    pub fn build(&self, setid: &str, current_version: i32) -> String {
        let history = degrade(self.fetcher.fetch_history(setid), "version history", setid);
        let prev_version = history
            .as_deref()
            .and_then(|versions| previous_version(current_version, versions));

        // Without a previous version there is nothing to compare, and
        // no document content is fetched at all.
        let Some(prev_version) = prev_version else {
            return NO_PREVIOUS_VERSION.to_string();
        };

        let current_sections = self.current_sections(setid);
        let old_sections = self.archived_sections(setid, prev_version);

        if current_sections.is_empty() && old_sections.is_empty() {
            return NO_CONTENT.to_string();
        }

        match render_change_report(&old_sections, &current_sections) {
            Some(report) => report,
            None => NO_TEXT_CHANGES.to_string(),
        }
    }

    fn current_sections(&self, setid: &str) -> SectionMap {
        match degrade(self.fetcher.fetch_current(setid), "current document", setid) {
            Some(xml) => parse_spl_sections(&xml, self.registry),
            None => SectionMap::new(),
        }
    }

    fn archived_sections(&self, setid: &str, version: i32) -> SectionMap {
        let package = degrade(
            self.fetcher.fetch_archived_version(setid, version),
            "archived version",
            setid,
        );
        match package.and_then(|bytes| self.fetcher.extract_document_from_package(&bytes)) {
            Some(xml) => parse_spl_sections(&xml, self.registry),
            None => SectionMap::new(),
        }
    }
}

/// Log a fetch failure and degrade it to an absent result.
fn degrade<T>(result: Result<Option<T>, FetchError>, what: &str, setid: &str) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!("Fetching {} for {} failed: {}", what, setid, e);
            None
        }
    }
}
