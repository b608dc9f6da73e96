//! openFDA drug-label client and cross-validation.
//!
//! openFDA is updated on its own schedule, so its effective date and
//! the DailyMed update date for the same label can disagree. The
//! cross-validation here quantifies that lag: positive lag means
//! DailyMed's date is ahead of the FDA effective date, negative means
//! FDA is ahead, None means one of the dates is unobtainable.

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::warn;

use crate::types::{FetchError, LabelUpdate};
use crate::helpers::parse_label_date;

pub const OPENFDA_LABEL_URL: &str = "https://api.fda.gov/drug/label.json";

const LOOKUP_TIMEOUT_SECS: u64 = 15;

/// Minimal FDA label info for cross-validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdaLabelInfo {
    pub set_id: String,
    /// FDA effective_time parsed from YYYYMMDD.
    pub effective_date: Option<NaiveDate>,
    /// Raw effective_time value, e.g. "20210902".
    pub effective_time_raw: String,
    pub found: bool,
}

/// Outcome of one cross-validation: status message plus signed lag in
/// days (DailyMed date minus FDA effective date), or None when unknown.
pub type FdaValidation = (String, Option<i64>);

#[derive(Debug, Deserialize)]
struct LabelSearchResponse {
    #[serde(default)]
    results: Vec<LabelRecord>,
}

#[derive(Debug, Deserialize)]
struct LabelRecord {
    #[serde(default)]
    effective_time: String,
}

pub struct OpenFdaClient {
    http: Client,
    label_url: String,
}

impl OpenFdaClient {
    pub fn new() -> Self {
        OpenFdaClient {
            http: Client::new(),
            label_url: OPENFDA_LABEL_URL.to_string(),
        }
    }

    /// Fetch the drug label record for an SPL set ID. `Ok(None)` for an
    /// empty setid; a `found: false` result means openFDA answered but
    /// has no record.
    pub fn lookup_by_set_id(&self, setid: &str) -> Result<Option<FdaLabelInfo>, FetchError> {
        if setid.is_empty() {
            return Ok(None);
        }
        let query = [
            ("search", format!("set_id:{}", setid)),
            ("limit", "1".to_string()),
        ];
        let resp = self
            .http
            .get(&self.label_url)
            .timeout(Duration::from_secs(LOOKUP_TIMEOUT_SECS))
            .query(&query)
            .send()?;

        // openFDA answers 404 for a search with no hits.
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Some(FdaLabelInfo {
                set_id: setid.to_string(),
                effective_date: None,
                effective_time_raw: String::new(),
                found: false,
            }));
        }

        let payload: LabelSearchResponse = resp.error_for_status()?.json()?;
        match payload.results.first() {
            None => Ok(Some(FdaLabelInfo {
                set_id: setid.to_string(),
                effective_date: None,
                effective_time_raw: String::new(),
                found: false,
            })),
            Some(record) => Ok(Some(FdaLabelInfo {
                set_id: setid.to_string(),
                effective_date: parse_effective_time(&record.effective_time),
                effective_time_raw: record.effective_time.clone(),
                found: true,
            })),
        }
    }

    /// Cross-validate a batch of updates, one result per record, in
    /// order. Lookup failures degrade to "not queried" after a warn.
    pub fn validate_updates(&self, updates: &[LabelUpdate]) -> Vec<FdaValidation> {
        updates
            .iter()
            .map(|u| {
                let dm_date = parse_label_date(u.best_date_str());
                let info = match self.lookup_by_set_id(&u.setid) {
                    Ok(info) => info,
                    Err(e) => {
                        warn!("openFDA lookup for {} failed: {}", u.setid, e);
                        None
                    }
                };
                cross_validate(dm_date, info.as_ref())
            })
            .collect()
    }
}

impl Default for OpenFdaClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse FDA effective_time (YYYYMMDD) to a date.
pub fn parse_effective_time(eff: &str) -> Option<NaiveDate> {
    let prefix = eff.get(..8)?;
    NaiveDate::parse_from_str(prefix, "%Y%m%d").ok()
}

/// Compare the DailyMed update date with the FDA effective date.
///
/// The outcomes are checked in priority order: not queried, no record,
/// unparsed FDA date, missing DailyMed date, then the day-count
/// comparison. Positive lag means DailyMed is ahead of FDA.
pub fn cross_validate(
    dailymed_date: Option<NaiveDate>,
    fda_info: Option<&FdaLabelInfo>,
) -> FdaValidation {
    let Some(info) = fda_info else {
        return ("FDA (openFDA): not queried".to_string(), None);
    };
    if !info.found {
        return ("FDA (openFDA): no record found for this set ID".to_string(), None);
    }
    let Some(fda_date) = info.effective_date else {
        return (
            format!(
                "FDA (openFDA): effective date not parsed (raw: {})",
                info.effective_time_raw
            ),
            None,
        );
    };
    let Some(dm_date) = dailymed_date else {
        return (
            format!("FDA effective date: {} (DailyMed date unknown)", fda_date),
            None,
        );
    };

    let lag = dm_date.signed_duration_since(fda_date).num_days();
    if lag == 0 {
        (format!("FDA (openFDA): in sync — effective {}", fda_date), Some(0))
    } else if lag > 0 {
        (
            format!(
                "FDA (openFDA): DailyMed {} day(s) ahead — FDA effective {}",
                lag, fda_date
            ),
            Some(lag),
        )
    } else {
        (
            format!(
                "FDA (openFDA): FDA {} day(s) ahead — FDA effective {}",
                -lag, fda_date
            ),
            Some(lag),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fda_info(effective_time_raw: &str, found: bool) -> FdaLabelInfo {
        FdaLabelInfo {
            set_id: "abc-123".to_string(),
            effective_date: parse_effective_time(effective_time_raw),
            effective_time_raw: effective_time_raw.to_string(),
            found,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_effective_time() {
        assert_eq!(parse_effective_time("20210902"), Some(date(2021, 9, 2)));
        // Longer values keep only the date part.
        assert_eq!(parse_effective_time("20210902123000"), Some(date(2021, 9, 2)));
        assert_eq!(parse_effective_time(""), None);
        assert_eq!(parse_effective_time("2021"), None);
        assert_eq!(parse_effective_time("notadate"), None);
    }

    #[test]
    fn test_not_queried_wins_regardless_of_dailymed_date() {
        let (msg, lag) = cross_validate(Some(date(2024, 3, 10)), None);
        assert_eq!(msg, "FDA (openFDA): not queried");
        assert_eq!(lag, None);

        let (msg, lag) = cross_validate(None, None);
        assert_eq!(msg, "FDA (openFDA): not queried");
        assert_eq!(lag, None);
    }

    #[test]
    fn test_no_record_found() {
        let info = fda_info("", false);
        let (msg, lag) = cross_validate(Some(date(2024, 3, 10)), Some(&info));
        assert!(msg.contains("no record found"));
        assert_eq!(lag, None);
    }

    #[test]
    fn test_unparsed_date_includes_raw_value() {
        let info = fda_info("bogus-value", true);
        let (msg, lag) = cross_validate(Some(date(2024, 3, 10)), Some(&info));
        assert!(msg.contains("not parsed"));
        assert!(msg.contains("bogus-value"));
        assert_eq!(lag, None);
    }

    #[test]
    fn test_missing_dailymed_date() {
        let info = fda_info("20240305", true);
        let (msg, lag) = cross_validate(None, Some(&info));
        assert!(msg.contains("2024-03-05"));
        assert!(msg.contains("DailyMed date unknown"));
        assert_eq!(lag, None);
    }

    #[test]
    fn test_in_sync() {
        let info = fda_info("20240310", true);
        let (msg, lag) = cross_validate(Some(date(2024, 3, 10)), Some(&info));
        assert!(msg.contains("in sync"));
        assert!(msg.contains("2024-03-10"));
        assert_eq!(lag, Some(0));
    }

    #[test]
    fn test_dailymed_ahead_positive_lag() {
        let info = fda_info("20240305", true);
        let (msg, lag) = cross_validate(Some(date(2024, 3, 10)), Some(&info));
        assert_eq!(lag, Some(5));
        assert!(msg.contains("DailyMed 5 day(s) ahead"));
    }

    #[test]
    fn test_fda_ahead_negative_lag() {
        let info = fda_info("20240310", true);
        let (msg, lag) = cross_validate(Some(date(2024, 3, 5)), Some(&info));
        assert_eq!(lag, Some(-5));
        assert!(msg.contains("FDA 5 day(s) ahead"));
    }
}
