//! DailyMed client.
//!
//! Talks to the DailyMed RSS feed and REST services: label update
//! notifications, SPL version history, current SPL XML, and archived
//! prior versions as ZIP packages. Also resolves drug classes to setid
//! sets for filtering. All calls are blocking with fixed per-call
//! timeouts and no retries; a failed call surfaces as a typed
//! `FetchError` which callers degrade to an absent result.

use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::time::Duration;

use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::change_summary::DocumentFetcher;
use crate::config::WatchConfig;
use crate::helpers::strip_markup_to_text;
use crate::types::{FetchError, LabelUpdate};

/// Timeout for lightweight metadata calls (history, class listings, RSS).
const METADATA_TIMEOUT_SECS: u64 = 30;
/// Timeout for full document and archive retrieval.
const DOCUMENT_TIMEOUT_SECS: u64 = 60;

const DEFAULT_PAGESIZE: usize = 100;
const DRUG_CLASS_MAX_PAGES: usize = 20;
const SPL_LISTING_MAX_PAGES: usize = 50;

pub struct DailyMedClient {
    http: Client,
    services_base: String,
    site_base: String,
    rss_url: String,
}

impl DailyMedClient {
    pub fn new() -> Self {
        Self::with_config(&WatchConfig::default())
    }

    pub fn with_config(config: &WatchConfig) -> Self {
        DailyMedClient {
            http: Client::new(),
            services_base: config.services_base.clone(),
            site_base: config.site_base.clone(),
            rss_url: config.rss_url.clone(),
        }
    }

    fn get(&self, url: &str, timeout_secs: u64, query: &[(&str, String)]) -> Result<Response, FetchError> {
        let mut req = self.http.get(url).timeout(Duration::from_secs(timeout_secs));
        if !query.is_empty() {
            req = req.query(query);
        }
        let resp = req.send()?;
        Ok(resp.error_for_status()?)
    }

    /// Fetch and parse the label-updates RSS feed (last 7 days of
    /// updates). Items without a recognizable setid link are skipped.
    pub fn fetch_rss_updates(&self) -> Result<Vec<LabelUpdate>, FetchError> {
        let xml = self.get(&self.rss_url, METADATA_TIMEOUT_SECS, &[])?.text()?;
        Ok(parse_rss_feed(&xml))
    }

    /// Fetch the version history for a setid. `Ok(None)` when DailyMed
    /// has no history record (e.g. a brand-new label).
    pub fn fetch_spl_history(&self, setid: &str) -> Result<Option<Vec<i32>>, FetchError> {
        let url = format!("{}/spls/{}/history.json", self.services_base, setid);
        let resp = match self.get(&url, METADATA_TIMEOUT_SECS, &[]) {
            Ok(resp) => resp,
            Err(FetchError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        let body = resp.text()?;
        parse_history_versions(&body).map(Some)
    }

    /// Fetch the current SPL document as XML text.
    pub fn fetch_spl_xml(&self, setid: &str) -> Result<Option<String>, FetchError> {
        let url = format!("{}/spls/{}.xml", self.services_base, setid);
        match self.get(&url, DOCUMENT_TIMEOUT_SECS, &[]) {
            Ok(resp) => Ok(Some(resp.text()?)),
            Err(FetchError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch a specific SPL version as a ZIP package.
    pub fn fetch_spl_zip(&self, setid: &str, version: i32) -> Result<Option<Vec<u8>>, FetchError> {
        let url = format!("{}/getFile.cfm", self.site_base);
        let query = [
            ("type", "zip".to_string()),
            ("setid", setid.to_string()),
            ("version", version.to_string()),
        ];
        match self.get(&url, DOCUMENT_TIMEOUT_SECS, &query) {
            Ok(resp) => Ok(Some(resp.bytes()?.to_vec())),
            Err(FetchError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch the drug class list (name, code, type), following pages
    /// until exhausted. A failed page logs and returns what was
    /// collected so far.
    pub fn fetch_drug_classes(&self) -> Vec<DrugClass> {
        let url = format!("{}/drugclasses.json", self.services_base);
        let mut out = Vec::new();
        for page in 1..=DRUG_CLASS_MAX_PAGES {
            let query = [
                ("pagesize", DEFAULT_PAGESIZE.to_string()),
                ("page", page.to_string()),
            ];
            let payload: PagedResponse<DrugClass> = match self
                .get(&url, METADATA_TIMEOUT_SECS, &query)
                .and_then(|resp| resp.json().map_err(FetchError::from))
            {
                Ok(p) => p,
                Err(e) => {
                    warn!("Drug class listing page {} failed: {}", page, e);
                    break;
                }
            };
            if payload.data.is_empty() {
                break;
            }
            let has_next_page = payload.has_next_page();
            out.extend(payload.data);
            if !has_next_page {
                break;
            }
        }
        out
    }

    /// Resolve a drug class code to the set of setids of SPLs in that
    /// class, optionally limited to those published on or after a date
    /// (`YYYY-MM-DD`). Empty code resolves to an empty set.
    pub fn fetch_spl_setids_for_drug_class(
        &self,
        drug_class_code: &str,
        published_date_gte: Option<&str>,
    ) -> HashSet<String> {
        let mut setids = HashSet::new();
        if drug_class_code.is_empty() {
            return setids;
        }
        let url = format!("{}/spls.json", self.services_base);
        for page in 1..=SPL_LISTING_MAX_PAGES {
            let mut query = vec![
                ("drug_class_code", drug_class_code.to_string()),
                ("pagesize", DEFAULT_PAGESIZE.to_string()),
                ("page", page.to_string()),
            ];
            if let Some(date) = published_date_gte {
                query.push(("published_date", date.to_string()));
                query.push(("published_date_comparison", "gte".to_string()));
            }
            let payload: PagedResponse<SplListing> = match self
                .get(&url, METADATA_TIMEOUT_SECS, &query)
                .and_then(|resp| resp.json().map_err(FetchError::from))
            {
                Ok(p) => p,
                Err(e) => {
                    warn!("SPL listing page {} for class {} failed: {}", page, drug_class_code, e);
                    break;
                }
            };
            if payload.data.is_empty() {
                break;
            }
            for item in &payload.data {
                if let Some(setid) = &item.setid {
                    if !setid.is_empty() {
                        setids.insert(setid.clone());
                    }
                }
            }
            if !payload.has_next_page() {
                break;
            }
        }
        setids
    }
}

impl Default for DailyMedClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentFetcher for DailyMedClient {
    fn fetch_current(&self, setid: &str) -> Result<Option<String>, FetchError> {
        self.fetch_spl_xml(setid)
    }

    fn fetch_history(&self, setid: &str) -> Result<Option<Vec<i32>>, FetchError> {
        self.fetch_spl_history(setid)
    }

    fn fetch_archived_version(&self, setid: &str, version: i32) -> Result<Option<Vec<u8>>, FetchError> {
        self.fetch_spl_zip(setid, version)
    }

    fn extract_document_from_package(&self, package: &[u8]) -> Option<String> {
        extract_xml_from_spl_zip(package)
    }
}

/// Largest version strictly below `current`, or None when `current` is
/// the oldest known version. Sorting descending and taking the first
/// value below guarantees the closest prior version even when the
/// history has gaps.
pub fn previous_version(current: i32, versions: &[i32]) -> Option<i32> {
    let mut sorted = versions.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.into_iter().find(|v| *v < current)
}

#[derive(Debug, Clone, Deserialize)]
pub struct DrugClass {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default, rename = "type")]
    pub class_type: String,
}

#[derive(Debug, Deserialize)]
struct SplListing {
    #[serde(default)]
    setid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PagedResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    metadata: Option<PageMetadata>,
}

#[derive(Debug, Deserialize)]
struct PageMetadata {
    #[serde(default)]
    next_page: Option<serde_json::Value>,
}

impl<T> PagedResponse<T> {
    fn has_next_page(&self) -> bool {
        match self.metadata.as_ref().and_then(|m| m.next_page.as_ref()) {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(s)) => s != "null" && !s.is_empty(),
            Some(_) => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    data: Option<HistoryData>,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryData {
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    #[serde(default)]
    spl_version: serde_json::Value,
}

/// Parse the history.json payload into version numbers. The service
/// returns `spl_version` sometimes as a number and sometimes as a
/// string; both are accepted.
pub fn parse_history_versions(json: &str) -> Result<Vec<i32>, FetchError> {
    let payload: HistoryResponse =
        serde_json::from_str(json).map_err(|e| FetchError::Parse(e.to_string()))?;
    let entries = payload.data.unwrap_or_default().history;
    Ok(entries.iter().filter_map(|h| version_number(&h.spl_version)).collect())
}

fn version_number(v: &serde_json::Value) -> Option<i32> {
    v.as_i64()
        .map(|n| n as i32)
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Extract setid and version from a DailyMed lookup URL
/// (`.../lookup.cfm?setid=...&version=N`). Version defaults to 1 when
/// missing or unparseable.
pub fn parse_setid_version_from_link(link: &str) -> Option<(String, i32)> {
    let url = Url::parse(link).ok()?;
    if !url.path().contains("lookup.cfm") {
        return None;
    }
    let mut setid: Option<String> = None;
    let mut version: i32 = 1;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "setid" => setid = Some(value.into_owned()),
            "version" => version = value.parse().unwrap_or(1),
            _ => {}
        }
    }
    setid.filter(|s| !s.is_empty()).map(|s| (s, version))
}

/// Parse the RSS feed XML into label update records.
pub fn parse_rss_feed(xml: &str) -> Vec<LabelUpdate> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Field {
        Title,
        Link,
        Description,
        PubDate,
    }

    #[allow(clippy::too_many_arguments)]
    fn append_field(
        field: Option<Field>,
        text: &str,
        title: &mut String,
        link: &mut String,
        description: &mut String,
        pub_date: &mut String,
    ) {
        let target = match field {
            Some(Field::Title) => title,
            Some(Field::Link) => link,
            Some(Field::Description) => description,
            Some(Field::PubDate) => pub_date,
            None => return,
        };
        target.push_str(text);
    }

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut updates = Vec::new();
    let mut in_item = false;
    let mut field: Option<Field> = None;
    let mut title = String::new();
    let mut link = String::new();
    let mut description = String::new();
    let mut pub_date = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"item" => {
                    in_item = true;
                    title.clear();
                    link.clear();
                    description.clear();
                    pub_date.clear();
                }
                b"title" if in_item => field = Some(Field::Title),
                b"link" if in_item => field = Some(Field::Link),
                b"description" if in_item => field = Some(Field::Description),
                b"pubDate" if in_item => field = Some(Field::PubDate),
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if in_item && field.is_some() {
                    if let Ok(text) = t.unescape() {
                        append_field(field, &text, &mut title, &mut link, &mut description, &mut pub_date);
                    }
                }
            }
            Ok(Event::CData(t)) => {
                if in_item && field.is_some() {
                    let text = String::from_utf8_lossy(&t.into_inner()).into_owned();
                    append_field(field, &text, &mut title, &mut link, &mut description, &mut pub_date);
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"item" => {
                    in_item = false;
                    if let Some((setid, version)) = parse_setid_version_from_link(link.trim()) {
                        updates.push(LabelUpdate {
                            title: title.trim().to_string(),
                            link: link.trim().to_string(),
                            setid,
                            version,
                            updated_date: updated_date_from_description(&description),
                            pub_date: pub_date.trim().to_string(),
                        });
                    }
                }
                b"title" | b"link" | b"description" | b"pubDate" => field = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                debug!("RSS parse stopped early: {}", e);
                break;
            }
            Ok(_) => {}
        }
    }

    updates
}

/// The item description often reads "Updated Date: Fri, 13 Feb 2026 00:00:00 EST",
/// sometimes wrapped in markup.
fn updated_date_from_description(description: &str) -> String {
    let plain = strip_markup_to_text(description);
    if plain.contains("Updated Date:") {
        plain.replace("Updated Date:", "").trim().to_string()
    } else {
        String::new()
    }
}

/// Extract the main SPL XML from a DailyMed ZIP package. Prefers an
/// entry whose name marks it as the SPL document, then falls back to
/// the first XML entry.
pub fn extract_xml_from_spl_zip(zip_bytes: &[u8]) -> Option<String> {
    let mut archive = match zip::ZipArchive::new(Cursor::new(zip_bytes)) {
        Ok(a) => a,
        Err(e) => {
            debug!("Not a readable ZIP package: {}", e);
            return None;
        }
    };

    let names: Vec<String> = archive.file_names().map(|s| s.to_string()).collect();
    let picked = names
        .iter()
        .find(|n| {
            let lower = n.to_lowercase();
            lower.ends_with(".xml") && lower.contains("spl")
        })
        .or_else(|| names.iter().find(|n| n.to_lowercase().ends_with(".xml")))?;

    let mut file = archive.by_name(picked).ok()?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).ok()?;
    Some(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    #[test]
    fn test_previous_version_skips_gaps() {
        assert_eq!(previous_version(5, &[1, 2, 3, 5]), Some(3));
    }

    #[test]
    fn test_previous_version_none_when_oldest() {
        assert_eq!(previous_version(1, &[1, 2, 3, 5]), None);
    }

    #[test]
    fn test_previous_version_empty_history() {
        assert_eq!(previous_version(5, &[]), None);
    }

    #[test]
    fn test_previous_version_unsorted_input() {
        assert_eq!(previous_version(7, &[5, 2, 6, 1]), Some(6));
    }

    #[test]
    fn test_parse_link_with_setid_and_version() {
        let link = "https://dailymed.nlm.nih.gov/dailymed/lookup.cfm?setid=abc-123&version=4";
        assert_eq!(parse_setid_version_from_link(link), Some(("abc-123".to_string(), 4)));
    }

    #[test]
    fn test_parse_link_version_defaults_to_one() {
        let link = "https://dailymed.nlm.nih.gov/dailymed/lookup.cfm?setid=abc-123";
        assert_eq!(parse_setid_version_from_link(link), Some(("abc-123".to_string(), 1)));

        let link = "https://dailymed.nlm.nih.gov/dailymed/lookup.cfm?setid=abc-123&version=junk";
        assert_eq!(parse_setid_version_from_link(link), Some(("abc-123".to_string(), 1)));
    }

    #[test]
    fn test_parse_link_rejects_non_lookup_urls() {
        assert_eq!(parse_setid_version_from_link("https://example.com/other.cfm?setid=abc"), None);
        assert_eq!(parse_setid_version_from_link("not a url"), None);
    }

    #[test]
    fn test_parse_link_rejects_missing_setid() {
        let link = "https://dailymed.nlm.nih.gov/dailymed/lookup.cfm?version=4";
        assert_eq!(parse_setid_version_from_link(link), None);
    }

    #[test]
    fn test_history_versions_numeric_and_string() {
        let json = r#"{"data": {"history": [
            {"spl_version": 3},
            {"spl_version": "5"},
            {"spl_version": "junk"}
        ]}}"#;
        assert_eq!(parse_history_versions(json).unwrap(), vec![3, 5]);
    }

    #[test]
    fn test_history_versions_empty_payload() {
        assert_eq!(parse_history_versions(r#"{}"#).unwrap(), Vec::<i32>::new());
        assert!(parse_history_versions("not json").is_err());
    }

    #[test]
    fn test_parse_rss_feed() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>DailyMed Label Updates</title>
  <item>
    <title>SILDENAFIL CITRATE tablet [Example Pharma Inc]</title>
    <link>https://dailymed.nlm.nih.gov/dailymed/lookup.cfm?setid=abc-123&amp;version=5</link>
    <description>Updated Date: Fri, 13 Feb 2026 00:00:00 EST</description>
    <pubDate>Fri, 13 Feb 2026 08:00:00 EST</pubDate>
  </item>
  <item>
    <title>No setid here</title>
    <link>https://example.com/unrelated</link>
    <description>n/a</description>
    <pubDate>Fri, 13 Feb 2026 08:00:00 EST</pubDate>
  </item>
</channel></rss>"#;

        let updates = parse_rss_feed(xml);
        assert_eq!(updates.len(), 1);
        let u = &updates[0];
        assert_eq!(u.setid, "abc-123");
        assert_eq!(u.version, 5);
        assert_eq!(u.title, "SILDENAFIL CITRATE tablet [Example Pharma Inc]");
        assert_eq!(u.updated_date, "Fri, 13 Feb 2026 00:00:00 EST");
        assert_eq!(u.pub_date, "Fri, 13 Feb 2026 08:00:00 EST");
    }

    #[test]
    fn test_updated_date_from_markup_description() {
        assert_eq!(
            updated_date_from_description("<p>Updated Date: Mar 9, 2024</p>"),
            "Mar 9, 2024"
        );
        assert_eq!(updated_date_from_description("no date here"), "");
    }

    #[test]
    fn test_parse_rss_feed_garbage_input() {
        assert!(parse_rss_feed("no items here").is_empty());
    }

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, content) in entries {
            writer.start_file(name.to_string(), options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_zip_extraction_prefers_spl_named_entry() {
        let bytes = zip_with(&[
            ("other.xml", "<other/>"),
            ("spl-doc.xml", "<document/>"),
        ]);
        assert_eq!(extract_xml_from_spl_zip(&bytes), Some("<document/>".to_string()));
    }

    #[test]
    fn test_zip_extraction_falls_back_to_first_xml() {
        let bytes = zip_with(&[
            ("readme.txt", "hello"),
            ("label.xml", "<document/>"),
        ]);
        assert_eq!(extract_xml_from_spl_zip(&bytes), Some("<document/>".to_string()));
    }

    #[test]
    fn test_zip_extraction_no_xml_entry() {
        let bytes = zip_with(&[("readme.txt", "hello")]);
        assert_eq!(extract_xml_from_spl_zip(&bytes), None);
    }

    #[test]
    fn test_zip_extraction_not_a_zip() {
        assert_eq!(extract_xml_from_spl_zip(b"definitely not a zip"), None);
    }

    #[test]
    fn test_has_next_page_variants() {
        let parse = |s: &str| -> PagedResponse<DrugClass> { serde_json::from_str(s).unwrap() };
        assert!(!parse(r#"{"data": []}"#).has_next_page());
        assert!(!parse(r#"{"data": [], "metadata": {"next_page": null}}"#).has_next_page());
        assert!(!parse(r#"{"data": [], "metadata": {"next_page": "null"}}"#).has_next_page());
        assert!(parse(r#"{"data": [], "metadata": {"next_page": "2"}}"#).has_next_page());
        assert!(parse(r#"{"data": [], "metadata": {"next_page": 2}}"#).has_next_page());
    }
}
