//! Watchlist and section-registry configuration.
//!
//! The tracked section codes and the drug watchlist are configuration
//! data passed into the pipeline, not compiled-in constants, so the
//! pipeline can run against synthetic registries in tests. The defaults
//! reproduce the stock watchlist and the four key SPL sections.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Serialize, Deserialize};

/// A tracked SPL section: LOINC code and display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionCode {
    pub code: String,
    pub name: String,
}

impl SectionCode {
    pub fn new(code: &str, name: &str) -> Self {
        Self { code: code.to_string(), name: name.to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Drug name substrings matched against feed titles, case-insensitive.
    pub watchlist: Vec<String>,
    /// SPL sections extracted for change tracking.
    pub sections: Vec<SectionCode>,
    pub rss_url: String,
    pub services_base: String,
    pub site_base: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            watchlist: [
                "sildenafil",
                "tramadol",
                "bupropion",
                "escitalopram",
                "anastrozole",
                "buprenorphine",
                "tamsulosin",
                "nortriptyline",
                "magnesium sulfate",
                "bumetanide",
            ].iter().map(|s| s.to_string()).collect(),
            sections: vec![
                SectionCode::new("34067-9", "Warnings and Precautions"),
                SectionCode::new("34068-7", "Dosage and Administration"),
                SectionCode::new("43685-7", "Contraindications"),
                SectionCode::new("42232-9", "Indications and Usage"),
            ],
            rss_url: "https://dailymed.nlm.nih.gov/dailymed/rss.cfm".to_string(),
            services_base: "https://dailymed.nlm.nih.gov/dailymed/services/v2".to_string(),
            site_base: "https://dailymed.nlm.nih.gov/dailymed".to_string(),
        }
    }
}

impl WatchConfig {
    /// Load configuration from a JSON file. Missing fields fall back to
    /// the defaults.
    pub fn load_from_json(path: &Path) -> Result<Self> {
        let mut file = File::open(path)
            .with_context(|| format!("Failed to open config file: {}", path.display()))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: WatchConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sections() {
        let config = WatchConfig::default();
        assert_eq!(config.sections.len(), 4);
        assert!(config.sections.iter().any(|s| s.code == "34067-9"));
        assert_eq!(config.watchlist.len(), 10);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: WatchConfig =
            serde_json::from_str(r#"{"watchlist": ["warfarin"]}"#).unwrap();
        assert_eq!(config.watchlist, vec!["warfarin".to_string()]);
        assert_eq!(config.sections.len(), 4);
        assert!(config.rss_url.contains("dailymed"));
    }
}
