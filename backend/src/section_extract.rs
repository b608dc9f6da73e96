//! SPL section extraction.
//!
//! Pulls the tracked label sections out of an SPL XML document into a
//! plain-text map keyed by section display name. A section matches when
//! its direct `code` child carries one of the registry codes; the first
//! descendant `text` element supplies the narrative, serialized with
//! markup stripped and whitespace collapsed.
//!
//! SPL documents normally declare the HL7 v3 namespace, but archived
//! copies sometimes arrive with it stripped. Matching runs
//! namespace-qualified first, then a local-name fallback pass for any
//! codes still missing. Extraction is best-effort: empty or malformed
//! input yields an empty map, never an error.

use std::collections::HashMap;

use quick_xml::NsReader;
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use tracing::debug;

use crate::config::SectionCode;
use crate::helpers::{collapse_whitespace, truncate_chars};
use crate::types::SectionMap;

const HL7_NS: &[u8] = b"urn:hl7-org:v3";

/// Cap on extracted section text, to bound downstream diffing.
pub const MAX_SECTION_CHARS: usize = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NamespaceMode {
    /// Element names must resolve to the HL7 v3 namespace.
    Qualified,
    /// Match on local name only.
    Local,
}

impl NamespaceMode {
    fn matches(&self, resolve: &ResolveResult) -> bool {
        match self {
            NamespaceMode::Qualified => {
                matches!(resolve, ResolveResult::Bound(Namespace(ns)) if *ns == HL7_NS)
            }
            NamespaceMode::Local => true,
        }
    }
}

/// An open `section` element during the scan.
struct SectionFrame {
    /// Element stack depth at which this section sits.
    depth: usize,
    /// Code attribute of the section's direct `code` child, once seen.
    code: Option<String>,
    /// Serialized content of the section's first `text` element.
    text: Option<String>,
}

struct TextCapture {
    /// Element stack depth of the open `text` element.
    depth: usize,
    buf: String,
    /// Indices of section frames this text belongs to.
    targets: Vec<usize>,
}

/// Extract the tracked sections from an SPL document.
///
/// Returns display name -> plain text. A key is present only when a
/// matching section with a `text` element was found; an empty `text`
/// element maps to an empty string. On duplicate codes the first match
/// in document order wins.
pub fn parse_spl_sections(xml: &str, registry: &[SectionCode]) -> SectionMap {
    if xml.trim().is_empty() || registry.is_empty() {
        return SectionMap::new();
    }

    let all_codes: HashMap<&str, &str> = registry.iter()
        .map(|sc| (sc.code.as_str(), sc.name.as_str()))
        .collect();

    let mut out = scan_sections(xml, &all_codes, NamespaceMode::Qualified);

    let missing: HashMap<&str, &str> = registry.iter()
        .filter(|sc| !out.contains_key(&sc.name))
        .map(|sc| (sc.code.as_str(), sc.name.as_str()))
        .collect();

    if !missing.is_empty() {
        for (name, text) in scan_sections(xml, &missing, NamespaceMode::Local) {
            out.entry(name).or_insert(text);
        }
    }

    out
}

/// One streaming pass over the document, collecting the wanted codes
/// under the given namespace mode.
fn scan_sections(xml: &str, wanted: &HashMap<&str, &str>, mode: NamespaceMode) -> SectionMap {
    let mut reader = NsReader::from_str(xml);

    let mut out = SectionMap::new();
    let mut stack_depth: usize = 0;
    let mut frames: Vec<SectionFrame> = Vec::new();
    let mut capture: Option<TextCapture> = None;

    loop {
        match reader.read_resolved_event() {
            Ok((resolve, Event::Start(e))) => {
                stack_depth += 1;
                let local = e.local_name();
                if !mode.matches(&resolve) {
                    continue;
                }
                match local.as_ref() {
                    b"section" => {
                        frames.push(SectionFrame { depth: stack_depth, code: None, text: None });
                    }
                    b"code" => {
                        if let Some(frame) = frames.last_mut() {
                            if stack_depth == frame.depth + 1 && frame.code.is_none() {
                                frame.code = code_attribute(&e);
                            }
                        }
                    }
                    b"text" => {
                        if capture.is_none() {
                            let targets: Vec<usize> = frames.iter().enumerate()
                                .filter(|(_, f)| f.text.is_none())
                                .map(|(i, _)| i)
                                .collect();
                            if !targets.is_empty() {
                                capture = Some(TextCapture {
                                    depth: stack_depth,
                                    buf: String::new(),
                                    targets,
                                });
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok((resolve, Event::Empty(e))) => {
                if !mode.matches(&resolve) {
                    continue;
                }
                match e.local_name().as_ref() {
                    b"code" => {
                        if let Some(frame) = frames.last_mut() {
                            if stack_depth == frame.depth && frame.code.is_none() {
                                frame.code = code_attribute(&e);
                            }
                        }
                    }
                    // <text/> counts as present-but-empty.
                    b"text" => {
                        if capture.is_none() {
                            for frame in frames.iter_mut().filter(|f| f.text.is_none()) {
                                frame.text = Some(String::new());
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok((_, Event::Text(t))) => {
                if let Some(cap) = capture.as_mut() {
                    match t.unescape() {
                        Ok(text) => {
                            cap.buf.push_str(&text);
                            cap.buf.push(' ');
                        }
                        Err(e) => {
                            debug!("Unescape failed in section text: {}", e);
                        }
                    }
                }
            }
            Ok((_, Event::CData(t))) => {
                if let Some(cap) = capture.as_mut() {
                    cap.buf.push_str(&String::from_utf8_lossy(&t.into_inner()));
                    cap.buf.push(' ');
                }
            }
            Ok((_, Event::End(_))) => {
                stack_depth = stack_depth.saturating_sub(1);

                // The text element closed: assign its content.
                if let Some(cap) = capture.take_if(|cap| stack_depth < cap.depth) {
                    let cleaned = collapse_whitespace(&cap.buf);
                    let cleaned = truncate_chars(&cleaned, MAX_SECTION_CHARS).to_string();
                    for idx in cap.targets {
                        if let Some(frame) = frames.get_mut(idx) {
                            if frame.text.is_none() {
                                frame.text = Some(cleaned.clone());
                            }
                        }
                    }
                }

                // Any section frames closed by this end tag?
                while frames.last().is_some_and(|frame| stack_depth < frame.depth) {
                    if let Some(frame) = frames.pop() {
                        if let (Some(code), Some(text)) = (frame.code, frame.text) {
                            if let Some(name) = wanted.get(code.as_str()) {
                                out.entry(name.to_string()).or_insert(text);
                            }
                        }
                    }
                }
            }
            Ok((_, Event::Eof)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("SPL parse failed, returning no sections: {}", e);
                return SectionMap::new();
            }
        }
    }

    out
}

fn code_attribute(e: &quick_xml::events::BytesStart) -> Option<String> {
    match e.try_get_attribute("code") {
        Ok(Some(attr)) => attr.unescape_value().ok().map(|v| v.into_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Vec<SectionCode> {
        vec![
            SectionCode::new("34067-9", "Warnings and Precautions"),
            SectionCode::new("34068-7", "Dosage and Administration"),
        ]
    }

    fn spl_doc(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<document xmlns="urn:hl7-org:v3">
  <component><structuredBody>{}</structuredBody></component>
</document>"#,
            body
        )
    }

    #[test]
    fn test_namespaced_document() {
        let xml = spl_doc(
            r#"<component><section>
                 <code code="34067-9" codeSystem="2.16.840.1.113883.6.1"/>
                 <title>WARNINGS AND PRECAUTIONS</title>
                 <text><paragraph>Risk of dizziness.</paragraph></text>
               </section></component>"#,
        );
        let sections = parse_spl_sections(&xml, &registry());
        assert_eq!(sections.get("Warnings and Precautions").map(|s| s.as_str()),
                   Some("Risk of dizziness."));
    }

    #[test]
    fn test_namespace_stripped_document() {
        let xml = r#"<document><component><section>
            <code code="34068-7"/>
            <text><paragraph>Take once daily.</paragraph></text>
        </section></component></document>"#;
        let sections = parse_spl_sections(xml, &registry());
        assert_eq!(sections.get("Dosage and Administration").map(|s| s.as_str()),
                   Some("Take once daily."));
    }

    #[test]
    fn test_prefixed_namespace_document() {
        let xml = r#"<v3:document xmlns:v3="urn:hl7-org:v3"><v3:section>
            <v3:code code="34067-9"/>
            <v3:text><v3:paragraph>Do not exceed the dose.</v3:paragraph></v3:text>
        </v3:section></v3:document>"#;
        let sections = parse_spl_sections(xml, &registry());
        assert_eq!(sections.get("Warnings and Precautions").map(|s| s.as_str()),
                   Some("Do not exceed the dose."));
    }

    #[test]
    fn test_missing_section_has_no_key() {
        let xml = spl_doc(
            r#"<section><code code="34067-9"/><text><paragraph>W.</paragraph></text></section>"#,
        );
        let sections = parse_spl_sections(&xml, &registry());
        assert!(sections.contains_key("Warnings and Precautions"));
        assert!(!sections.contains_key("Dosage and Administration"));
    }

    #[test]
    fn test_empty_text_element_maps_to_empty_string() {
        let xml = spl_doc(r#"<section><code code="34067-9"/><text></text></section>"#);
        let sections = parse_spl_sections(&xml, &registry());
        assert_eq!(sections.get("Warnings and Precautions").map(|s| s.as_str()), Some(""));
    }

    #[test]
    fn test_self_closed_text_element_maps_to_empty_string() {
        let xml = spl_doc(r#"<section><code code="34068-7"/><text/></section>"#);
        let sections = parse_spl_sections(&xml, &registry());
        assert_eq!(sections.get("Dosage and Administration").map(|s| s.as_str()), Some(""));
    }

    #[test]
    fn test_section_without_text_element_has_no_key() {
        let xml = spl_doc(r#"<section><code code="34067-9"/><title>W</title></section>"#);
        let sections = parse_spl_sections(&xml, &registry());
        assert!(!sections.contains_key("Warnings and Precautions"));
    }

    #[test]
    fn test_duplicate_code_first_match_wins() {
        let xml = spl_doc(
            r#"<section><code code="34067-9"/><text><paragraph>First.</paragraph></text></section>
               <section><code code="34067-9"/><text><paragraph>Second.</paragraph></text></section>"#,
        );
        let sections = parse_spl_sections(&xml, &registry());
        assert_eq!(sections.get("Warnings and Precautions").map(|s| s.as_str()), Some("First."));
    }

    #[test]
    fn test_markup_stripped_and_whitespace_collapsed() {
        let xml = spl_doc(
            r#"<section><code code="34067-9"/>
               <text><paragraph>Risk   of
               <content styleCode="bold">serious</content> harm.</paragraph></text></section>"#,
        );
        let sections = parse_spl_sections(&xml, &registry());
        let text = sections.get("Warnings and Precautions").unwrap();
        assert!(!text.contains('<'));
        assert!(!text.contains("  "));
        assert!(text.contains("serious"));
    }

    #[test]
    fn test_long_section_truncated() {
        let filler = "x".repeat(9000);
        let xml = spl_doc(&format!(
            r#"<section><code code="34067-9"/><text><paragraph>{}</paragraph></text></section>"#,
            filler
        ));
        let sections = parse_spl_sections(&xml, &registry());
        let text = sections.get("Warnings and Precautions").unwrap();
        assert_eq!(text.chars().count(), MAX_SECTION_CHARS);
    }

    #[test]
    fn test_malformed_input_is_empty_map() {
        assert!(parse_spl_sections("<document><section>", &registry()).is_empty());
        assert!(parse_spl_sections("not xml at all", &registry()).is_empty());
    }

    #[test]
    fn test_empty_input_is_empty_map() {
        assert!(parse_spl_sections("", &registry()).is_empty());
        assert!(parse_spl_sections("   ", &registry()).is_empty());
    }

    #[test]
    fn test_wrong_namespace_not_matched_in_qualified_pass_but_found_by_fallback() {
        // A document in some other namespace still matches through the
        // local-name fallback, same as the original XPath fallback.
        let xml = r#"<document xmlns="urn:example:other"><section>
            <code code="34067-9"/>
            <text><paragraph>Other ns.</paragraph></text>
        </section></document>"#;
        let sections = parse_spl_sections(xml, &registry());
        assert_eq!(sections.get("Warnings and Precautions").map(|s| s.as_str()),
                   Some("Other ns."));
    }
}
