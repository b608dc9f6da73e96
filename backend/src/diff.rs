//! Line diffing and change narratives.
//!
//! Computes which lines were added and removed between two section
//! texts and renders a bounded, human-readable report per section.

use similar::{ChangeTag, TextDiff};

use crate::helpers::truncate_chars;
use crate::types::SectionMap;

/// Cap on lines fed into the diff, to bound cost on pathological documents.
pub const MAX_DIFF_LINES: usize = 200;
/// Cap on the snippet shown for a newly added section.
pub const SNIPPET_MAX_CHARS: usize = 1500;
/// Cap on a single reported diff line.
pub const LINE_MAX_CHARS: usize = 500;
/// Cap on reported lines per added/removed list.
pub const LIST_MAX_ENTRIES: usize = 30;

/// Zero-context line diff: returns (added, removed) lines, trimmed.
/// Unchanged lines are not reported.
pub fn added_removed_lines(old_text: &str, new_text: &str) -> (Vec<String>, Vec<String>) {
    let old_capped = cap_lines(old_text);
    let new_capped = cap_lines(new_text);

    let diff = TextDiff::from_lines(old_capped.as_str(), new_capped.as_str());

    let mut added = Vec::new();
    let mut removed = Vec::new();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added.push(change.value().trim().to_string()),
            ChangeTag::Delete => removed.push(change.value().trim().to_string()),
            ChangeTag::Equal => {}
        }
    }
    (added, removed)
}

fn cap_lines(s: &str) -> String {
    s.lines().take(MAX_DIFF_LINES).collect::<Vec<_>>().join("\n")
}

/// Render the change narrative for one section, or None when the texts
/// are identical after trimming.
pub fn render_section_diff(name: &str, old_text: &str, new_text: &str) -> Option<String> {
    let old_text = old_text.trim();
    let new_text = new_text.trim();
    if old_text == new_text {
        return None;
    }

    let mut lines: Vec<String> = Vec::new();
    lines.push(name.to_string());

    if old_text.is_empty() {
        lines.push("  Added in this version.".to_string());
        let mut snippet = truncate_chars(new_text, SNIPPET_MAX_CHARS).replace('\n', " ");
        if new_text.chars().count() > SNIPPET_MAX_CHARS {
            snippet.push_str("...");
        }
        lines.push(format!("  {}", snippet));
    } else if new_text.is_empty() {
        lines.push("  Removed in this version.".to_string());
    } else {
        let (added, removed) = added_removed_lines(old_text, new_text);
        if !removed.is_empty() {
            lines.push("  **Removed:**".to_string());
            push_capped_list(&mut lines, &removed);
            lines.push(String::new());
        }
        if !added.is_empty() {
            lines.push("  **Added:**".to_string());
            push_capped_list(&mut lines, &added);
        }
        if added.is_empty() && removed.is_empty() {
            // Pure reflow or whitespace redistribution.
            lines.push("  (Content reflow or minor edits; no clear added/removed lines.)".to_string());
        }
    }

    Some(lines.join("\n"))
}

fn push_capped_list(lines: &mut Vec<String>, entries: &[String]) {
    for entry in entries.iter().take(LIST_MAX_ENTRIES) {
        lines.push(format!("  - {}", truncate_chars(entry, LINE_MAX_CHARS)));
    }
    if entries.len() > LIST_MAX_ENTRIES {
        lines.push(format!("  - ... and {} more line(s)", entries.len() - LIST_MAX_ENTRIES));
    }
}

/// Render the full change report over two section maps, or None when no
/// section produced a narrative. Sections are visited in alphabetical
/// order over the union of names so output is reproducible.
pub fn render_change_report(old_sections: &SectionMap, new_sections: &SectionMap) -> Option<String> {
    let mut names: Vec<&String> = old_sections.keys()
        .chain(new_sections.keys())
        .collect();
    names.sort();
    names.dedup();

    let mut blocks: Vec<String> = Vec::new();
    for name in names {
        let old_text = old_sections.get(name).map(|s| s.as_str()).unwrap_or("");
        let new_text = new_sections.get(name).map(|s| s.as_str()).unwrap_or("");
        if let Some(block) = render_section_diff(name, old_text, new_text) {
            blocks.push(block);
        }
    }

    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join("\n\n").trim().to_string())
    }
}
