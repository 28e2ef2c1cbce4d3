use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::text::normalize_whitespace;

static BULLET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[-*•]|\d+\.)\s+(.+)$").expect("valid bullet regex"));
static INLINE_HEADING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[#*\s]*(?:\d+[.)]\s*)?(must|nice)\b[^:]{0,30}:(.*)$")
        .expect("valid inline heading regex")
});

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("failed to read feedback `{path}`: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("feedback `{path}` is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("feedback `{0}` has no `must` or `nice` list")]
    MissingLists(PathBuf),
}

/// Edits agreed by the editor panel, split into required and optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeList {
    #[serde(default)]
    pub must: Vec<String>,
    #[serde(default)]
    pub nice: Vec<String>,
}

impl ChangeList {
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.nice.is_empty()
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Reads a change list from an editor report or a bare `{must, nice}`
    /// object. At least one of the two lists must be present.
    pub fn load(path: &Path) -> Result<Self, FeedbackError> {
        let text = fs::read_to_string(path).map_err(|source| FeedbackError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_json::from_str(&text).map_err(|source| FeedbackError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let holder = match value.get("change_list") {
            Some(nested) if nested.is_object() => nested,
            _ => &value,
        };
        if holder.get("must").is_none() && holder.get("nice").is_none() {
            return Err(FeedbackError::MissingLists(path.to_path_buf()));
        }
        serde_json::from_value(holder.clone()).map_err(|source| FeedbackError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Union of two lists, keeping first occurrences.
    pub fn merged(&self, other: &ChangeList) -> ChangeList {
        ChangeList {
            must: dedup(self.must.iter().chain(&other.must)),
            nice: dedup(self.nice.iter().chain(&other.nice)),
        }
    }

    pub fn bullet_block(items: &[String]) -> String {
        if items.is_empty() {
            return "(none)".to_string();
        }
        items
            .iter()
            .map(|item| format!("- {item}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Section {
    Must,
    Nice,
}

/// Collects MUST/NICE bullets from a critic answer. Bullets before any
/// heading count as MUST; `Nice: item` lines carry their item inline.
pub fn parse_change_list(text: &str) -> ChangeList {
    let mut section = Section::Must;
    let mut must = Vec::new();
    let mut nice = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let item = if let Some((next, inline)) = heading_section(line) {
            section = next;
            match inline {
                Some(item) => item,
                None => continue,
            }
        } else if let Some(caps) = BULLET_RE.captures(line) {
            caps[1].trim().to_string()
        } else {
            continue;
        };
        match section {
            Section::Must => must.push(item),
            Section::Nice => nice.push(item),
        }
    }

    ChangeList {
        must: dedup(must.iter()),
        nice: dedup(nice.iter()),
    }
}

fn heading_section(line: &str) -> Option<(Section, Option<String>)> {
    if BULLET_RE.is_match(line) {
        return None;
    }
    if let Some(caps) = INLINE_HEADING_RE.captures(line) {
        let section = if caps[1].eq_ignore_ascii_case("nice") {
            Section::Nice
        } else {
            Section::Must
        };
        let rest = caps[2].trim_matches(|c: char| c == '*' || c.is_whitespace());
        return Some((section, (!rest.is_empty()).then(|| rest.to_string())));
    }

    let looks_like_heading = line.starts_with('#') || line.starts_with("**");
    if !looks_like_heading {
        return None;
    }
    let bare = line
        .trim_start_matches('#')
        .trim_matches(|c: char| c == '*' || c.is_whitespace())
        .to_ascii_lowercase();
    let bare = bare.trim_start_matches(|c: char| c.is_ascii_digit() || c == ')' || c == '.');
    let bare = bare.trim_start();
    if bare.starts_with("nice") {
        Some((Section::Nice, None))
    } else if bare.starts_with("must") {
        Some((Section::Must, None))
    } else {
        None
    }
}

fn dedup<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .filter(|item| seen.insert(normalize_whitespace(item).to_lowercase()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn headed_lists_are_split() {
        let text = "Both critics agree the pacing drags.\n\n### MUST\n- Fix the name of the inn.\n1. Restore the missing letter.\n\nNICE-to-have:\n* Trim the second paragraph.\n• Vary sentence openings.";
        let list = parse_change_list(text);
        assert_eq!(
            list.must,
            vec!["Fix the name of the inn.", "Restore the missing letter."]
        );
        assert_eq!(
            list.nice,
            vec!["Trim the second paragraph.", "Vary sentence openings."]
        );
    }

    #[test]
    fn bullets_without_headings_are_must() {
        let list = parse_change_list("- one\n- two\n- one");
        assert_eq!(list.must, vec!["one", "two"]);
        assert!(list.nice.is_empty());
    }

    #[test]
    fn bullets_before_the_first_heading_are_must() {
        let text = "Agreed edits\n- Fix the tense drift.\n- Cut the recap.\nNICE:\n- Trim adverbs.";
        let list = parse_change_list(text);
        assert_eq!(list.must, vec!["Fix the tense drift.", "Cut the recap."]);
        assert_eq!(list.nice, vec!["Trim adverbs."]);
    }

    #[test]
    fn inline_prefixes_carry_their_item() {
        let text = "Must: Keep the bell motif.\n- Fix the inn name.\nnice: Shorter opening.\n**Nice:** Vary openings.\n- Drop one adverb.";
        let list = parse_change_list(text);
        assert_eq!(list.must, vec!["Keep the bell motif.", "Fix the inn name."]);
        assert_eq!(
            list.nice,
            vec!["Shorter opening.", "Vary openings.", "Drop one adverb."]
        );
    }

    #[test]
    fn bold_and_colon_headings_are_recognised() {
        let list = parse_change_list("**MUST**\n- a\n**NICE**\n- b\nMUST:\n- c");
        assert_eq!(list.must, vec!["a", "c"]);
        assert_eq!(list.nice, vec!["b"]);
    }

    #[test]
    fn merge_drops_duplicates() {
        let a = ChangeList {
            must: vec!["Fix  tense".into()],
            nice: vec![],
        };
        let b = ChangeList {
            must: vec!["fix tense".into(), "Keep the bell".into()],
            nice: vec!["Shorter".into()],
        };
        let merged = a.merged(&b);
        assert_eq!(merged.must, vec!["Fix  tense", "Keep the bell"]);
        assert_eq!(merged.nice, vec!["Shorter"]);
    }

    #[test]
    fn load_accepts_report_and_bare_lists() {
        let dir = tempdir().unwrap();
        let report = dir.path().join("editor_round1.json");
        fs::write(
            &report,
            r#"{"critic_A_summary": "", "change_list": {"must": ["a"], "nice": []}, "accepted": true}"#,
        )
        .unwrap();
        assert_eq!(ChangeList::load(&report).unwrap().must, vec!["a"]);

        let bare = dir.path().join("bare.json");
        fs::write(&bare, r#"{"nice": ["b"]}"#).unwrap();
        let list = ChangeList::load(&bare).unwrap();
        assert!(list.must.is_empty());
        assert_eq!(list.nice, vec!["b"]);
    }

    #[test]
    fn load_rejects_files_without_lists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("other.json");
        fs::write(&path, r#"{"accepted": true}"#).unwrap();
        assert!(matches!(
            ChangeList::load(&path),
            Err(FeedbackError::MissingLists(_))
        ));
    }
}
