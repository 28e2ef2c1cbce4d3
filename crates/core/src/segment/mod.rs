use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::text::split_sentences;

mod html;

pub use html::{strip_html, unescape_entities};

pub const MANIFEST_SUFFIX: &str = "_segments.json";
const PREFERRED_KEYS: [&str; 4] = ["content", "body", "text", "chapter"];
const FALLBACK_MIN_CHARS: usize = 20;
const MIN_UNIT_CHARS: usize = 4;

static PARAGRAPH_BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t\x{3000}]*\n\s*").expect("valid paragraph regex"));

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("failed to read `{path}`: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("`{path}` is not valid JSON: {source}")]
    ParseJson {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("unsupported source file `{0}` (expected .txt or .json)")]
    Unsupported(PathBuf),
    #[error("failed to create directory `{path}`: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write `{path}`: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize segment manifest `{path}`: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    #[default]
    Paragraph,
    Sentence,
}

impl SplitMode {
    fn code(self) -> char {
        match self {
            Self::Paragraph => 'p',
            Self::Sentence => 's',
        }
    }
}

impl fmt::Display for SplitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Paragraph => "paragraph",
            Self::Sentence => "sentence",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub text: String,
}

#[derive(Clone, Debug, Default)]
pub struct SegmentOptions {
    pub mode: SplitMode,
    pub write_csv: bool,
}

#[derive(Clone, Debug)]
pub struct SegmentOutput {
    pub source: PathBuf,
    pub segments: Vec<Segment>,
    pub manifest_path: PathBuf,
    pub csv_path: Option<PathBuf>,
}

/// Reads a raw chapter. Plain text comes back as written; JSON crawler dumps
/// may hold one chapter object, a list of them, or an object with a
/// `chapters` list, and their chapter strings are cleaned of markup.
pub fn load_source_text(path: &Path) -> Result<String, SegmentError> {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    let read = || {
        fs::read_to_string(path)
            .map(|text| text.trim_start_matches('\u{feff}').to_string())
            .map_err(|source| SegmentError::ReadFile {
                path: path.to_path_buf(),
                source,
            })
    };

    match ext.as_deref() {
        Some("txt") => read(),
        Some("json") => {
            let raw = read()?;
            let value: Value =
                serde_json::from_str(&raw).map_err(|source| SegmentError::ParseJson {
                    path: path.to_path_buf(),
                    source,
                })?;
            Ok(extract_json_text(&value))
        }
        _ => Err(SegmentError::Unsupported(path.to_path_buf())),
    }
}

pub fn extract_json_text(value: &Value) -> String {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("chapters") {
            Some(Value::Array(items)) => items.iter().collect(),
            _ => vec![value],
        },
        other => vec![other],
    };

    items
        .into_iter()
        .filter_map(chapter_text)
        .map(|text| strip_html(&text))
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn chapter_text(item: &Value) -> Option<String> {
    match item {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => {
            for key in PREFERRED_KEYS {
                let found = map
                    .iter()
                    .find(|(name, value)| name.to_lowercase() == key && is_non_empty(value));
                if let Some((_, Value::String(text))) = found {
                    return Some(text.clone());
                }
            }
            map.values().find_map(|value| match value {
                Value::String(text) if text.chars().count() > FALLBACK_MIN_CHARS => {
                    Some(text.clone())
                }
                _ => None,
            })
        }
        _ => None,
    }
}

fn is_non_empty(value: &Value) -> bool {
    matches!(value, Value::String(text) if !text.trim().is_empty())
}

/// CRLF → LF, NBSP → space, then NFKC.
pub fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\u{a0}', " ")
        .nfkc()
        .collect()
}

pub fn split_units(text: &str, mode: SplitMode) -> Vec<String> {
    let units: Vec<String> = match mode {
        SplitMode::Paragraph => PARAGRAPH_BREAK_RE
            .split(text)
            .map(|unit| unit.trim().to_string())
            .collect(),
        SplitMode::Sentence => PARAGRAPH_BREAK_RE
            .split(text)
            .flat_map(split_sentences)
            .collect(),
    };
    units
        .into_iter()
        .filter(|unit| unit.chars().count() >= MIN_UNIT_CHARS)
        .collect()
}

/// Normalises and splits one chapter's text. Ids are `{stem}_{p|s}{nnn}`,
/// numbered from 1, so identical input always yields identical ids.
pub fn segment_text(stem: &str, raw: &str, mode: SplitMode) -> Vec<Segment> {
    let cleaned = normalize(raw);
    split_units(&cleaned, mode)
        .into_iter()
        .enumerate()
        .map(|(idx, text)| Segment {
            id: format!("{stem}_{}{:03}", mode.code(), idx + 1),
            text,
        })
        .collect()
}

pub fn manifest_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}{MANIFEST_SUFFIX}"))
}

pub fn load_manifest(path: &Path) -> Result<Vec<Segment>, SegmentError> {
    let raw = fs::read_to_string(path).map_err(|source| SegmentError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| SegmentError::ParseJson {
        path: path.to_path_buf(),
        source,
    })
}

pub struct Segmenter<'a> {
    sink: &'a dyn LogSink,
    options: SegmentOptions,
}

impl<'a> Segmenter<'a> {
    pub fn new(sink: &'a dyn LogSink) -> Self {
        Self {
            sink,
            options: SegmentOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SegmentOptions) -> Self {
        self.options = options;
        self
    }

    /// Segments a single file or every `.txt`/`.json` file under a directory.
    pub fn segment_path(
        &self,
        input: &Path,
        output_dir: &Path,
    ) -> Result<Vec<SegmentOutput>, SegmentError> {
        if !input.is_dir() {
            return Ok(vec![self.segment_file(input, output_dir)?]);
        }

        let mut files = Vec::new();
        collect_sources(input, &mut files)?;
        files.sort();
        self.log(
            LogLevel::Info,
            format!("Found {} source files under {}", files.len(), input.display()),
        );

        let mut seen = HashSet::new();
        let mut outputs = Vec::with_capacity(files.len());
        for file in files {
            let stem = file_stem(&file);
            if !seen.insert(stem.clone()) {
                self.log(
                    LogLevel::Warn,
                    format!("{} shares stem `{stem}` with an earlier file; its segments overwrite the earlier ones", file.display()),
                );
            }
            outputs.push(self.segment_file(&file, output_dir)?);
        }
        Ok(outputs)
    }

    pub fn segment_file(&self, path: &Path, output_dir: &Path) -> Result<SegmentOutput, SegmentError> {
        let raw = load_source_text(path)?;
        let stem = file_stem(path);
        let segments = segment_text(&stem, &raw, self.options.mode);

        fs::create_dir_all(output_dir).map_err(|source| SegmentError::CreateDir {
            path: output_dir.to_path_buf(),
            source,
        })?;

        for segment in &segments {
            let seg_path = output_dir.join(format!("{}.txt", segment.id));
            write_file(&seg_path, &segment.text)?;
        }

        let manifest = manifest_path(output_dir, &stem);
        let json = serde_json::to_string_pretty(&segments).map_err(|source| {
            SegmentError::Serialize {
                path: manifest.clone(),
                source,
            }
        })?;
        write_file(&manifest, &json)?;

        let csv_path = if self.options.write_csv {
            let csv = output_dir.join(format!("{stem}_segments.csv"));
            write_file(&csv, &segments_to_csv(&segments))?;
            Some(csv)
        } else {
            None
        };

        if segments.is_empty() {
            self.log(
                LogLevel::Warn,
                format!("{} produced no segments", path.display()),
            );
        } else {
            self.log(
                LogLevel::Info,
                format!(
                    "{} → {} {} segments",
                    path.display(),
                    segments.len(),
                    self.options.mode
                ),
            );
        }

        Ok(SegmentOutput {
            source: path.to_path_buf(),
            segments,
            manifest_path: manifest,
            csv_path,
        })
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}

fn collect_sources(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), SegmentError> {
    let entries = fs::read_dir(dir).map_err(|source| SegmentError::ReadFile {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let path = entry
            .map_err(|source| SegmentError::ReadFile {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        if path.is_dir() {
            collect_sources(&path, files)?;
            continue;
        }
        let supported = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "txt" | "json"))
            .unwrap_or(false);
        if supported {
            files.push(path);
        }
    }
    Ok(())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "chapter".to_string())
}

fn write_file(path: &Path, contents: &str) -> Result<(), SegmentError> {
    fs::write(path, contents).map_err(|source| SegmentError::WriteFile {
        path: path.to_path_buf(),
        source,
    })
}

fn segments_to_csv(segments: &[Segment]) -> String {
    let mut out = String::from("seg_id,text\n");
    for segment in segments {
        out.push_str(&csv_field(&segment.id));
        out.push(',');
        out.push_str(&csv_field(&segment.text));
        out.push('\n');
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{NullLogSink, VecLogSink};
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn paragraph_ids_are_stable_and_padded() {
        let raw = "First paragraph here.\n\nSecond one.\r\n\r\nok\n\nThird paragraph.";
        let first = segment_text("ch01", raw, SplitMode::Paragraph);
        let second = segment_text("ch01", raw, SplitMode::Paragraph);
        assert_eq!(first, second);
        let ids: Vec<_> = first.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["ch01_p001", "ch01_p002", "ch01_p003"]);
        assert_eq!(first[2].text, "Third paragraph.");
    }

    #[test]
    fn sentence_mode_uses_s_prefix() {
        let segments = segment_text("c", "One sentence. Two sentence! Three?", SplitMode::Sentence);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].id, "c_s002");
        assert_eq!(segments[1].text, "Two sentence!");
    }

    #[test]
    fn sentence_mode_keeps_initials_and_abbreviations() {
        let segments = segment_text(
            "c",
            "J. K. Rowling wrote books. She lived in Scotland, e.g. Edinburgh. Done!",
            SplitMode::Sentence,
        );
        let texts: Vec<_> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "J. K. Rowling wrote books.",
                "She lived in Scotland, e.g. Edinburgh.",
                "Done!"
            ]
        );
    }

    #[test]
    fn plain_text_markup_is_kept_verbatim() {
        let raw = "He typed <b>bold</b> and 3 < 4 > 2 in the notes.";
        let segments = segment_text("c", raw, SplitMode::Paragraph);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, raw);

        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "Tom &amp; Jerry <br> stay.").unwrap();
        assert_eq!(load_source_text(&path).unwrap(), "Tom &amp; Jerry <br> stay.");
    }

    #[test]
    fn json_chapters_decode_named_entities() {
        let value = json!({"content": "<p>Caf&eacute; &copy; 2020 &mdash; na&iuml;ve</p>"});
        let segments = segment_text("c", &extract_json_text(&value), SplitMode::Paragraph);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].text.contains("Café"));
        assert!(segments[0].text.contains("naïve"));
    }

    #[test]
    fn normalisation_handles_nbsp_and_fullwidth() {
        assert_eq!(normalize("a\u{a0}b\r\nＡ１"), "a b\nA1");
    }

    #[test]
    fn json_prefers_known_keys_then_long_strings() {
        let value = json!({
            "chapters": [
                {"title": "Ch 1", "Content": "Body of chapter one."},
                {"url": "x", "summary": "A long enough free-form string to be picked."},
                {"title": "short"}
            ]
        });
        let text = extract_json_text(&value);
        assert_eq!(
            text,
            "Body of chapter one.\n\nA long enough free-form string to be picked."
        );
    }

    #[test]
    fn json_single_object_and_list_forms() {
        assert_eq!(extract_json_text(&json!({"body": "only"})), "only");
        assert_eq!(extract_json_text(&json!(["a", {"text": "b"}])), "a\n\nb");
    }

    #[test]
    fn empty_input_yields_no_segments() {
        assert!(segment_text("x", "   \n\n ", SplitMode::Paragraph).is_empty());
    }

    #[test]
    fn csv_quotes_special_fields() {
        let csv = segments_to_csv(&[Segment {
            id: "a_p001".into(),
            text: "He said, \"go\"".into(),
        }]);
        assert_eq!(csv, "seg_id,text\na_p001,\"He said, \"\"go\"\"\"\n");
    }

    #[test]
    fn segment_file_writes_segments_manifest_and_csv() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("lotm_0001.json");
        fs::write(
            &source,
            "\u{feff}{\"content\": \"<p>Klein woke.</p><p>Translator: someone</p><p>The moon was red.</p>\"}",
        )
        .unwrap();
        let out = dir.path().join("seg");

        let sink = VecLogSink::new();
        let segmenter = Segmenter::new(&sink).with_options(SegmentOptions {
            mode: SplitMode::Paragraph,
            write_csv: true,
        });
        let output = segmenter.segment_file(&source, &out).unwrap();

        assert_eq!(output.segments.len(), 2);
        assert_eq!(
            fs::read_to_string(out.join("lotm_0001_p002.txt")).unwrap(),
            "The moon was red."
        );
        let manifest = load_manifest(&output.manifest_path).unwrap();
        assert_eq!(manifest, output.segments);
        assert!(output.csv_path.unwrap().exists());
        assert!(sink.contains(LogLevel::Info, "2 paragraph segments"));
    }

    #[test]
    fn directories_are_walked_recursively() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("book").join("vol1");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("c2.txt"), "Second chapter text.").unwrap();
        fs::write(dir.path().join("c1.txt"), "First chapter text.").unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let segmenter = Segmenter::new(&NullLogSink);
        let outputs = segmenter
            .segment_path(dir.path(), &dir.path().join("out"))
            .unwrap();
        let stems: Vec<_> = outputs
            .iter()
            .map(|o| o.segments[0].id.clone())
            .collect();
        assert_eq!(outputs.len(), 2);
        assert!(stems.contains(&"c1_p001".to_string()));
        assert!(stems.contains(&"c2_p001".to_string()));
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chapter.md");
        fs::write(&path, "text").unwrap();
        assert!(matches!(
            load_source_text(&path),
            Err(SegmentError::Unsupported(_))
        ));
    }
}
