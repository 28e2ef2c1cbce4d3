use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use super::DraftError;
use crate::config::PathsConfig;
use crate::segment::{load_manifest, manifest_path, strip_html};

const RAW_KEYS: [&str; 5] = ["raw", "_raw", "body", "content", "text"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChapterSource {
    pub chapter_id: String,
    pub text: String,
    pub origin: PathBuf,
}

/// Resolves a chapter argument, either a file path or a bare chapter id,
/// to its raw text.
#[derive(Clone, Debug)]
pub struct SourceLoader {
    raw_dir: PathBuf,
    segments_dir: PathBuf,
}

impl SourceLoader {
    pub fn new(raw_dir: impl Into<PathBuf>, segments_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            segments_dir: segments_dir.into(),
        }
    }

    pub fn from_paths(paths: &PathsConfig) -> Self {
        Self::new(paths.raw_dir.clone(), paths.segments_dir.clone())
    }

    pub fn load(&self, chapter: &str) -> Result<ChapterSource, DraftError> {
        let path = Path::new(chapter);
        let chapter_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| chapter.to_string());

        if path.is_file() {
            return self.load_file(path, chapter_id);
        }

        for candidate in [
            self.raw_dir.join(format!("{chapter_id}.txt")),
            self.raw_dir.join(format!("{chapter_id}.json")),
        ] {
            if candidate.is_file() {
                return self.load_file(&candidate, chapter_id);
            }
        }

        let manifest = manifest_path(&self.segments_dir, &chapter_id);
        if manifest.is_file() {
            let text = load_manifest(&manifest)?
                .into_iter()
                .map(|segment| segment.text)
                .collect::<Vec<_>>()
                .join("\n\n");
            return Ok(ChapterSource {
                chapter_id,
                text,
                origin: manifest,
            });
        }

        Err(DraftError::SourceNotFound(chapter.to_string()))
    }

    fn load_file(&self, path: &Path, chapter_id: String) -> Result<ChapterSource, DraftError> {
        let contents = fs::read_to_string(path).map_err(|source| DraftError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let contents = contents.trim_start_matches('\u{feff}');

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let text = if is_json {
            let value: Value =
                serde_json::from_str(contents).map_err(|source| DraftError::ParseJson {
                    path: path.to_path_buf(),
                    source,
                })?;
            let raw = raw_text(&value).ok_or_else(|| DraftError::NoText(path.to_path_buf()))?;
            strip_html(raw).trim().to_string()
        } else {
            contents.trim().to_string()
        };

        Ok(ChapterSource {
            chapter_id,
            text,
            origin: path.to_path_buf(),
        })
    }
}

/// First non-empty string under a known key; a list contributes its first item.
fn raw_text(value: &Value) -> Option<&str> {
    let object = match value {
        Value::Array(items) => items.first()?,
        other => other,
    };
    RAW_KEYS.iter().find_map(|key| {
        object
            .get(*key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    })
}
