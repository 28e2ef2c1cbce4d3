use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoiceSpecError {
    #[error("failed to read voice spec `{path}`: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("voice spec `{path}` is not valid YAML: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("voice spec `{0}` is empty")]
    Empty(PathBuf),
}

/// Tone and diction instructions handed verbatim to the writer.
#[derive(Clone, Debug, PartialEq)]
pub struct VoiceSpec {
    pub persona: String,
    pub text: String,
    pub path: Option<PathBuf>,
}

impl VoiceSpec {
    pub fn inline(persona: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            text: text.into(),
            path: None,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, VoiceSpecError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| VoiceSpecError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let text = text.trim_start_matches('\u{feff}').trim().to_string();
        if text.is_empty() {
            return Err(VoiceSpecError::Empty(path.to_path_buf()));
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "voice".to_string());

        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "yaml" | "yml"))
            .unwrap_or(false);

        let persona = if is_yaml {
            let value: serde_yaml::Value =
                serde_yaml::from_str(&text).map_err(|source| VoiceSpecError::Yaml {
                    path: path.to_path_buf(),
                    source,
                })?;
            ["persona", "name"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
                .map(str::to_string)
                .unwrap_or(stem)
        } else {
            stem
        };

        Ok(Self {
            persona,
            text,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn persona_note(&self) -> String {
        if self.persona.trim().is_empty() {
            String::new()
        } else {
            format!(" as {}", self.persona.trim())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn markdown_persona_comes_from_file_stem() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("noir_detective.md");
        fs::write(&path, "\u{feff}# Voice\nShort, hard sentences.\n").unwrap();

        let spec = VoiceSpec::load(&path).unwrap();
        assert_eq!(spec.persona, "noir_detective");
        assert!(spec.text.starts_with("# Voice"));
        assert_eq!(spec.persona_note(), " as noir_detective");
    }

    #[test]
    fn yaml_persona_field_wins() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spec.yaml");
        fs::write(&path, "persona: Gothic Narrator\ndiction: archaic\n").unwrap();

        let spec = VoiceSpec::load(&path).unwrap();
        assert_eq!(spec.persona, "Gothic Narrator");
        assert!(spec.text.contains("diction: archaic"));
    }

    #[test]
    fn invalid_yaml_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.yml");
        fs::write(&path, "persona: [unclosed\n").unwrap();
        assert!(matches!(
            VoiceSpec::load(&path),
            Err(VoiceSpecError::Yaml { .. })
        ));
    }

    #[test]
    fn empty_spec_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.md");
        fs::write(&path, "  \n").unwrap();
        assert!(matches!(VoiceSpec::load(&path), Err(VoiceSpecError::Empty(_))));
    }
}
