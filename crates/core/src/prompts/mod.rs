use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::PromptConfig;
use crate::model::ChatRequest;

pub mod builder;

pub use builder::{PromptBuilder, RevisionPromptInput, SegmentPromptInput, WriterPromptInput};

const BUILT_IN_PROMPTS: &str = include_str!("../../prompts/default.toml");

const SYSTEM_MARKER: &str = "SYSTEM:";
const USER_MARKER: &str = "USER:";

pub type PromptArguments = HashMap<String, String>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptSource {
    BuiltIn,
    File(PathBuf),
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt `{0}` not found")]
    NotFound(String),
    #[error("missing argument `{argument}` when rendering prompt `{key}`")]
    MissingArgument { key: String, argument: String },
    #[error("prompt `{key}` declares required argument `{argument}` that never appears in its template")]
    InvalidRequired { key: String, argument: String },
    #[error("failed to read prompt file `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse built-in prompts: {0}")]
    ParseBuiltIn(#[source] toml::de::Error),
    #[error("failed to parse prompt file `{path}` as TOML: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to parse prompt file `{path}` as YAML: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// System/user pair produced from a template with `SYSTEM:`/`USER:` markers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatPrompt {
    pub system: String,
    pub user: String,
}

impl ChatPrompt {
    pub fn parse(rendered: &str) -> Self {
        let system_at = rendered.find(SYSTEM_MARKER);
        let user_at = rendered.find(USER_MARKER);
        match (system_at, user_at) {
            (Some(s), Some(u)) if s < u => Self {
                system: rendered[s + SYSTEM_MARKER.len()..u].trim().to_string(),
                user: rendered[u + USER_MARKER.len()..].trim().to_string(),
            },
            (None, Some(u)) => Self {
                system: rendered[..u].trim().to_string(),
                user: rendered[u + USER_MARKER.len()..].trim().to_string(),
            },
            _ => Self {
                system: String::new(),
                user: rendered.trim().to_string(),
            },
        }
    }

    pub fn into_request(self) -> ChatRequest {
        ChatRequest::user(self.user).with_system(self.system)
    }
}

#[derive(Clone, Debug)]
enum Piece {
    Text(String),
    Slot(String),
}

#[derive(Clone, Debug)]
pub struct PromptTemplate {
    key: String,
    description: Option<String>,
    source: PromptSource,
    pieces: Vec<Piece>,
    slots: BTreeSet<String>,
    required: BTreeSet<String>,
}

impl PromptTemplate {
    pub fn parse(
        key: impl Into<String>,
        template: &str,
        required: &[String],
        source: PromptSource,
    ) -> Result<Self, PromptError> {
        let key = key.into();
        let pieces = tokenize(template);
        let slots: BTreeSet<String> = pieces
            .iter()
            .filter_map(|piece| match piece {
                Piece::Slot(name) => Some(name.clone()),
                Piece::Text(_) => None,
            })
            .collect();

        let required = if required.is_empty() {
            slots.clone()
        } else {
            let mut declared = BTreeSet::new();
            for name in required.iter().map(|r| r.trim()) {
                if !slots.contains(name) {
                    return Err(PromptError::InvalidRequired {
                        key,
                        argument: name.to_string(),
                    });
                }
                declared.insert(name.to_string());
            }
            declared
        };

        Ok(Self {
            key,
            description: None,
            source,
            pieces,
            slots,
            required,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn source(&self) -> &PromptSource {
        &self.source
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(String::as_str)
    }

    fn check_required(&self, arguments: &PromptArguments) -> Result<(), PromptError> {
        match self.required.iter().find(|r| !arguments.contains_key(*r)) {
            Some(missing) => Err(PromptError::MissingArgument {
                key: self.key.clone(),
                argument: missing.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn render(&self, arguments: &PromptArguments) -> Result<String, PromptError> {
        self.check_required(arguments)?;

        let mut output = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Text(text) => output.push_str(text),
                Piece::Slot(name) => {
                    output.push_str(arguments.get(name).map(String::as_str).unwrap_or(""))
                }
            }
        }
        Ok(output)
    }

    /// Renders into chat messages. Markers are only honoured in the template's
    /// own text, so argument values can never open a new message.
    pub fn render_chat(&self, arguments: &PromptArguments) -> Result<ChatPrompt, PromptError> {
        self.check_required(arguments)?;

        let mut preamble = String::new();
        let mut system = String::new();
        let mut user = String::new();
        let mut target = Part::Preamble;

        for piece in &self.pieces {
            match piece {
                Piece::Slot(name) => {
                    let value = arguments.get(name).map(String::as_str).unwrap_or("");
                    target.select(&mut preamble, &mut system, &mut user).push_str(value);
                }
                Piece::Text(text) => {
                    let mut rest = text.as_str();
                    while let Some((idx, marker, next)) = next_marker(rest) {
                        target
                            .select(&mut preamble, &mut system, &mut user)
                            .push_str(&rest[..idx]);
                        target = next;
                        rest = &rest[idx + marker.len()..];
                    }
                    target
                        .select(&mut preamble, &mut system, &mut user)
                        .push_str(rest);
                }
            }
        }

        if target == Part::Preamble && system.is_empty() && user.is_empty() {
            return Ok(ChatPrompt {
                system: String::new(),
                user: preamble.trim().to_string(),
            });
        }
        preamble.push_str(&system);
        Ok(ChatPrompt {
            system: preamble.trim().to_string(),
            user: user.trim().to_string(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Part {
    Preamble,
    System,
    User,
}

impl Part {
    fn select<'b>(
        self,
        preamble: &'b mut String,
        system: &'b mut String,
        user: &'b mut String,
    ) -> &'b mut String {
        match self {
            Part::Preamble => preamble,
            Part::System => system,
            Part::User => user,
        }
    }
}

fn next_marker(text: &str) -> Option<(usize, &'static str, Part)> {
    let system = text.find(SYSTEM_MARKER).map(|idx| (idx, SYSTEM_MARKER, Part::System));
    let user = text.find(USER_MARKER).map(|idx| (idx, USER_MARKER, Part::User));
    match (system, user) {
        (Some(a), Some(b)) => Some(if a.0 < b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Splits a template into literal text and `{name}` slots. `{{` and `}}`
/// are literal braces; an unterminated `{` is kept as text.
fn tokenize(template: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut text = String::new();
    let mut rest = template;

    while let Some(idx) = rest.find(['{', '}']) {
        text.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        if tail.starts_with("{{") || tail.starts_with("}}") {
            text.push_str(&tail[..1]);
            rest = &tail[2..];
        } else if tail.starts_with('}') {
            text.push('}');
            rest = &tail[1..];
        } else if let Some(close) = tail.find('}') {
            let name = tail[1..close].trim();
            if name.is_empty() {
                text.push_str("{}");
            } else {
                if !text.is_empty() {
                    pieces.push(Piece::Text(std::mem::take(&mut text)));
                }
                pieces.push(Piece::Slot(name.to_string()));
            }
            rest = &tail[close + 1..];
        } else {
            text.push_str(tail);
            rest = "";
        }
    }
    text.push_str(rest);
    if !text.is_empty() {
        pieces.push(Piece::Text(text));
    }
    pieces
}

#[derive(Clone, Debug)]
pub struct PromptRegistry {
    templates: BTreeMap<String, PromptTemplate>,
    directories: Vec<PathBuf>,
    overlays: Vec<PathBuf>,
}

impl PromptRegistry {
    pub fn new() -> Result<Self, PromptError> {
        Self::from_prompt_config(&PromptConfig::default())
    }

    pub fn from_prompt_config(config: &PromptConfig) -> Result<Self, PromptError> {
        Self::with_custom_directories(&config.custom_directories)
    }

    pub fn with_custom_directories<P: AsRef<Path>>(directories: &[P]) -> Result<Self, PromptError> {
        let mut registry = Self {
            templates: BTreeMap::new(),
            directories: directories
                .iter()
                .map(|dir| dir.as_ref().to_path_buf())
                .collect(),
            overlays: Vec::new(),
        };
        registry.reload()?;
        Ok(registry)
    }

    pub fn reload(&mut self) -> Result<(), PromptError> {
        let mut templates = BTreeMap::new();
        let built_in: PromptDocument =
            toml::from_str(BUILT_IN_PROMPTS).map_err(PromptError::ParseBuiltIn)?;
        built_in.install(PromptSource::BuiltIn, &mut templates)?;

        for dir in &self.directories {
            for path in prompt_files(dir)? {
                let document = PromptDocument::read(&path)?;
                document.install(PromptSource::File(path), &mut templates)?;
            }
        }
        for path in &self.overlays {
            let document = PromptDocument::read(path)?;
            document.install(PromptSource::File(path.clone()), &mut templates)?;
        }

        self.templates = templates;
        Ok(())
    }

    /// Layers a single prompt file over everything loaded so far. Later
    /// overlays win; the file is re-read on `reload`.
    pub fn overlay_file(&mut self, path: impl AsRef<Path>) -> Result<(), PromptError> {
        let path = path.as_ref().to_path_buf();
        let document = PromptDocument::read(&path)?;
        document.install(PromptSource::File(path.clone()), &mut self.templates)?;
        self.overlays.push(path);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&PromptTemplate> {
        self.templates.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.templates.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn format(&self, key: &str, args: &PromptArguments) -> Result<String, PromptError> {
        self.get(key)
            .ok_or_else(|| PromptError::NotFound(key.to_string()))?
            .render(args)
    }

    pub fn format_with<I, K, V>(&self, key: &str, arguments: I) -> Result<String, PromptError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let args: PromptArguments = arguments
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.format(key, &args)
    }

    /// Renders `key` and splits it into system and user messages.
    pub fn chat_with<I, K, V>(&self, key: &str, arguments: I) -> Result<ChatPrompt, PromptError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let args: PromptArguments = arguments
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.get(key)
            .ok_or_else(|| PromptError::NotFound(key.to_string()))?
            .render_chat(&args)
    }
}

fn prompt_files(dir: &Path) -> Result<Vec<PathBuf>, PromptError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let io_err = |source| PromptError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let known = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "toml" | "yaml" | "yml"))
            .unwrap_or(false);
        if known && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Debug, Default, Deserialize)]
struct PromptDocument {
    #[serde(default)]
    prompts: BTreeMap<String, RawPrompt>,
}

#[derive(Debug, Deserialize)]
struct RawPrompt {
    #[serde(alias = "text")]
    template: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    required: Vec<String>,
}

impl PromptDocument {
    fn read(path: &Path) -> Result<Self, PromptError> {
        let contents = fs::read_to_string(path).map_err(|source| PromptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);
        if is_toml {
            toml::from_str(&contents).map_err(|source| PromptError::ParseToml {
                path: path.to_path_buf(),
                source,
            })
        } else {
            serde_yaml::from_str(&contents).map_err(|source| PromptError::ParseYaml {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    fn install(
        self,
        source: PromptSource,
        templates: &mut BTreeMap<String, PromptTemplate>,
    ) -> Result<(), PromptError> {
        for (key, raw) in self.prompts {
            let mut template =
                PromptTemplate::parse(key.clone(), &raw.template, &raw.required, source.clone())?;
            template.description = raw.description;
            templates.insert(key, template);
        }
        Ok(())
    }
}
