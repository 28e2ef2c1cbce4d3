//! Two-critic editor panel. Each critic reads the rewrite next to its raw
//! source, a moderated discussion merges their notes, and the result is a
//! change list the writer consumes in the next round.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::invoke::{Invoker, DEFAULT_MAX_RETRIES};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::{LanguageModel, LanguageModelError};
use crate::prompts::{PromptError, PromptRegistry};
use crate::voice::VoiceSpec;
use crate::writer::{DraftError, SourceLoader};

mod feedback;
mod sanity;

pub use feedback::{parse_change_list, ChangeList, FeedbackError};
pub use sanity::{SanityChecker, SanityOutcome, SanityRequest, Verdict};

pub const CRITIC_COPY_EDITOR_PROMPT: &str = "critic_copy_editor";
pub const CRITIC_ATMOSPHERE_PROMPT: &str = "critic_atmosphere";
pub const CRITIC_DISCUSSION_PROMPT: &str = "critic_discussion";
pub const SANITY_CHECK_PROMPT: &str = "sanity_check";
pub const DEFAULT_CONTEXT_LIMIT_TOKENS: usize = 28_000;
const CHARS_PER_TOKEN: usize = 4;
const CRITIC_TEMPERATURE: f32 = 0.2;
const MISSING_RAW: &str = "[RAW SOURCE NOT FOUND]";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EditorStage {
    CopyEditor,
    Atmosphere,
    Discussion,
    SanityCheck,
}

impl EditorStage {
    fn label(&self) -> &'static str {
        match self {
            Self::CopyEditor => "critic A (copy-editor)",
            Self::Atmosphere => "critic B (atmosphere)",
            Self::Discussion => "critic discussion",
            Self::SanityCheck => "sanity check",
        }
    }

    fn prompt_key(&self) -> &'static str {
        match self {
            Self::CopyEditor => CRITIC_COPY_EDITOR_PROMPT,
            Self::Atmosphere => CRITIC_ATMOSPHERE_PROMPT,
            Self::Discussion => CRITIC_DISCUSSION_PROMPT,
            Self::SanityCheck => SANITY_CHECK_PROMPT,
        }
    }
}

impl fmt::Display for EditorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("editor panel needs at least one rewrite")]
    NoChapters,
    #[error("failed to create directory `{path}`: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read `{path}`: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write `{path}`: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to load raw source: {0}")]
    Source(#[from] DraftError),
    #[error("failed to serialize editor report: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to render {stage} prompt: {source}")]
    Prompt {
        stage: EditorStage,
        #[source]
        source: PromptError,
    },
    #[error("model call for {stage} failed: {source}")]
    Model {
        stage: EditorStage,
        #[source]
        source: LanguageModelError,
    },
    #[error("model returned nothing for {stage}")]
    EmptyResponse { stage: EditorStage },
}

/// One chapter as the critics see it.
#[derive(Clone, Debug)]
pub struct ChapterRewrite {
    pub chapter_id: String,
    pub raw_source: Option<String>,
    pub rewrite: String,
}

impl ChapterRewrite {
    /// Loads every `*.txt` rewrite in `draft_dir` and pairs it with the raw
    /// chapter `sources` resolves for its stem (`.txt`, `.json` or segment
    /// manifest). Files named after editor or sanity artefacts are skipped.
    pub fn collect(draft_dir: &Path, sources: &SourceLoader) -> Result<Vec<Self>, EditorError> {
        let read_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| EditorError::ReadFile { path, source }
        };

        let mut paths = Vec::new();
        for entry in fs::read_dir(draft_dir).map_err(read_err(draft_dir))? {
            let path = entry.map_err(read_err(draft_dir))?.path();
            let is_txt = path.extension().map(|e| e == "txt").unwrap_or(false);
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if is_txt && path.is_file() && !stem.contains("editor") && !stem.contains("sanity") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut chapters = Vec::with_capacity(paths.len());
        for path in paths {
            let chapter_id = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let rewrite = fs::read_to_string(&path).map_err(read_err(&path))?;
            let raw_source = match sources.load(&chapter_id) {
                Ok(source) => Some(source.text),
                Err(DraftError::SourceNotFound(_)) | Err(DraftError::NoText(_)) => None,
                Err(err) => return Err(err.into()),
            };
            chapters.push(Self {
                chapter_id,
                raw_source,
                rewrite,
            });
        }
        Ok(chapters)
    }
}

#[derive(Clone, Debug)]
pub struct EditorRequest<'a> {
    pub voice: &'a VoiceSpec,
    pub chapters: &'a [ChapterRewrite],
    pub round: u32,
    pub output_dir: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EditorReport {
    #[serde(rename = "critic_A_summary")]
    pub critic_a_summary: String,
    #[serde(rename = "critic_B_summary")]
    pub critic_b_summary: String,
    pub discussion_transcript: String,
    pub change_list: ChangeList,
    pub accepted: bool,
    #[serde(default)]
    pub round: u32,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub chapters: Vec<String>,
}

impl EditorReport {
    pub fn file_name(round: u32) -> String {
        format!("editor_round{round}.json")
    }

    pub fn load(path: &Path) -> Result<Self, EditorError> {
        let text = fs::read_to_string(path).map_err(|source| EditorError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[derive(Clone, Debug)]
pub struct EditorOutput {
    pub report: EditorReport,
    pub path: PathBuf,
}

/// What the critics read for one round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CriticBundle {
    pub text: String,
    pub chapters_included: usize,
    pub truncated: bool,
}

/// Voice spec followed by `# id / ## RAW SOURCE / ## REWRITE` sections.
/// Chapters go in whole: the first one that would push the bundle past
/// `limit_chars` is left out together with everything after it.
pub fn build_bundle(
    voice: &VoiceSpec,
    chapters: &[ChapterRewrite],
    limit_chars: usize,
) -> CriticBundle {
    let mut text = format!("VOICE SPECIFICATION:\n{}\n", voice.text.trim());
    let mut used = text.chars().count();
    let mut chapters_included = 0;

    for chapter in chapters {
        let section = format!(
            "\n# {}\n\n## RAW SOURCE (reference only)\n{}\n\n## REWRITE\n{}\n",
            chapter.chapter_id,
            chapter
                .raw_source
                .as_deref()
                .map(str::trim)
                .unwrap_or(MISSING_RAW),
            chapter.rewrite.trim()
        );
        let size = section.chars().count();
        if used + size > limit_chars {
            break;
        }
        used += size;
        text.push_str(&section);
        chapters_included += 1;
    }

    CriticBundle {
        truncated: chapters_included < chapters.len() || used > limit_chars,
        text,
        chapters_included,
    }
}

pub struct EditorPanel<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    max_retries: usize,
    context_limit_tokens: usize,
}

impl<'a> EditorPanel<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self {
            prompts,
            sink,
            max_retries: DEFAULT_MAX_RETRIES,
            context_limit_tokens: DEFAULT_CONTEXT_LIMIT_TOKENS,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_context_limit(mut self, tokens: usize) -> Self {
        self.context_limit_tokens = tokens.max(1);
        self
    }

    pub fn review<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &EditorRequest<'_>,
    ) -> Result<EditorOutput, EditorError> {
        if request.chapters.is_empty() {
            return Err(EditorError::NoChapters);
        }
        for chapter in request.chapters.iter().filter(|c| c.raw_source.is_none()) {
            self.log(
                LogLevel::Warn,
                format!("raw source missing for {}", chapter.chapter_id),
            );
        }

        let CriticBundle {
            text: bundle,
            chapters_included,
            truncated,
        } = build_bundle(
            request.voice,
            request.chapters,
            self.context_limit_tokens * CHARS_PER_TOKEN,
        );
        if truncated {
            self.log(
                LogLevel::Warn,
                format!(
                    "bundle exceeds {} tokens; critics see {} of {} chapters (truncated) and the round will not be accepted",
                    self.context_limit_tokens,
                    chapters_included,
                    request.chapters.len()
                ),
            );
        }

        let critic_a = self.ask(model, EditorStage::CopyEditor, [("bundle", bundle.clone())])?;
        let critic_b = self.ask(model, EditorStage::Atmosphere, [("bundle", bundle.clone())])?;
        let discussion = self.ask(
            model,
            EditorStage::Discussion,
            [
                ("bundle", bundle),
                ("critic_a", critic_a.clone()),
                ("critic_b", critic_b.clone()),
            ],
        )?;

        let mut change_list = parse_change_list(&discussion);
        if change_list.is_empty() {
            self.log(
                LogLevel::Warn,
                "discussion produced no bullets; merging the individual critics",
            );
            change_list = parse_change_list(&critic_a).merged(&parse_change_list(&critic_b));
        }
        let accepted = !truncated && !change_list.is_empty();

        let report = EditorReport {
            critic_a_summary: critic_a,
            critic_b_summary: critic_b,
            discussion_transcript: discussion,
            change_list,
            accepted,
            round: request.round,
            truncated,
            chapters: request
                .chapters
                .iter()
                .map(|c| c.chapter_id.clone())
                .collect(),
        };

        fs::create_dir_all(&request.output_dir).map_err(|source| EditorError::CreateDir {
            path: request.output_dir.clone(),
            source,
        })?;
        let path = request
            .output_dir
            .join(EditorReport::file_name(request.round));
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(&path, json).map_err(|source| EditorError::WriteFile {
            path: path.clone(),
            source,
        })?;

        self.log(
            LogLevel::Info,
            format!(
                "round {} marked {} ({} must / {} nice) → {}",
                request.round,
                if accepted { "ACCEPTED" } else { "REJECTED" },
                report.change_list.must.len(),
                report.change_list.nice.len(),
                path.display()
            ),
        );
        Ok(EditorOutput { report, path })
    }

    fn ask<M, const N: usize>(
        &self,
        model: &M,
        stage: EditorStage,
        arguments: [(&str, String); N],
    ) -> Result<String, EditorError>
    where
        M: LanguageModel + ?Sized,
    {
        let chat = self
            .prompts
            .chat_with(stage.prompt_key(), arguments)
            .map_err(|source| EditorError::Prompt { stage, source })?;
        let request = chat.into_request().with_temperature(CRITIC_TEMPERATURE);
        let answer = Invoker::new(self.sink, self.max_retries)
            .call(model, stage.label(), &request)
            .map_err(|source| EditorError::Model { stage, source })?;
        if answer.is_empty() {
            return Err(EditorError::EmptyResponse { stage });
        }
        Ok(answer)
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}
