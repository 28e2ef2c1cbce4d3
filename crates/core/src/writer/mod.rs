use chrono::Local;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::WriterConfig;
use crate::editor::{ChangeList, FeedbackError};
use crate::invoke::{Invoker, DEFAULT_MAX_RETRIES};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::{ChatMessage, ChatRequest, LanguageModel, LanguageModelError};
use crate::prompts::{
    PromptBuilder, PromptError, PromptRegistry, SegmentPromptInput, WriterPromptInput,
};
use crate::segment::SegmentError;
use crate::text::{
    chunk_words, estimate_max_tokens, last_words, truncate_to_words, word_count,
    DEFAULT_ENDING_WORDS,
};
use crate::voice::VoiceSpec;

mod revision;
mod source;

pub use revision::{
    validate_revision, RevisionOutput, RevisionReport, RevisionRequest, RevisionService,
};
pub use source::{ChapterSource, SourceLoader};

pub const DEFAULT_WRITER_TEMPERATURE: f32 = 0.7;
const CHUNK_SLACK_WORDS: usize = 50;
const PREAMBLES: [&str; 9] = [
    "here is the revised draft:",
    "here's the revised version:",
    "here is the draft:",
    "here's the draft:",
    "revised draft:",
    "applying the requested changes:",
    "final draft:",
    "final:",
    "draft:",
];
const CHATTER_OPENERS: [&str; 4] = ["i'll rewrite", "i'll create", "i'll revise", "let me "];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterStage {
    FullDraft,
    SegmentedDraft,
    Revision,
}

impl WriterStage {
    fn label(&self) -> &'static str {
        match self {
            Self::FullDraft => "full draft",
            Self::SegmentedDraft => "segmented draft",
            Self::Revision => "revision",
        }
    }
}

impl fmt::Display for WriterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
pub enum DraftError {
    #[error("no source found for chapter `{0}`")]
    SourceNotFound(String),
    #[error("`{0}` has no raw/_raw/body/content/text field")]
    NoText(PathBuf),
    #[error("source text for `{0}` is empty")]
    EmptySource(String),
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
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error(transparent)]
    Feedback(#[from] FeedbackError),
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
    #[error("failed to serialise `{path}`: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to render {stage} prompt: {source}")]
    Prompt {
        stage: WriterStage,
        #[source]
        source: PromptError,
    },
    #[error("model call for {stage} failed: {source}")]
    Model {
        stage: WriterStage,
        #[source]
        source: LanguageModelError,
    },
    #[error("model returned nothing for {stage} of `{chapter}`")]
    EmptyResponse { stage: WriterStage, chapter: String },
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DraftMode {
    Full,
    #[default]
    Segmented,
}

#[derive(Clone, Debug)]
pub struct DraftRequest<'a> {
    pub chapter_id: &'a str,
    pub source: &'a str,
    pub voice: &'a VoiceSpec,
    pub output_dir: PathBuf,
    pub mode: DraftMode,
    pub previous_final: Option<&'a str>,
    pub feedback: Option<&'a ChangeList>,
}

#[derive(Clone, Debug)]
pub struct DraftOutput {
    pub chapter_id: String,
    pub path: PathBuf,
    pub text: String,
    pub source_words: usize,
    pub draft_words: usize,
}

#[derive(Serialize)]
struct PromptLogEntry<'a> {
    timestamp: String,
    chapter: &'a str,
    persona: &'a str,
    stage: WriterStage,
    messages: Vec<ChatMessage>,
}

/// Writes a prompt as JSON into `dir`, one file per call.
pub(crate) fn write_prompt_log(
    dir: &Path,
    chapter: &str,
    persona: &str,
    stage: WriterStage,
    request: &ChatRequest,
) -> Result<PathBuf, DraftError> {
    fs::create_dir_all(dir).map_err(|source| DraftError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let now = Local::now();
    let persona_tag = if persona.is_empty() {
        String::new()
    } else {
        format!("_{}", persona.replace(char::is_whitespace, "_"))
    };
    let path = dir.join(format!(
        "{chapter}{persona_tag}_{}.json",
        now.format("%Y%m%d_%H%M%S_%3f")
    ));
    let entry = PromptLogEntry {
        timestamp: now.to_rfc3339(),
        chapter,
        persona,
        stage,
        messages: request.messages(),
    };
    let json = serde_json::to_string_pretty(&entry).map_err(|source| DraftError::Serialize {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, json).map_err(|source| DraftError::WriteFile {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Drops code fences and a leading "Here is the draft:"-style line.
pub fn clean_model_output(text: &str) -> String {
    let unfenced: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect();
    let mut cleaned = unfenced.join("\n").trim().to_string();

    let opens_with = |prefix: &str| {
        cleaned
            .get(..prefix.len())
            .map(|head| head.eq_ignore_ascii_case(prefix))
            .unwrap_or(false)
    };
    if let Some(preamble) = PREAMBLES.iter().find(|p| opens_with(p)) {
        cleaned = cleaned[preamble.len()..].trim_start().to_string();
    } else if CHATTER_OPENERS.iter().any(|p| opens_with(p)) {
        if let Some((_, rest)) = cleaned.split_once('\n') {
            if !rest.trim().is_empty() {
                cleaned = rest.trim_start().to_string();
            }
        }
    }
    cleaned
}

pub(crate) fn write_text(path: &Path, text: &str) -> Result<(), DraftError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| DraftError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, text).map_err(|source| DraftError::WriteFile {
        path: path.to_path_buf(),
        source,
    })
}

/// First-draft writer. Rewrites a raw chapter in a voice, either whole or
/// as labelled segments, optionally seeded with the previous round's final
/// text and editor change list.
pub struct DraftService<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    max_retries: usize,
    settings: WriterConfig,
    temperature: f32,
    prompt_log_dir: Option<PathBuf>,
}

impl<'a> DraftService<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self {
            prompts,
            sink,
            max_retries: DEFAULT_MAX_RETRIES,
            settings: WriterConfig::default(),
            temperature: DEFAULT_WRITER_TEMPERATURE,
            prompt_log_dir: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_settings(mut self, settings: WriterConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_prompt_log(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompt_log_dir = Some(dir.into());
        self
    }

    pub fn generate<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &DraftRequest<'_>,
    ) -> Result<DraftOutput, DraftError> {
        let source = match self.settings.sample_words {
            Some(limit) => truncate_to_words(request.source, limit),
            None => request.source.trim().to_string(),
        };
        if source.trim().is_empty() {
            return Err(DraftError::EmptySource(request.chapter_id.to_string()));
        }
        let source_words = word_count(&source);
        let builder = PromptBuilder::new(self.prompts);

        let (stage, chat) = match request.mode {
            DraftMode::Full => {
                let chat = builder.writer_full(&WriterPromptInput {
                    voice: request.voice,
                    source: &source,
                    previous_final: request.previous_final,
                    feedback: request.feedback,
                });
                (WriterStage::FullDraft, chat)
            }
            DraftMode::Segmented => {
                let segments = chunk_words(&source, self.settings.chunk_words, CHUNK_SLACK_WORDS);
                let target_words =
                    (source_words as f64 * f64::from(self.settings.target_ratio)).round() as usize;
                let raw_ending = last_words(&source, DEFAULT_ENDING_WORDS);
                self.log(
                    LogLevel::Debug,
                    format!(
                        "{}: {} segments, target {} words",
                        request.chapter_id,
                        segments.len(),
                        target_words
                    ),
                );
                let chat = builder.writer_segmented(&SegmentPromptInput {
                    voice: request.voice,
                    segments: &segments,
                    source_words,
                    target_words,
                    raw_ending: &raw_ending,
                    previous_final: request.previous_final,
                    feedback: request.feedback,
                });
                (WriterStage::SegmentedDraft, chat)
            }
        };
        let chat = chat.map_err(|source| DraftError::Prompt { stage, source })?;
        let chat_request = chat
            .into_request()
            .with_temperature(self.temperature)
            .with_max_tokens(estimate_max_tokens(&source));

        if let Some(dir) = &self.prompt_log_dir {
            let path = write_prompt_log(
                dir,
                request.chapter_id,
                &request.voice.persona,
                stage,
                &chat_request,
            )?;
            self.log(LogLevel::Debug, format!("prompt logged to {}", path.display()));
        }

        let label = format!("{stage} {}", request.chapter_id);
        let response = Invoker::new(self.sink, self.max_retries)
            .call(model, &label, &chat_request)
            .map_err(|source| DraftError::Model { stage, source })?;
        let text = clean_model_output(&response);
        if text.is_empty() {
            return Err(DraftError::EmptyResponse {
                stage,
                chapter: request.chapter_id.to_string(),
            });
        }

        let path = request
            .output_dir
            .join(format!("{}.txt", request.chapter_id));
        write_text(&path, &text)?;

        let draft_words = word_count(&text);
        self.log(
            LogLevel::Info,
            format!(
                "{} → {} ({} → {} words)",
                request.chapter_id,
                path.display(),
                source_words,
                draft_words
            ),
        );
        Ok(DraftOutput {
            chapter_id: request.chapter_id.to_string(),
            path,
            text,
            source_words,
            draft_words,
        })
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullLogSink;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct Replies {
        queue: Mutex<VecDeque<String>>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl Replies {
        fn new(items: &[&str]) -> Self {
            Self {
                queue: Mutex::new(items.iter().map(|s| s.to_string()).collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl LanguageModel for Replies {
        fn complete(&self, request: &ChatRequest) -> Result<String, LanguageModelError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(self.queue.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    #[test]
    fn cleaning_strips_fences_and_preambles() {
        assert_eq!(
            clean_model_output("```text\nHere is the draft:\nThe bell rang.\n```"),
            "The bell rang."
        );
        assert_eq!(clean_model_output("FINAL: The end."), "The end.");
        assert_eq!(
            clean_model_output("I'll rewrite this chapter now.\nThe bell rang."),
            "The bell rang."
        );
        assert_eq!(clean_model_output("Plain text."), "Plain text.");
    }

    #[test]
    fn segmented_draft_is_written_and_logged() {
        let dir = tempdir().unwrap();
        let registry = PromptRegistry::new().unwrap();
        let sink = NullLogSink;
        let voice = VoiceSpec::inline("Wry", "Dry.");
        let model = Replies::new(&["", "Here is the draft:\nThe bell, twice."]);
        let log_dir = dir.path().join("prompts");

        let output = DraftService::new(&registry, &sink)
            .with_prompt_log(&log_dir)
            .generate(
                &model,
                &DraftRequest {
                    chapter_id: "ch_0001",
                    source: "The bell rang. It rang again.",
                    voice: &voice,
                    output_dir: dir.path().join("round_1"),
                    mode: DraftMode::Segmented,
                    previous_final: None,
                    feedback: None,
                },
            )
            .unwrap();

        assert_eq!(output.text, "The bell, twice.");
        assert_eq!(output.source_words, 6);
        assert_eq!(
            fs::read_to_string(dir.path().join("round_1/ch_0001.txt")).unwrap(),
            "The bell, twice."
        );

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].temperature, Some(0.7));
        assert_eq!(seen[0].max_tokens, Some(1024));
        assert!(seen[0].user.contains("[S1]\nThe bell rang. It rang again."));

        let logs: Vec<_> = fs::read_dir(&log_dir).unwrap().collect();
        assert_eq!(logs.len(), 1);
        let entry = fs::read_to_string(logs[0].as_ref().unwrap().path()).unwrap();
        assert!(entry.contains("\"stage\": \"segmented_draft\""));
        assert!(entry.contains("\"persona\": \"Wry\""));
    }

    #[test]
    fn prompt_log_is_json_and_failures_propagate() {
        let dir = tempdir().unwrap();
        let request = ChatRequest::user("Rewrite this.").with_system("You are terse.");

        let path = write_prompt_log(
            &dir.path().join("logs"),
            "ch_0004",
            "Wry Voice",
            WriterStage::Revision,
            &request,
        )
        .unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("ch_0004_Wry_Voice_"));
        let entry: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(entry["stage"], "revision");
        assert_eq!(entry["messages"].as_array().unwrap().len(), 2);

        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, "x").unwrap();
        let err = write_prompt_log(&blocker, "ch_0004", "", WriterStage::Revision, &request)
            .unwrap_err();
        assert!(matches!(err, DraftError::CreateDir { .. }));
    }

    #[test]
    fn sample_words_limits_source() {
        let dir = tempdir().unwrap();
        let registry = PromptRegistry::new().unwrap();
        let sink = NullLogSink;
        let voice = VoiceSpec::inline("Wry", "Dry.");
        let model = Replies::new(&["Short."]);
        let settings = WriterConfig {
            sample_words: Some(3),
            ..WriterConfig::default()
        };

        let output = DraftService::new(&registry, &sink)
            .with_settings(settings)
            .generate(
                &model,
                &DraftRequest {
                    chapter_id: "ch_0002",
                    source: "one two three four five",
                    voice: &voice,
                    output_dir: dir.path().to_path_buf(),
                    mode: DraftMode::Full,
                    previous_final: Some("Earlier."),
                    feedback: None,
                },
            )
            .unwrap();

        assert_eq!(output.source_words, 3);
        let seen = model.seen.lock().unwrap();
        assert!(seen[0].user.contains("RAW SOURCE:\none two three\n"));
        assert!(seen[0].user.contains("PREVIOUS FINAL CHAPTER:\nEarlier."));
    }

    #[test]
    fn blank_answers_become_an_error() {
        let dir = tempdir().unwrap();
        let registry = PromptRegistry::new().unwrap();
        let sink = NullLogSink;
        let voice = VoiceSpec::inline("Wry", "Dry.");
        let model = Replies::new(&["", "```\n```"]);

        let err = DraftService::new(&registry, &sink)
            .with_max_retries(1)
            .generate(
                &model,
                &DraftRequest {
                    chapter_id: "ch_0003",
                    source: "Some words here.",
                    voice: &voice,
                    output_dir: dir.path().to_path_buf(),
                    mode: DraftMode::Full,
                    previous_final: None,
                    feedback: None,
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            DraftError::EmptyResponse {
                stage: WriterStage::FullDraft,
                ..
            }
        ));
    }
}
