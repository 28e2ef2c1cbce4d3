use serde::Serialize;
use std::path::PathBuf;

use super::{clean_model_output, write_prompt_log, write_text, DraftError, WriterStage};
use crate::editor::ChangeList;
use crate::invoke::{Invoker, DEFAULT_MAX_RETRIES};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::LanguageModel;
use crate::prompts::{PromptBuilder, PromptRegistry, RevisionPromptInput};
use crate::text::{last_sentence, last_words, word_count, word_jaccard};
use crate::voice::VoiceSpec;

pub const REVISION_TEMPERATURE: f32 = 0.3;
const REVISION_MAX_TOKENS: u32 = 8000;
const ENDING_WORDS: usize = 50;
const ENDING_OVERLAP_THRESHOLD: f64 = 0.5;
const WORD_CHANGE_WARNING_PERCENT: f64 = 10.0;

#[derive(Clone, Debug)]
pub struct RevisionRequest<'a> {
    pub chapter_id: &'a str,
    pub voice: &'a VoiceSpec,
    pub current_draft: &'a str,
    pub change_list: &'a ChangeList,
    pub raw_ending: Option<&'a str>,
    pub output_path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RevisionReport {
    pub original_words: usize,
    pub revised_words: usize,
    pub word_count_change: i64,
    pub percent_change: f64,
    pub must_changes_count: usize,
    pub nice_changes_count: usize,
    pub endings_differ: bool,
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct RevisionOutput {
    pub path: PathBuf,
    pub text: String,
    pub report: RevisionReport,
}

/// Compares a revision with its draft: length drift beyond ±10% and a
/// changed closing beat are reported as warnings.
pub fn validate_revision(original: &str, revised: &str, change_list: &ChangeList) -> RevisionReport {
    let original_words = word_count(original);
    let revised_words = word_count(revised);
    let word_count_change = revised_words as i64 - original_words as i64;
    let percent_change = if original_words == 0 {
        0.0
    } else {
        word_count_change as f64 / original_words as f64 * 100.0
    };

    let mut warnings = Vec::new();
    if percent_change.abs() > WORD_CHANGE_WARNING_PERCENT {
        warnings.push(format!(
            "Word count changed by {percent_change:.1}% ({original_words} → {revised_words} words)"
        ));
    }

    let endings_differ = endings_differ(
        &last_words(original, ENDING_WORDS),
        &last_words(revised, ENDING_WORDS),
    );
    if endings_differ {
        warnings.push(
            "The ending appears to have changed significantly. Ensure it still matches the raw ending beat."
                .to_string(),
        );
    }

    RevisionReport {
        original_words,
        revised_words,
        word_count_change,
        percent_change,
        must_changes_count: change_list.must.len(),
        nice_changes_count: change_list.nice.len(),
        endings_differ,
        warnings,
    }
}

fn endings_differ(first: &str, second: &str) -> bool {
    let first = last_sentence(first);
    let second = last_sentence(second);
    if first.trim().is_empty() || second.trim().is_empty() {
        return true;
    }
    word_jaccard(&without_punctuation(&first), &without_punctuation(&second))
        < ENDING_OVERLAP_THRESHOLD
}

fn without_punctuation(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect()
}

/// Applies an editor change list to a draft at a low temperature.
pub struct RevisionService<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    max_retries: usize,
    temperature: f32,
    prompt_log_dir: Option<PathBuf>,
}

impl<'a> RevisionService<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self {
            prompts,
            sink,
            max_retries: DEFAULT_MAX_RETRIES,
            temperature: REVISION_TEMPERATURE,
            prompt_log_dir: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
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

    pub fn revise<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &RevisionRequest<'_>,
    ) -> Result<RevisionOutput, DraftError> {
        let stage = WriterStage::Revision;
        let chat = PromptBuilder::new(self.prompts)
            .reviser(&RevisionPromptInput {
                voice: request.voice,
                current_draft: request.current_draft,
                change_list: request.change_list,
                raw_ending: request.raw_ending,
            })
            .map_err(|source| DraftError::Prompt { stage, source })?;
        let chat_request = chat
            .into_request()
            .with_temperature(self.temperature)
            .with_max_tokens(REVISION_MAX_TOKENS);

        if let Some(dir) = &self.prompt_log_dir {
            write_prompt_log(
                dir,
                request.chapter_id,
                &request.voice.persona,
                stage,
                &chat_request,
            )?;
        }

        self.log(
            LogLevel::Info,
            format!(
                "revising {} ({} must / {} nice)",
                request.chapter_id,
                request.change_list.must.len(),
                request.change_list.nice.len()
            ),
        );
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

        write_text(&request.output_path, &text)?;
        let report = validate_revision(request.current_draft, &text, request.change_list);
        for warning in &report.warnings {
            self.log(LogLevel::Warn, format!("{}: {warning}", request.chapter_id));
        }

        Ok(RevisionOutput {
            path: request.output_path.clone(),
            text,
            report,
        })
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}
