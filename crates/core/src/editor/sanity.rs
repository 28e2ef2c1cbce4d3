use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use super::{ChangeList, EditorError, EditorStage};
use crate::invoke::{Invoker, DEFAULT_MAX_RETRIES};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::LanguageModel;
use crate::prompts::PromptRegistry;

const SANITY_TEMPERATURE: f32 = 0.1;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum Verdict {
    Ok,
    IssuesFound,
    Unknown,
}

impl Verdict {
    pub fn parse(assessment: &str) -> Self {
        let head = assessment.trim_start().trim_start_matches('*');
        if head.starts_with("VERDICT: OK") {
            Self::Ok
        } else if head.starts_with("VERDICT: ISSUES FOUND") {
            Self::IssuesFound
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::IssuesFound => "ISSUES FOUND",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct SanityRequest<'a> {
    pub chapter_id: &'a str,
    pub previous_draft: &'a str,
    pub new_draft: &'a str,
    pub change_list: &'a ChangeList,
    pub raw_ending: Option<&'a str>,
    pub status_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct SanityOutcome {
    pub verdict: Verdict,
    pub assessment: String,
    pub status_path: Option<PathBuf>,
}

/// Asks a verifier whether a revision applied its change list without
/// inventing plot or breaking the ending beat.
pub struct SanityChecker<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    max_retries: usize,
}

impl<'a> SanityChecker<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self {
            prompts,
            sink,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn check<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &SanityRequest<'_>,
    ) -> Result<SanityOutcome, EditorError> {
        let stage = EditorStage::SanityCheck;
        if request.change_list.is_empty() {
            self.log(
                LogLevel::Warn,
                format!("{}: change list is empty", request.chapter_id),
            );
        }
        let raw_ending_section = request
            .raw_ending
            .map(str::trim)
            .filter(|ending| !ending.is_empty())
            .map(|ending| {
                format!(
                    "\nRAW ENDING CONSTRAINT:\nThe final sentence must conclude on the same narrative beat as this:\n```\n{ending}\n```\nDo not introduce foreshadowing or closure that the raw ending lacks.\n"
                )
            })
            .unwrap_or_default();

        let chat = self
            .prompts
            .chat_with(
                stage.prompt_key(),
                [
                    ("previous_draft", request.previous_draft.trim().to_string()),
                    ("new_draft", request.new_draft.trim().to_string()),
                    ("must_list", ChangeList::bullet_block(&request.change_list.must)),
                    ("nice_list", ChangeList::bullet_block(&request.change_list.nice)),
                    ("raw_ending_section", raw_ending_section),
                ],
            )
            .map_err(|source| EditorError::Prompt { stage, source })?;
        let chat_request = chat.into_request().with_temperature(SANITY_TEMPERATURE);

        self.log(
            LogLevel::Info,
            format!("checking revision of {}", request.chapter_id),
        );
        let assessment = Invoker::new(self.sink, self.max_retries)
            .call(model, stage.label(), &chat_request)
            .map_err(|source| EditorError::Model { stage, source })?;
        if assessment.is_empty() {
            return Err(EditorError::EmptyResponse { stage });
        }

        let verdict = Verdict::parse(&assessment);
        let level = match verdict {
            Verdict::Ok => LogLevel::Info,
            _ => LogLevel::Warn,
        };
        self.log(level, format!("{}: VERDICT {verdict}", request.chapter_id));

        if let Some(path) = &request.status_path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|source| EditorError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::write(path, format!("VERDICT: {verdict}\n\n{assessment}")).map_err(|source| {
                EditorError::WriteFile {
                    path: path.clone(),
                    source,
                }
            })?;
        }

        Ok(SanityOutcome {
            verdict,
            assessment,
            status_path: request.status_path.clone(),
        })
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::VecLogSink;
    use crate::model::{ChatRequest, LanguageModelError};
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct Fixed(String, Mutex<Option<ChatRequest>>);

    impl LanguageModel for Fixed {
        fn complete(&self, request: &ChatRequest) -> Result<String, LanguageModelError> {
            *self.1.lock().unwrap() = Some(request.clone());
            Ok(self.0.clone())
        }
    }

    #[test]
    fn verdicts_parse_from_first_line() {
        assert_eq!(Verdict::parse("VERDICT: OK\n1. ✓"), Verdict::Ok);
        assert_eq!(
            Verdict::parse("  **VERDICT: ISSUES FOUND**\n1. ✗"),
            Verdict::IssuesFound
        );
        assert_eq!(Verdict::parse("Looks fine to me."), Verdict::Unknown);
    }

    #[test]
    fn status_file_records_verdict_and_assessment() {
        let dir = tempdir().unwrap();
        let registry = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let list = ChangeList {
            must: vec!["Name the inn.".into()],
            nice: vec![],
        };
        let model = Fixed(
            "VERDICT: ISSUES FOUND\n1. MANDATORY EDITS: ✗".into(),
            Mutex::new(None),
        );
        let status = dir.path().join("round_2/sanity_ch_0001.txt");

        let outcome = SanityChecker::new(&registry, &sink)
            .check(
                &model,
                &SanityRequest {
                    chapter_id: "ch_0001",
                    previous_draft: "Old draft.",
                    new_draft: "New draft.",
                    change_list: &list,
                    raw_ending: Some("He left."),
                    status_path: Some(status.clone()),
                },
            )
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::IssuesFound);
        let written = fs::read_to_string(&status).unwrap();
        assert!(written.starts_with("VERDICT: ISSUES FOUND\n\nVERDICT: ISSUES FOUND"));
        assert!(sink.contains(LogLevel::Warn, "VERDICT ISSUES FOUND"));

        let request = model.1.lock().unwrap().clone().unwrap();
        assert_eq!(request.temperature, Some(0.1));
        assert!(request.user.contains("- Name the inn."));
        assert!(request.user.contains("NICE-TO-HAVE:\n(none)"));
        assert!(request.user.contains("RAW ENDING CONSTRAINT"));
    }
}
