//! YAML-declared audition matrix. Each experiment pairs a voice spec with
//! writer and editor prompt files and runs the draft → sanity → editor loop
//! over its chapters, round by round.

use chrono::Local;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

use crate::config::WriterConfig;
use crate::editor::{
    ChangeList, ChapterRewrite, EditorError, EditorPanel, EditorReport, EditorRequest,
    SanityChecker, SanityRequest,
};
use crate::invoke::DEFAULT_MAX_RETRIES;
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::{LanguageModel, LanguageModelError};
use crate::prompts::{PromptError, PromptRegistry};
use crate::text::{last_words, DEFAULT_ENDING_WORDS};
use crate::voice::{VoiceSpec, VoiceSpecError};
use crate::writer::{DraftError, DraftMode, DraftRequest, DraftService, SourceLoader};

pub const RESULTS_FILE: &str = "experiment_results.json";
pub const FINAL_DIR: &str = "final";
pub const FEEDBACK_FILE: &str = "critic_feedback.json";

static UNSAFE_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*@]"#).expect("valid name regex"));

fn default_rounds() -> u32 {
    1
}

fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("failed to read experiment plan `{path}`: {source}")]
    ReadPlan {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("experiment plan `{path}` is not valid YAML: {source}")]
    ParsePlan {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid experiment filter: {0}")]
    Filter(#[from] regex::Error),
    #[error("experiment `{name}` references missing {label} `{path}`")]
    MissingFile {
        name: String,
        label: &'static str,
        path: PathBuf,
    },
    #[error("experiment `{0}` lists no chapters")]
    NoChapters(String),
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
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Voice(#[from] VoiceSpecError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Draft(#[from] DraftError),
    #[error(transparent)]
    Editor(#[from] EditorError),
    #[error("no model available for `{model}`: {source}")]
    Model {
        model: String,
        #[source]
        source: LanguageModelError,
    },
}

/// One audition as declared in the plan file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub name: String,
    pub voice_spec: PathBuf,
    /// Prompt file (TOML/YAML) layered over the built-in writer templates.
    pub writer_spec: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor_spec: Option<PathBuf>,
    pub chapters: Vec<String>,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Experiment {
    /// Name made safe for use as a directory.
    pub fn dir_name(&self) -> String {
        sanitize_name(&self.name)
    }

    fn matches(&self, filter: &Regex) -> bool {
        let mut fields = vec![
            self.name.clone(),
            self.voice_spec.display().to_string(),
            self.writer_spec.display().to_string(),
        ];
        if let Some(editor) = &self.editor_spec {
            fields.push(editor.display().to_string());
        }
        fields.iter().any(|field| filter.is_match(field))
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} chapter(s), {} round(s), model {}, temperature {:.1}",
            self.name,
            self.chapters.len(),
            self.rounds.max(1),
            self.model.as_deref().unwrap_or("(profile default)"),
            self.temperature
        )
    }
}

pub fn sanitize_name(name: &str) -> String {
    UNSAFE_NAME_CHARS.replace_all(name, "_").into_owned()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentPlan {
    #[serde(default)]
    pub experiments: Vec<Experiment>,
}

impl ExperimentPlan {
    pub fn load(path: &Path) -> Result<Self, ExperimentError> {
        let text = fs::read_to_string(path).map_err(|source| ExperimentError::ReadPlan {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ExperimentError::ParsePlan {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Experiments whose name or spec paths match `pattern`, case-insensitively.
    pub fn select(&self, pattern: Option<&str>) -> Result<Vec<Experiment>, ExperimentError> {
        let Some(pattern) = pattern.map(str::trim).filter(|p| !p.is_empty()) else {
            return Ok(self.experiments.clone());
        };
        let filter = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(self
            .experiments
            .iter()
            .filter(|experiment| experiment.matches(&filter))
            .cloned()
            .collect())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Completed,
    Failed,
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub name: String,
    pub model: String,
    pub chapters: Vec<String>,
    pub rounds: u32,
    pub status: ExperimentStatus,
    pub started_at: String,
    pub duration_secs: f64,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExperimentResult {
    pub fn load_all(path: &Path) -> Result<Vec<Self>, ExperimentError> {
        let text = fs::read_to_string(path).map_err(|source| ExperimentError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Hands out a model per experiment, honouring its optional override.
pub trait ModelProvider {
    fn default_model(&self) -> String;

    fn model(&self, name: Option<&str>) -> Result<Box<dyn LanguageModel>, LanguageModelError>;
}

pub struct ExperimentRunner<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    sources: SourceLoader,
    auditions_dir: PathBuf,
    settings: WriterConfig,
    max_retries: usize,
    prompt_log_dir: Option<PathBuf>,
}

impl<'a> ExperimentRunner<'a> {
    pub fn new(
        prompts: &'a PromptRegistry,
        sink: &'a dyn LogSink,
        sources: SourceLoader,
        auditions_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            prompts,
            sink,
            sources,
            auditions_dir: auditions_dir.into(),
            settings: WriterConfig::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            prompt_log_dir: None,
        }
    }

    pub fn with_settings(mut self, settings: WriterConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_prompt_log(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompt_log_dir = Some(dir.into());
        self
    }

    pub fn results_path(&self) -> PathBuf {
        self.auditions_dir.join(RESULTS_FILE)
    }

    /// Runs every experiment in order. A failing experiment is recorded and
    /// the rest still run; the collected results land in `experiment_results.json`.
    pub fn run_all<P: ModelProvider + ?Sized>(
        &self,
        provider: &P,
        experiments: &[Experiment],
    ) -> Result<Vec<ExperimentResult>, ExperimentError> {
        let mut results = Vec::with_capacity(experiments.len());
        for (index, experiment) in experiments.iter().enumerate() {
            self.log(
                LogLevel::Info,
                format!(
                    "experiment {}/{}: {}",
                    index + 1,
                    experiments.len(),
                    experiment.name
                ),
            );
            results.push(self.run(provider, experiment));
        }

        fs::create_dir_all(&self.auditions_dir).map_err(|source| ExperimentError::CreateDir {
            path: self.auditions_dir.clone(),
            source,
        })?;
        let path = self.results_path();
        fs::write(&path, serde_json::to_string_pretty(&results)?).map_err(|source| {
            ExperimentError::WriteFile {
                path: path.clone(),
                source,
            }
        })?;

        let completed = results
            .iter()
            .filter(|r| r.status == ExperimentStatus::Completed)
            .count();
        self.log(
            LogLevel::Info,
            format!(
                "{completed}/{} experiments completed; results → {}",
                results.len(),
                path.display()
            ),
        );
        Ok(results)
    }

    pub fn run<P: ModelProvider + ?Sized>(
        &self,
        provider: &P,
        experiment: &Experiment,
    ) -> ExperimentResult {
        let started_at = Local::now().format("%H:%M:%S").to_string();
        let clock = Instant::now();
        let model_name = experiment
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model());

        let outcome = self.execute(provider, experiment);
        let duration_secs = clock.elapsed().as_secs_f64();
        let (status, output_path, error) = match outcome {
            Ok(final_dir) => {
                self.log(
                    LogLevel::Info,
                    format!("{} completed in {duration_secs:.1}s", experiment.name),
                );
                (ExperimentStatus::Completed, Some(final_dir), None)
            }
            Err(err) => {
                self.log(
                    LogLevel::Error,
                    format!("experiment {} failed: {err}", experiment.name),
                );
                (ExperimentStatus::Failed, None, Some(err.to_string()))
            }
        };

        ExperimentResult {
            name: experiment.name.clone(),
            model: model_name,
            chapters: experiment.chapters.clone(),
            rounds: experiment.rounds.max(1),
            status,
            started_at,
            duration_secs,
            output_path,
            error,
        }
    }

    fn execute<P: ModelProvider + ?Sized>(
        &self,
        provider: &P,
        experiment: &Experiment,
    ) -> Result<PathBuf, ExperimentError> {
        self.validate(experiment)?;
        let voice = VoiceSpec::load(&experiment.voice_spec)?;

        let mut prompts = self.prompts.clone();
        prompts.overlay_file(&experiment.writer_spec)?;
        if let Some(editor_spec) = &experiment.editor_spec {
            prompts.overlay_file(editor_spec)?;
        }

        let model = provider
            .model(experiment.model.as_deref())
            .map_err(|source| ExperimentError::Model {
                model: experiment
                    .model
                    .clone()
                    .unwrap_or_else(|| provider.default_model()),
                source,
            })?;

        let audition_dir = self.prepare_dirs(experiment)?;
        let final_dir = audition_dir.join(FINAL_DIR);
        let session = Session {
            runner: self,
            prompts: &prompts,
            model: model.as_ref(),
            voice: &voice,
            experiment,
            audition_dir: &audition_dir,
        };

        let feedback_rounds = experiment.rounds.max(1) - 1;
        if feedback_rounds == 0 {
            session.single_pass(&final_dir)?;
        } else {
            session.iterate(feedback_rounds, &final_dir)?;
        }
        Ok(final_dir)
    }

    fn validate(&self, experiment: &Experiment) -> Result<(), ExperimentError> {
        let mut required = vec![
            ("voice spec", &experiment.voice_spec),
            ("writer spec", &experiment.writer_spec),
        ];
        if let Some(editor) = &experiment.editor_spec {
            required.push(("editor spec", editor));
        }
        for (label, path) in required {
            if !path.is_file() {
                return Err(ExperimentError::MissingFile {
                    name: experiment.name.clone(),
                    label,
                    path: path.clone(),
                });
            }
        }
        if experiment.chapters.is_empty() {
            return Err(ExperimentError::NoChapters(experiment.name.clone()));
        }
        Ok(())
    }

    fn prepare_dirs(&self, experiment: &Experiment) -> Result<PathBuf, ExperimentError> {
        let dir_name = experiment.dir_name();
        if dir_name != experiment.name {
            self.log(
                LogLevel::Warn,
                format!(
                    "sanitized experiment name `{}` to `{dir_name}`",
                    experiment.name
                ),
            );
        }
        let audition_dir = self.auditions_dir.join(&dir_name);

        let mut dirs: Vec<PathBuf> = (1..experiment.rounds.max(1))
            .map(|round| audition_dir.join(round_dir_name(round)))
            .collect();
        dirs.push(audition_dir.join(FINAL_DIR));
        for dir in &dirs {
            create_dir(dir)?;
        }

        let config_path = audition_dir.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(experiment)?).map_err(|source| {
            ExperimentError::WriteFile {
                path: config_path.clone(),
                source,
            }
        })?;
        self.log(
            LogLevel::Debug,
            format!("audition directory {}", audition_dir.display()),
        );
        Ok(audition_dir)
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}

pub fn round_dir_name(round: u32) -> String {
    format!("round_{round}")
}

/// Everything one experiment run needs, bundled so the round helpers stay small.
struct Session<'r, 'a> {
    runner: &'r ExperimentRunner<'a>,
    prompts: &'r PromptRegistry,
    model: &'r dyn LanguageModel,
    voice: &'r VoiceSpec,
    experiment: &'r Experiment,
    audition_dir: &'r Path,
}

impl Session<'_, '_> {
    fn single_pass(&self, final_dir: &Path) -> Result<(), ExperimentError> {
        self.copy_voice_spec(final_dir)?;
        for chapter in &self.experiment.chapters {
            let source = self.runner.sources.load(chapter)?;
            self.draft(chapter, &source.text, final_dir, None, None)?;
        }
        Ok(())
    }

    fn iterate(&self, feedback_rounds: u32, final_dir: &Path) -> Result<(), ExperimentError> {
        let mut previous: Option<(PathBuf, EditorReport, PathBuf)> = None;

        for round in 1..=feedback_rounds {
            self.runner.log(
                LogLevel::Info,
                format!("{}: round {round}", self.experiment.name),
            );
            let round_dir = self.audition_dir.join(round_dir_name(round));
            self.copy_voice_spec(&round_dir)?;

            let feedback = previous.as_ref().map(|(_, report, _)| &report.change_list);
            let mut rewrites = Vec::with_capacity(self.experiment.chapters.len());
            for chapter in &self.experiment.chapters {
                let source = self.runner.sources.load(chapter)?;
                let previous_draft = match &previous {
                    Some((dir, _, _)) => read_optional(&dir.join(format!("{chapter}.txt")))?,
                    None => None,
                };
                let text = self.draft(
                    chapter,
                    &source.text,
                    &round_dir,
                    previous_draft.as_deref(),
                    feedback,
                )?;
                if let (Some(previous_draft), Some(change_list)) = (&previous_draft, feedback) {
                    self.sanity(chapter, previous_draft, &text, change_list, &source.text, &round_dir)?;
                }
                rewrites.push(ChapterRewrite {
                    chapter_id: chapter.clone(),
                    raw_source: Some(source.text),
                    rewrite: text,
                });
            }

            let output = EditorPanel::new(self.prompts, self.runner.sink)
                .with_max_retries(self.runner.max_retries)
                .with_context_limit(self.runner.settings.context_limit_tokens)
                .review(
                    self.model,
                    &EditorRequest {
                        voice: self.voice,
                        chapters: &rewrites,
                        round,
                        output_dir: round_dir.clone(),
                    },
                )?;
            previous = Some((round_dir, output.report, output.path));
        }

        self.copy_voice_spec(final_dir)?;
        let Some((last_dir, last_report, last_report_path)) = previous else {
            return Ok(());
        };
        let feedback_path = final_dir.join(FEEDBACK_FILE);
        fs::copy(&last_report_path, &feedback_path).map_err(|source| {
            ExperimentError::WriteFile {
                path: feedback_path.clone(),
                source,
            }
        })?;

        let change_list = &last_report.change_list;
        for chapter in &self.experiment.chapters {
            let source = self.runner.sources.load(chapter)?;
            let previous_draft = read_optional(&last_dir.join(format!("{chapter}.txt")))?;
            let text = self.draft(
                chapter,
                &source.text,
                final_dir,
                previous_draft.as_deref(),
                Some(change_list),
            )?;
            if let Some(previous_draft) = &previous_draft {
                self.sanity(chapter, previous_draft, &text, change_list, &source.text, final_dir)?;
            }
        }
        Ok(())
    }

    fn draft(
        &self,
        chapter: &str,
        source: &str,
        output_dir: &Path,
        previous_final: Option<&str>,
        feedback: Option<&ChangeList>,
    ) -> Result<String, ExperimentError> {
        let mode = if previous_final.is_none() && feedback.is_none() {
            DraftMode::Segmented
        } else {
            DraftMode::Full
        };
        let mut writer = DraftService::new(self.prompts, self.runner.sink)
            .with_max_retries(self.runner.max_retries)
            .with_settings(self.runner.settings.clone())
            .with_temperature(self.experiment.temperature);
        if let Some(dir) = &self.runner.prompt_log_dir {
            writer = writer.with_prompt_log(dir);
        }
        let output = writer.generate(
            self.model,
            &DraftRequest {
                chapter_id: chapter,
                source,
                voice: self.voice,
                output_dir: output_dir.to_path_buf(),
                mode,
                previous_final,
                feedback,
            },
        )?;
        Ok(output.text)
    }

    fn sanity(
        &self,
        chapter: &str,
        previous_draft: &str,
        new_draft: &str,
        change_list: &ChangeList,
        source: &str,
        dir: &Path,
    ) -> Result<(), ExperimentError> {
        let raw_ending = last_words(source, DEFAULT_ENDING_WORDS);
        SanityChecker::new(self.prompts, self.runner.sink)
            .with_max_retries(self.runner.max_retries)
            .check(
                self.model,
                &SanityRequest {
                    chapter_id: chapter,
                    previous_draft,
                    new_draft,
                    change_list,
                    raw_ending: Some(&raw_ending),
                    status_path: Some(dir.join(format!("sanity_{chapter}.txt"))),
                },
            )?;
        Ok(())
    }

    fn copy_voice_spec(&self, dir: &Path) -> Result<(), ExperimentError> {
        let target = dir.join("voice_spec.md");
        fs::copy(&self.experiment.voice_spec, &target).map_err(|source| {
            ExperimentError::WriteFile {
                path: target.clone(),
                source,
            }
        })?;
        Ok(())
    }
}

fn create_dir(path: &Path) -> Result<(), ExperimentError> {
    fs::create_dir_all(path).map_err(|source| ExperimentError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

fn read_optional(path: &Path) -> Result<Option<String>, ExperimentError> {
    if !path.is_file() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .map_err(|source| ExperimentError::ReadFile {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::VecLogSink;
    use crate::model::ChatRequest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    const CANNED: &str = "VERDICT: OK\n## MUST\n- Tighten the opening line.\n## NICE\n- Vary sentence rhythm.";

    struct Canned(Arc<AtomicUsize>);

    impl LanguageModel for Canned {
        fn complete(&self, _request: &ChatRequest) -> Result<String, LanguageModelError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(CANNED.to_string())
        }
    }

    struct Provider {
        calls: Arc<AtomicUsize>,
        refuse: Option<&'static str>,
    }

    impl ModelProvider for Provider {
        fn default_model(&self) -> String {
            "stub-writer".to_string()
        }

        fn model(&self, name: Option<&str>) -> Result<Box<dyn LanguageModel>, LanguageModelError> {
            if name.is_some() && name == self.refuse {
                return Err(LanguageModelError::msg("unknown model"));
            }
            Ok(Box::new(Canned(self.calls.clone())))
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let raw = dir.path().join("raw");
            fs::create_dir_all(&raw).unwrap();
            fs::write(
                raw.join("ch_0001.txt"),
                "The rain fell on the inn. He waited by the door. Nobody came.",
            )
            .unwrap();
            fs::write(dir.path().join("noir.md"), "Short sentences. Wet streets.").unwrap();
            fs::write(
                dir.path().join("writer.toml"),
                "[prompts.sample]\ntemplate = \"unused\"\n",
            )
            .unwrap();
            Self { dir }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn experiment(&self, name: &str, rounds: u32) -> Experiment {
            Experiment {
                name: name.to_string(),
                voice_spec: self.path("noir.md"),
                writer_spec: self.path("writer.toml"),
                editor_spec: None,
                chapters: vec!["ch_0001".to_string()],
                rounds,
                model: None,
                temperature: 0.7,
            }
        }

        fn runner<'a>(&self, prompts: &'a PromptRegistry, sink: &'a VecLogSink) -> ExperimentRunner<'a> {
            ExperimentRunner::new(
                prompts,
                sink,
                SourceLoader::new(self.path("raw"), self.path("segments")),
                self.path("auditions"),
            )
        }
    }

    #[test]
    fn plan_parses_defaults_and_filters() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.yaml");
        fs::write(
            &path,
            "experiments:\n  - name: noir-opus\n    voice_spec: voices/noir.md\n    writer_spec: prompts/writer.toml\n    chapters: [ch_0001]\n  - name: pastoral\n    voice_spec: voices/pastoral.md\n    writer_spec: prompts/writer.toml\n    editor_spec: prompts/NOIR_editor.toml\n    chapters: [ch_0001, ch_0002]\n    rounds: 3\n    model: gpt-4o\n    temperature: 0.4\n",
        )
        .unwrap();

        let plan = ExperimentPlan::load(&path).unwrap();
        assert_eq!(plan.experiments.len(), 2);
        assert_eq!(plan.experiments[0].rounds, 1);
        assert!((plan.experiments[0].temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(plan.experiments[1].model.as_deref(), Some("gpt-4o"));

        let names: Vec<_> = plan
            .select(Some("noir"))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["noir-opus", "pastoral"]);
        assert_eq!(plan.select(Some("PASTORAL")).unwrap().len(), 1);
        assert_eq!(plan.select(None).unwrap().len(), 2);
        assert!(matches!(
            plan.select(Some("(")),
            Err(ExperimentError::Filter(_))
        ));
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_name("claude@opus:v1/b?"), "claude_opus_v1_b_");
        assert_eq!(sanitize_name("plain-name"), "plain-name");
    }

    #[test]
    fn single_round_writes_final_draft() {
        let fixture = Fixture::new();
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Provider {
            calls: calls.clone(),
            refuse: None,
        };

        let results = fixture
            .runner(&prompts, &sink)
            .run_all(&provider, &[fixture.experiment("noir@v1", 1)])
            .unwrap();

        assert_eq!(results[0].status, ExperimentStatus::Completed);
        assert_eq!(results[0].model, "stub-writer");
        let final_dir = fixture.path("auditions/noir_v1/final");
        assert_eq!(results[0].output_path.as_deref(), Some(final_dir.as_path()));
        assert!(final_dir.join("ch_0001.txt").is_file());
        assert!(final_dir.join("voice_spec.md").is_file());
        assert!(fixture.path("auditions/noir_v1/config.json").is_file());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sink.contains(LogLevel::Warn, "sanitized experiment name"));

        let saved = ExperimentResult::load_all(&fixture.path("auditions/experiment_results.json"))
            .unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].name, "noir@v1");
        assert_eq!(saved[0].status, ExperimentStatus::Completed);
    }

    #[test]
    fn multi_round_runs_editor_and_sanity() {
        let fixture = Fixture::new();
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Provider {
            calls: calls.clone(),
            refuse: None,
        };

        let result = fixture
            .runner(&prompts, &sink)
            .run(&provider, &fixture.experiment("noir", 3));

        assert_eq!(result.status, ExperimentStatus::Completed, "{:?}", result.error);
        let root = fixture.path("auditions/noir");
        assert!(root.join("round_1/editor_round1.json").is_file());
        assert!(root.join("round_2/editor_round2.json").is_file());
        assert!(!root.join("round_1/sanity_ch_0001.txt").exists());
        assert!(root.join("round_2/sanity_ch_0001.txt").is_file());
        assert!(root.join("final/sanity_ch_0001.txt").is_file());

        let feedback = ChangeList::load(&root.join("final/critic_feedback.json")).unwrap();
        assert_eq!(feedback.must, vec!["Tighten the opening line."]);
        // round 1: draft + 3 critics; round 2 adds a sanity check; final: draft + sanity
        assert_eq!(calls.load(Ordering::SeqCst), 4 + 5 + 2);
    }

    #[test]
    fn failures_do_not_stop_the_batch() {
        let fixture = Fixture::new();
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let provider = Provider {
            calls: Arc::new(AtomicUsize::new(0)),
            refuse: Some("missing-model"),
        };

        let mut broken = fixture.experiment("broken", 1);
        broken.model = Some("missing-model".to_string());
        let mut absent = fixture.experiment("absent", 1);
        absent.voice_spec = fixture.path("nope.md");
        let good = fixture.experiment("good", 1);

        let results = fixture
            .runner(&prompts, &sink)
            .run_all(&provider, &[broken, absent, good])
            .unwrap();

        let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                ExperimentStatus::Failed,
                ExperimentStatus::Failed,
                ExperimentStatus::Completed
            ]
        );
        assert_eq!(results[0].model, "missing-model");
        assert!(results[1].error.as_deref().unwrap().contains("voice spec"));
        assert!(results[0].output_path.is_none());
    }
}
