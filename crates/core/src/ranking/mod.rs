//! Critic ranking of several rewrites of one chapter: a single scored pass,
//! head-to-head comparisons, and a smart mode combining both with Elo.

use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::invoke::{Invoker, DEFAULT_MAX_RETRIES};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::{ChatRequest, LanguageModel, LanguageModelError};
use crate::prompts::{PromptError, PromptRegistry};

mod elo;
mod smart;

pub use elo::{Elo, BASE_RATING, DEFAULT_K, PAIRWISE_K};
pub use smart::{consistency_label, SmartOptions};

pub const RANKING_PROMPT: &str = "ranking";
pub const RANKING_JSON_PROMPT: &str = "ranking_json_only";
pub const PAIRWISE_PROMPT: &str = "pairwise";
pub const DRAFT_PREFIX: &str = "DRAFT_";
const RANKING_TEMPERATURE: f32 = 0.1;
const PAIRWISE_TEMPERATURE: f32 = 0.1;

static FENCED_JSON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid json fence regex"));
static WINNER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[\s*#>_-]*WINNER\s*:\s*\**\s*(?:DRAFT[_ ])?([AB])\b").expect("valid winner regex")
});

pub struct Criterion {
    pub key: &'static str,
    pub name: &'static str,
    pub short_name: &'static str,
    pub description: &'static str,
}

pub const CRITERIA: [Criterion; 5] = [
    Criterion {
        key: "clarity",
        name: "Clarity & readability",
        short_name: "Clarity",
        description: "How readable and well-structured is the prose?",
    },
    Criterion {
        key: "tone",
        name: "Tone & atmosphere",
        short_name: "Tone",
        description: "How effectively does it create atmosphere and mood?",
    },
    Criterion {
        key: "plot_fidelity",
        name: "Fidelity to original plot points",
        short_name: "Plot Fidelity",
        description: "How accurately does it preserve original story elements?",
    },
    Criterion {
        key: "tone_fidelity",
        name: "Fidelity to original intended tone",
        short_name: "Tone Fidelity",
        description: "How well does it match the original's intended emotional impact?",
    },
    Criterion {
        key: "overall",
        name: "Overall literary quality",
        short_name: "Overall",
        description: "Holistic assessment of literary merit and effectiveness",
    },
];

pub fn criteria_rubric() -> String {
    CRITERIA
        .iter()
        .map(|c| format!("- {} (`{}`): {}", c.name, c.key, c.description))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RankingStage {
    Ranking,
    JsonFallback,
    Pairwise,
}

impl RankingStage {
    fn label(&self) -> &'static str {
        match self {
            Self::Ranking => "ranking",
            Self::JsonFallback => "ranking JSON fallback",
            Self::Pairwise => "pairwise comparison",
        }
    }
}

impl fmt::Display for RankingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
pub enum RankingError {
    #[error("ranking `{chapter_id}` needs at least {needed} versions, got {got}")]
    TooFewVersions {
        chapter_id: String,
        needed: usize,
        got: usize,
    },
    #[error("no parseable ranking table for `{0}`")]
    InvalidJson(String),
    #[error("failed to render {stage} prompt: {source}")]
    Prompt {
        stage: RankingStage,
        #[source]
        source: PromptError,
    },
    #[error("model call for {stage} failed: {source}")]
    Model {
        stage: RankingStage,
        #[source]
        source: LanguageModelError,
    },
    #[error("model returned nothing for {stage} of `{chapter_id}`")]
    EmptyResponse {
        stage: RankingStage,
        chapter_id: String,
    },
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
    #[error("ranking JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One rewrite under comparison, labelled by the persona that wrote it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DraftVersion {
    pub persona: String,
    pub text: String,
}

impl DraftVersion {
    pub fn new(persona: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            text: text.into(),
        }
    }

    pub fn draft_id(&self) -> String {
        format!("{DRAFT_PREFIX}{}", self.persona)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub clarity: f64,
    pub tone: f64,
    pub plot_fidelity: f64,
    pub tone_fidelity: f64,
    pub overall: f64,
}

impl Scores {
    pub fn total(&self) -> f64 {
        self.clarity + self.tone + self.plot_fidelity + self.tone_fidelity + self.overall
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        match key {
            "clarity" => Some(self.clarity),
            "tone" => Some(self.tone),
            "plot_fidelity" => Some(self.plot_fidelity),
            "tone_fidelity" => Some(self.tone_fidelity),
            "overall" => Some(self.overall),
            _ => None,
        }
    }

    fn set(&mut self, key: &str, value: f64) {
        match key {
            "clarity" => self.clarity = value,
            "tone" => self.tone = value,
            "plot_fidelity" => self.plot_fidelity = value,
            "tone_fidelity" => self.tone_fidelity = value,
            "overall" => self.overall = value,
            _ => {}
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub rank: u32,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[serde(flatten)]
    pub scores: Scores,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elo_rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_initial_rank: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<String>,
}

impl RankingEntry {
    pub fn label(&self) -> &str {
        self.persona
            .as_deref()
            .unwrap_or_else(|| self.id.strip_prefix(DRAFT_PREFIX).unwrap_or(&self.id))
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMethod {
    #[default]
    Simple,
    SmartRanking,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingResult {
    pub chapter_id: String,
    #[serde(default)]
    pub method: RankingMethod,
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default)]
    pub table: Vec<RankingEntry>,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub feedback: BTreeMap<String, String>,
    #[serde(default)]
    pub discussion: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_runs: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairs_tested: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contradictions: Option<usize>,
}

impl RankingResult {
    pub fn winner(&self) -> Option<&RankingEntry> {
        self.table.iter().min_by_key(|entry| entry.rank)
    }

    pub fn file_name(chapter_id: &str) -> String {
        format!("{chapter_id}_ranking.json")
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf, RankingError> {
        fs::create_dir_all(dir).map_err(|source| RankingError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(Self::file_name(&self.chapter_id));
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|source| RankingError::WriteFile {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, RankingError> {
        let text = fs::read_to_string(path).map_err(|source| RankingError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Side {
    First,
    Second,
}

/// Finds the JSON object in a critic answer: a fenced block first, then
/// the outermost braces.
pub fn extract_json_block(text: &str) -> Option<Value> {
    if let Some(caps) = FENCED_JSON_RE.captures(text) {
        if let Ok(value) = serde_json::from_str::<Value>(&caps[1]) {
            return Some(value);
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads `{table, analysis, feedback}`, mapping draft ids back to personas.
/// A table without usable rows yields `None`.
fn parse_ranking_table(
    value: &Value,
    versions: &[DraftVersion],
) -> Option<(Vec<RankingEntry>, String, BTreeMap<String, String>)> {
    let rows = value.get("table")?.as_array()?;
    let mut table = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        let Some(id) = row.get("id").and_then(Value::as_str) else {
            continue;
        };
        let id = id.trim().to_string();
        let persona = versions
            .iter()
            .find(|v| v.draft_id() == id || v.persona == id)
            .map(|v| v.persona.clone());

        let mut scores = Scores::default();
        for criterion in &CRITERIA {
            let score = row.get(criterion.key).and_then(number).or_else(|| {
                matches!(criterion.key, "plot_fidelity" | "tone_fidelity")
                    .then(|| row.get("faithfulness").and_then(number))
                    .flatten()
            });
            scores.set(criterion.key, score.unwrap_or(0.0));
        }

        let rank = row
            .get("rank")
            .and_then(number)
            .map(|r| r.round().max(1.0) as u32)
            .unwrap_or(idx as u32 + 1);
        table.push(RankingEntry {
            rank,
            id,
            persona,
            scores,
            elo_rating: None,
            avg_initial_rank: None,
            consistency: None,
        });
    }
    if table.is_empty() {
        return None;
    }
    table.sort_by_key(|entry| entry.rank);

    let analysis = value
        .get("analysis")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let feedback = value
        .get("feedback")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();
    Some((table, analysis, feedback))
}

pub fn draft_sections(versions: &[DraftVersion]) -> String {
    versions
        .iter()
        .map(|v| format!("<<<{}>>>\nText:\n{}\n<<<END>>>", v.draft_id(), v.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn original_section(original: Option<&str>) -> String {
    match original.map(str::trim).filter(|t| !t.is_empty()) {
        Some(text) => format!("RAW SOURCE (judge fidelity against this):\n{text}\n\n"),
        None => String::new(),
    }
}

/// Parses the closing `WINNER: A|B` line of a pairwise answer.
pub fn parse_winner(answer: &str) -> Option<Side> {
    WINNER_RE
        .captures_iter(answer)
        .last()
        .map(|caps| match caps[1].to_ascii_uppercase().as_str() {
            "A" => Side::First,
            _ => Side::Second,
        })
}

pub struct Ranker<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    max_retries: usize,
    log_dir: Option<PathBuf>,
}

impl<'a> Ranker<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self {
            prompts,
            sink,
            max_retries: DEFAULT_MAX_RETRIES,
            log_dir: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Directory receiving raw critic transcripts and smart-ranking summaries.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// One scored critic pass over all versions.
    pub fn rank<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        chapter_id: &str,
        versions: &[DraftVersion],
        original: Option<&str>,
    ) -> Result<RankingResult, RankingError> {
        self.rank_with_temperature(model, chapter_id, versions, original, RANKING_TEMPERATURE)
    }

    pub(crate) fn rank_with_temperature<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        chapter_id: &str,
        versions: &[DraftVersion],
        original: Option<&str>,
        temperature: f32,
    ) -> Result<RankingResult, RankingError> {
        if versions.is_empty() {
            return Err(RankingError::TooFewVersions {
                chapter_id: chapter_id.to_string(),
                needed: 1,
                got: 0,
            });
        }
        let max_tokens = (versions.len() as u32 * 800).clamp(2000, 4096);

        let stage = RankingStage::Ranking;
        let chat = self
            .prompts
            .chat_with(
                RANKING_PROMPT,
                [
                    ("chapter_id", chapter_id.to_string()),
                    ("draft_count", versions.len().to_string()),
                    ("criteria", criteria_rubric()),
                    ("original_section", original_section(original)),
                    ("drafts", draft_sections(versions)),
                ],
            )
            .map_err(|source| RankingError::Prompt { stage, source })?;
        let request = chat
            .into_request()
            .with_temperature(temperature)
            .with_max_tokens(max_tokens);
        let discussion = self.call(model, stage, chapter_id, &request)?;
        self.write_transcript(chapter_id, "critic_response", &discussion);

        let parsed = extract_json_block(&discussion)
            .and_then(|value| parse_ranking_table(&value, versions));
        let (table, analysis, feedback) = match parsed {
            Some(parsed) => parsed,
            None => {
                self.log(
                    LogLevel::Warn,
                    format!("{chapter_id}: no ranking JSON in discussion, requesting JSON only"),
                );
                self.json_fallback(model, chapter_id, versions, &discussion, max_tokens)?
            }
        };

        for entry in table.iter().filter(|e| e.persona.is_none()) {
            self.log(
                LogLevel::Warn,
                format!("{chapter_id}: ranking row `{}` matches no version", entry.id),
            );
        }

        Ok(RankingResult {
            chapter_id: chapter_id.to_string(),
            method: RankingMethod::Simple,
            versions: versions.iter().map(|v| v.persona.clone()).collect(),
            table,
            analysis,
            feedback,
            discussion,
            timestamp: Local::now().format("%Y%m%d_%H%M%S").to_string(),
            ..RankingResult::default()
        })
    }

    fn json_fallback<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        chapter_id: &str,
        versions: &[DraftVersion],
        discussion: &str,
        max_tokens: u32,
    ) -> Result<(Vec<RankingEntry>, String, BTreeMap<String, String>), RankingError> {
        let stage = RankingStage::JsonFallback;
        let chat = self
            .prompts
            .chat_with(
                RANKING_JSON_PROMPT,
                [("previous_response", discussion.to_string())],
            )
            .map_err(|source| RankingError::Prompt { stage, source })?;
        let request = chat
            .into_request()
            .with_temperature(0.0)
            .with_max_tokens(max_tokens);
        let answer = self.call(model, stage, chapter_id, &request)?;
        self.write_transcript(chapter_id, "critic_json", &answer);

        extract_json_block(&answer)
            .and_then(|value| parse_ranking_table(&value, versions))
            .ok_or_else(|| RankingError::InvalidJson(chapter_id.to_string()))
    }

    /// Head-to-head judgement; `None` when the answer names no winner.
    pub fn compare<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        chapter_id: &str,
        first: &DraftVersion,
        second: &DraftVersion,
        original: Option<&str>,
    ) -> Result<Option<Side>, RankingError> {
        let stage = RankingStage::Pairwise;
        let chat = self
            .prompts
            .chat_with(
                PAIRWISE_PROMPT,
                [
                    ("chapter_id", chapter_id.to_string()),
                    ("original_section", original_section(original)),
                    ("first_text", first.text.trim().to_string()),
                    ("second_text", second.text.trim().to_string()),
                ],
            )
            .map_err(|source| RankingError::Prompt { stage, source })?;
        let request = chat.into_request().with_temperature(PAIRWISE_TEMPERATURE);
        let answer = self.call(model, stage, chapter_id, &request)?;
        let side = parse_winner(&answer);
        if side.is_none() {
            self.log(
                LogLevel::Warn,
                format!(
                    "{chapter_id}: no WINNER line for {} vs {}",
                    first.persona, second.persona
                ),
            );
        }
        Ok(side)
    }

    fn call<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        stage: RankingStage,
        chapter_id: &str,
        request: &ChatRequest,
    ) -> Result<String, RankingError> {
        let label = format!("{stage} {chapter_id}");
        let answer = Invoker::new(self.sink, self.max_retries)
            .call(model, &label, request)
            .map_err(|source| RankingError::Model { stage, source })?;
        if answer.is_empty() {
            return Err(RankingError::EmptyResponse {
                stage,
                chapter_id: chapter_id.to_string(),
            });
        }
        Ok(answer)
    }

    fn write_transcript(&self, chapter_id: &str, kind: &str, text: &str) {
        let Some(dir) = &self.log_dir else {
            return;
        };
        let path = dir.join(format!(
            "{kind}_{chapter_id}_{}.txt",
            Local::now().format("%Y%m%d_%H%M%S_%3f")
        ));
        let written = fs::create_dir_all(dir).and_then(|_| fs::write(&path, text));
        if let Err(err) = written {
            self.log(
                LogLevel::Warn,
                format!("could not write {}: {err}", path.display()),
            );
        }
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::VecLogSink;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct Replies(Mutex<VecDeque<String>>);

    impl Replies {
        fn new(items: &[&str]) -> Self {
            Self(Mutex::new(items.iter().map(|s| s.to_string()).collect()))
        }
    }

    impl LanguageModel for Replies {
        fn complete(&self, _request: &ChatRequest) -> Result<String, LanguageModelError> {
            Ok(self.0.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    fn versions() -> Vec<DraftVersion> {
        vec![
            DraftVersion::new("noir", "Rain on the glass."),
            DraftVersion::new("gothic", "The candles guttered."),
        ]
    }

    const RANKED: &str = "Critic A: noir is tighter.\nCritic B: agreed.\n```json\n{\"table\": [{\"rank\": 2, \"id\": \"DRAFT_gothic\", \"clarity\": 6, \"tone\": 8, \"plot_fidelity\": 7, \"tone_fidelity\": 7, \"overall\": 7}, {\"rank\": 1, \"id\": \"DRAFT_noir\", \"clarity\": \"9\", \"tone\": 8, \"faithfulness\": 9, \"overall\": 9}], \"analysis\": \"noir wins\", \"feedback\": {\"DRAFT_gothic\": \"tighten\"}}\n```";

    #[test]
    fn fenced_json_is_parsed_and_mapped() {
        let registry = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let model = Replies::new(&[RANKED]);
        let result = Ranker::new(&registry, &sink)
            .rank(&model, "ch_0001", &versions(), Some("Raw text."))
            .unwrap();

        assert_eq!(result.versions, vec!["noir", "gothic"]);
        let winner = result.winner().unwrap();
        assert_eq!(winner.persona.as_deref(), Some("noir"));
        assert_eq!(winner.scores.clarity, 9.0);
        assert_eq!(winner.scores.plot_fidelity, 9.0);
        assert_eq!(winner.scores.tone_fidelity, 9.0);
        assert_eq!(winner.scores.total(), 44.0);
        assert_eq!(result.table[1].label(), "gothic");
        assert_eq!(result.analysis, "noir wins");
        assert_eq!(result.feedback["DRAFT_gothic"], "tighten");
    }

    #[test]
    fn missing_json_triggers_json_only_request() {
        let registry = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let model = Replies::new(&[
            "We could not settle on numbers.",
            r#"{"table": [{"rank": 1, "id": "DRAFT_gothic", "clarity": 7, "tone": 9, "plot_fidelity": 8, "tone_fidelity": 8, "overall": 8}], "analysis": "", "feedback": {}}"#,
        ]);
        let result = Ranker::new(&registry, &sink)
            .rank(&model, "ch_0001", &versions(), None)
            .unwrap();
        assert_eq!(result.table[0].persona.as_deref(), Some("gothic"));
        assert!(sink.contains(LogLevel::Warn, "requesting JSON only"));
    }

    #[test]
    fn unparseable_fallback_is_an_error() {
        let registry = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let model = Replies::new(&["no json", "still no json"]);
        let err = Ranker::new(&registry, &sink)
            .rank(&model, "ch_0009", &versions(), None)
            .unwrap_err();
        assert!(matches!(err, RankingError::InvalidJson(id) if id == "ch_0009"));
    }

    #[test]
    fn winner_line_is_read_from_the_end() {
        assert_eq!(parse_winner("A is vivid.\nWINNER: B"), Some(Side::Second));
        assert_eq!(parse_winner("**WINNER: A**"), Some(Side::First));
        assert_eq!(parse_winner("Winner: draft_a"), Some(Side::First));
        assert_eq!(parse_winner("Both are fine."), None);
    }

    #[test]
    fn results_round_trip_through_disk() {
        let dir = tempdir().unwrap();
        let registry = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let model = Replies::new(&[RANKED]);
        let result = Ranker::new(&registry, &sink)
            .with_log_dir(dir.path().join("logs"))
            .rank(&model, "ch_0001", &versions(), None)
            .unwrap();
        let path = result.save(dir.path()).unwrap();
        assert!(path.ends_with("ch_0001_ranking.json"));
        assert_eq!(RankingResult::load(&path).unwrap(), result);
        assert_eq!(fs::read_dir(dir.path().join("logs")).unwrap().count(), 1);
    }
}
