use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    8000
}

fn default_timeout() -> u64 {
    600
}

fn default_chunk_words() -> usize {
    250
}

fn default_target_ratio() -> f32 {
    1.0
}

fn default_context_limit_tokens() -> usize {
    28_000
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    /// Environment variable consulted when `api_key` is empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub interface_format: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_key_env: String::new(),
            base_url: String::new(),
            interface_format: String::new(),
            model_name: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout: default_timeout(),
        }
    }
}

impl LlmConfig {
    pub fn is_meaningful(&self) -> bool {
        !(self.api_key.is_empty()
            && self.base_url.is_empty()
            && self.interface_format.is_empty()
            && self.model_name.is_empty())
    }

    pub fn resolved_api_key(&self) -> String {
        if !self.api_key.trim().is_empty() {
            return self.api_key.clone();
        }
        let name = self.api_key_env.trim();
        if name.is_empty() {
            return String::new();
        }
        env::var(name).unwrap_or_default()
    }

    /// Copy of this profile pointed at another model, as experiments request.
    pub fn with_model_override(&self, model: Option<&str>, temperature: Option<f32>) -> Self {
        let mut profile = self.clone();
        if let Some(model) = model.map(str::trim).filter(|m| !m.is_empty()) {
            profile.model_name = model.to_string();
        }
        if let Some(temperature) = temperature {
            profile.temperature = temperature;
        }
        profile
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptConfig {
    #[serde(default)]
    pub custom_directories: Vec<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    #[serde(default = "PathsConfig::default_raw_dir")]
    pub raw_dir: PathBuf,
    #[serde(default = "PathsConfig::default_segments_dir")]
    pub segments_dir: PathBuf,
    #[serde(default = "PathsConfig::default_auditions_dir")]
    pub auditions_dir: PathBuf,
    #[serde(default = "PathsConfig::default_logs_dir")]
    pub logs_dir: PathBuf,
    #[serde(default = "PathsConfig::default_reports_dir")]
    pub reports_dir: PathBuf,
}

impl PathsConfig {
    fn default_raw_dir() -> PathBuf {
        PathBuf::from("data/raw")
    }

    fn default_segments_dir() -> PathBuf {
        PathBuf::from("data/segments")
    }

    fn default_auditions_dir() -> PathBuf {
        PathBuf::from("outputs/auditions")
    }

    fn default_logs_dir() -> PathBuf {
        PathBuf::from("logs")
    }

    fn default_reports_dir() -> PathBuf {
        PathBuf::from("outputs/reports")
    }

    pub fn prompt_log_dir(&self) -> PathBuf {
        self.logs_dir.join("prompts")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: Self::default_raw_dir(),
            segments_dir: Self::default_segments_dir(),
            auditions_dir: Self::default_auditions_dir(),
            logs_dir: Self::default_logs_dir(),
            reports_dir: Self::default_reports_dir(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WriterConfig {
    #[serde(default = "default_chunk_words")]
    pub chunk_words: usize,
    #[serde(default = "default_target_ratio")]
    pub target_ratio: f32,
    #[serde(default)]
    pub sample_words: Option<usize>,
    #[serde(default = "default_context_limit_tokens")]
    pub context_limit_tokens: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            chunk_words: default_chunk_words(),
            target_ratio: default_target_ratio(),
            sample_words: None,
            context_limit_tokens: default_context_limit_tokens(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RecentUsage {
    #[serde(default)]
    pub last_llm_interface: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub llm_profiles: BTreeMap<String, LlmConfig>,
    #[serde(default)]
    pub recent: RecentUsage,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub writer: WriterConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_llm_profile(&self, name: &str) -> Option<&LlmConfig> {
        self.llm_profiles.get(name)
    }

    pub fn upsert_llm_profile<S: Into<String>>(&mut self, name: S, profile: LlmConfig) {
        self.llm_profiles.insert(name.into(), profile);
    }

    pub fn remove_llm_profile(&mut self, name: &str) -> Option<LlmConfig> {
        self.llm_profiles.remove(name)
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }

        let value: Value = serde_json::from_str(input)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        const SECTIONS: [&str; 5] = ["llm_profiles", "recent", "prompts", "paths", "writer"];
        if SECTIONS.iter().any(|key| value.get(key).is_some()) {
            Ok(serde_json::from_value(value)?)
        } else {
            let legacy: LegacyConfig = serde_json::from_value(value)?;
            Ok(Self::from_legacy(legacy))
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }

    fn from_legacy(legacy: LegacyConfig) -> Self {
        let mut config = Self::default();
        let profile = LlmConfig {
            api_key: legacy.api_key.unwrap_or_default(),
            api_key_env: String::new(),
            base_url: legacy.base_url.unwrap_or_default(),
            interface_format: legacy.interface_format.unwrap_or_default(),
            model_name: legacy.model_name.or(legacy.model).unwrap_or_default(),
            temperature: legacy.temperature.unwrap_or_else(default_temperature),
            max_tokens: legacy.max_tokens.unwrap_or_else(default_max_tokens),
            timeout: legacy.timeout.unwrap_or_else(default_timeout),
        };
        if profile.is_meaningful() {
            config.recent.last_llm_interface = Some("default".to_string());
            config.llm_profiles.insert("default".to_string(), profile);
        }
        config
    }
}

/// Flat single-profile layout used by early versions of the tool.
#[derive(Clone, Debug, Default, Deserialize)]
struct LegacyConfig {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    interface_format: Option<String>,
    #[serde(default)]
    model_name: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: Config,
}

impl ConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = if path.exists() {
            Config::from_path(&path)?
        } else {
            Config::default()
        };

        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.config.to_path(&self.path)
    }

    pub fn touch_llm_interface<S: Into<String>>(&mut self, name: S) {
        self.config.recent.last_llm_interface = Some(name.into());
    }

    pub fn last_llm_interface(&self) -> Option<&str> {
        self.config
            .recent
            .last_llm_interface
            .as_deref()
            .filter(|name| self.config.llm_profiles.contains_key(*name))
    }

    pub fn ensure_recent_defaults(&mut self) {
        if self.last_llm_interface().is_none() {
            let next = self.config.llm_profiles.keys().next().cloned();
            self.config.recent.last_llm_interface = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_profiles_and_paths() {
        let json = r#"{
            "llm_profiles": {
                "openai": {
                    "api_key": "123",
                    "base_url": "https://api.openai.com/v1",
                    "interface_format": "OpenAI",
                    "model_name": "gpt-4o-mini",
                    "temperature": 0.5
                }
            },
            "paths": { "auditions_dir": "runs" },
            "writer": { "chunk_words": 300 },
            "recent": { "last_llm_interface": "openai" }
        }"#;

        let config = Config::from_json_str(json).unwrap();
        assert_eq!(config.recent.last_llm_interface.as_deref(), Some("openai"));
        let profile = config.get_llm_profile("openai").unwrap();
        assert_eq!(profile.max_tokens, 8000);
        assert_eq!(profile.temperature, 0.5);
        assert_eq!(config.paths.auditions_dir, PathBuf::from("runs"));
        assert_eq!(config.paths.raw_dir, PathBuf::from("data/raw"));
        assert_eq!(config.writer.chunk_words, 300);
        assert_eq!(config.writer.context_limit_tokens, 28_000);
    }

    #[test]
    fn migrates_flat_legacy_config() {
        let json = r#"{
            "api_key": "abc",
            "model": "gpt-4o",
            "temperature": 0.9
        }"#;

        let config = Config::from_json_str(json).unwrap();
        let profile = config.get_llm_profile("default").unwrap();
        assert_eq!(profile.model_name, "gpt-4o");
        assert_eq!(profile.temperature, 0.9);
        assert_eq!(config.recent.last_llm_interface.as_deref(), Some("default"));
    }

    #[test]
    fn empty_input_yields_defaults() {
        let config = Config::from_json_str("  ").unwrap();
        assert!(config.llm_profiles.is_empty());
        assert_eq!(config.writer.target_ratio, 1.0);
    }

    #[test]
    fn store_persists_last_profile() {
        let temp = tempdir().unwrap();
        let config_path = temp.path().join("nested").join("config.json");

        let mut store = ConfigStore::open(config_path.clone()).unwrap();
        store.config_mut().upsert_llm_profile(
            "claude",
            LlmConfig {
                interface_format: "anthropic".into(),
                model_name: "claude-3-5-sonnet-latest".into(),
                ..LlmConfig::default()
            },
        );
        store.touch_llm_interface("claude");
        store.save().unwrap();

        let store = ConfigStore::open(config_path).unwrap();
        assert_eq!(store.last_llm_interface(), Some("claude"));
    }

    #[test]
    fn ensure_recent_defaults_replaces_stale_profile() {
        let temp = tempdir().unwrap();
        let mut store = ConfigStore::open(temp.path().join("config.json")).unwrap();
        store
            .config_mut()
            .upsert_llm_profile("openai", LlmConfig::default());
        store.touch_llm_interface("removed");
        store.ensure_recent_defaults();
        assert_eq!(store.last_llm_interface(), Some("openai"));
    }

    #[test]
    fn model_override_keeps_credentials() {
        let base = LlmConfig {
            api_key: "k".into(),
            model_name: "gpt-4o-mini".into(),
            ..LlmConfig::default()
        };
        let overridden = base.with_model_override(Some("gpt-4o"), Some(0.2));
        assert_eq!(overridden.api_key, "k");
        assert_eq!(overridden.model_name, "gpt-4o");
        assert_eq!(overridden.temperature, 0.2);

        let untouched = base.with_model_override(Some("  "), None);
        assert_eq!(untouched.model_name, "gpt-4o-mini");
    }

    #[test]
    fn api_key_falls_back_to_environment() {
        let profile = LlmConfig {
            api_key_env: "PROSE_FORGE_TEST_KEY_UNSET_VAR".into(),
            ..LlmConfig::default()
        };
        assert_eq!(profile.resolved_api_key(), "");

        let explicit = LlmConfig {
            api_key: "inline".into(),
            api_key_env: "PATH".into(),
            ..LlmConfig::default()
        };
        assert_eq!(explicit.resolved_api_key(), "inline");
    }
}
