use std::thread;
use std::time::Duration;

use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use prose_core::config::{Config, LlmConfig};
use prose_core::{ChatRequest, ChatRole, LanguageModel, LanguageModelError};

use crate::base_url::check_base_url;
use crate::error::AdapterError;
use crate::retry::{call_with_retry, RetryConfig};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 4096;

pub fn create_llm_adapter(
    config: &Config,
    profile_name: &str,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let profile = config.get_llm_profile(profile_name).ok_or_else(|| {
        AdapterError::InvalidConfig(format!("unknown LLM profile `{}`", profile_name))
    })?;
    create_llm_adapter_from_profile(profile)
}

/// Provider named by `interface_format`; blank means Anthropic for `claude*`
/// models and OpenAI otherwise.
pub fn interface_for(profile: &LlmConfig) -> String {
    let fmt = profile.interface_format.trim().to_lowercase();
    if !fmt.is_empty() {
        return fmt;
    }
    if profile
        .model_name
        .trim()
        .to_ascii_lowercase()
        .starts_with("claude")
    {
        "anthropic".to_string()
    } else {
        "openai".to_string()
    }
}

pub fn create_llm_adapter_from_profile(
    profile: &LlmConfig,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let fmt = interface_for(profile);
    let timeout = profile.timeout.max(1);
    let api_key = profile.resolved_api_key();
    let settings = Settings {
        model_name: profile.model_name.trim().to_string(),
        max_tokens: profile.max_tokens,
        temperature: profile.temperature,
        timeout,
    };

    let openai_like = |default_base: &str| -> Result<Box<dyn LanguageModel>, AdapterError> {
        Ok(Box::new(OpenAiLikeAdapter::new(
            resolve_base_url(&profile.base_url, default_base),
            optional_string(&api_key),
            settings.clone(),
        )?))
    };

    match fmt.as_str() {
        "openai" => openai_like("https://api.openai.com/v1"),
        "deepseek" => openai_like("https://api.deepseek.com/v1"),
        "ollama" => openai_like("http://localhost:11434/v1"),
        "lm studio" | "ml studio" => openai_like("http://localhost:1234/v1"),
        "grok" => openai_like("https://api.x.ai/v1"),
        "openrouter" => openai_like("https://openrouter.ai/api/v1"),
        "azure openai" => Ok(Box::new(AzureOpenAiAdapter::new(
            api_key,
            &profile.base_url,
            settings,
        )?)),
        "gemini" => Ok(Box::new(GeminiAdapter::new(
            api_key,
            &profile.base_url,
            settings,
        )?)),
        "anthropic" => Ok(Box::new(AnthropicAdapter::new(
            api_key,
            &profile.base_url,
            settings,
        )?)),
        "stub" => Ok(Box::new(StubAdapter::new(&settings.model_name))),
        other => Err(AdapterError::UnknownInterface(other.to_string())),
    }
}

fn optional_string(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn resolve_base_url(base_url: &str, default: &str) -> String {
    let raw = if base_url.trim().is_empty() {
        default.to_string()
    } else {
        base_url.to_string()
    };
    check_base_url(&raw)
}

fn build_client(timeout: u64) -> Result<Client, AdapterError> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()?)
}

/// Profile defaults; a request's own temperature and max tokens win.
#[derive(Clone, Debug)]
struct Settings {
    model_name: String,
    max_tokens: u32,
    temperature: f32,
    timeout: u64,
}

impl Settings {
    fn temperature(&self, request: &ChatRequest) -> f32 {
        request.temperature.unwrap_or(self.temperature)
    }

    fn max_tokens(&self, request: &ChatRequest) -> Option<u32> {
        request
            .max_tokens
            .or(Some(self.max_tokens))
            .filter(|tokens| *tokens > 0)
    }
}

fn role_name(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
    }
}

struct OpenAiLikeAdapter {
    client: Client,
    url: String,
    api_key: Option<String>,
    settings: Settings,
    retry: RetryConfig,
}

impl OpenAiLikeAdapter {
    fn new(
        base_url: String,
        api_key: Option<String>,
        settings: Settings,
    ) -> Result<Self, AdapterError> {
        if base_url.trim().is_empty() {
            return Err(AdapterError::MissingField {
                provider: "OpenAI-compatible",
                field: "base_url",
            });
        }

        if settings.model_name.is_empty() {
            return Err(AdapterError::MissingField {
                provider: "OpenAI-compatible",
                field: "model_name",
            });
        }

        Ok(Self {
            client: build_client(settings.timeout)?,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            settings,
            retry: RetryConfig::default(),
        })
    }

    fn complete_once(&self, request: &ChatRequest) -> Result<String, AdapterError> {
        let messages = request.messages();
        let body = ChatCompletionRequest {
            model: Some(self.settings.model_name.as_str()),
            messages: messages
                .iter()
                .map(|message| ChatMessageRequest {
                    role: role_name(message.role),
                    content: &message.content,
                })
                .collect(),
            max_tokens: self.settings.max_tokens(request),
            temperature: Some(self.settings.temperature(request)),
        };

        let mut http = self.client.post(&self.url).header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.json(&body).send()?;
        handle_chat_response(response)
    }
}

impl LanguageModel for OpenAiLikeAdapter {
    fn complete(&self, request: &ChatRequest) -> Result<String, LanguageModelError> {
        Ok(call_with_retry(|| self.complete_once(request), &self.retry)?)
    }
}

struct AzureOpenAiAdapter {
    client: Client,
    url: String,
    api_key: String,
    settings: Settings,
    retry: RetryConfig,
}

impl AzureOpenAiAdapter {
    fn new(api_key: String, base_url: &str, settings: Settings) -> Result<Self, AdapterError> {
        if api_key.trim().is_empty() {
            return Err(AdapterError::MissingField {
                provider: "Azure OpenAI",
                field: "api_key",
            });
        }

        static AZURE_RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(
                r"^https://([^/]+)/openai/deployments/([^/]+)/chat/completions\?api-version=([^/?&]+)",
            )
            .expect("valid Azure endpoint regex")
        });

        let captures = AZURE_RE.captures(base_url.trim()).ok_or_else(|| {
            AdapterError::InvalidConfig(
                "Invalid Azure OpenAI base_url format. Expected https://<resource>.openai.azure.com/openai/deployments/<deployment>/chat/completions?api-version=<version>"
                    .to_string(),
            )
        })?;

        let url = format!(
            "https://{}/openai/deployments/{}/chat/completions?api-version={}",
            &captures[1], &captures[2], &captures[3]
        );

        Ok(Self {
            client: build_client(settings.timeout)?,
            url,
            api_key,
            settings,
            retry: RetryConfig::default(),
        })
    }

    fn complete_once(&self, request: &ChatRequest) -> Result<String, AdapterError> {
        let messages = request.messages();
        let body = ChatCompletionRequest {
            model: None,
            messages: messages
                .iter()
                .map(|message| ChatMessageRequest {
                    role: role_name(message.role),
                    content: &message.content,
                })
                .collect(),
            max_tokens: self.settings.max_tokens(request),
            temperature: Some(self.settings.temperature(request)),
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            "api-key",
            HeaderValue::from_str(&self.api_key).map_err(|err| {
                AdapterError::InvalidConfig(format!("invalid api key header: {}", err))
            })?,
        );

        let response = self
            .client
            .post(&self.url)
            .headers(headers)
            .json(&body)
            .send()?;
        handle_chat_response(response)
    }
}

impl LanguageModel for AzureOpenAiAdapter {
    fn complete(&self, request: &ChatRequest) -> Result<String, LanguageModelError> {
        Ok(call_with_retry(|| self.complete_once(request), &self.retry)?)
    }
}

/// Anthropic Messages API; the system prompt travels outside `messages`.
struct AnthropicAdapter {
    client: Client,
    url: String,
    api_key: String,
    settings: Settings,
    retry: RetryConfig,
}

impl AnthropicAdapter {
    fn new(api_key: String, base_url: &str, settings: Settings) -> Result<Self, AdapterError> {
        if api_key.trim().is_empty() {
            return Err(AdapterError::MissingField {
                provider: "Anthropic",
                field: "api_key",
            });
        }
        if settings.model_name.is_empty() {
            return Err(AdapterError::MissingField {
                provider: "Anthropic",
                field: "model_name",
            });
        }

        let base = resolve_base_url(base_url, "https://api.anthropic.com/v1");
        Ok(Self {
            client: build_client(settings.timeout)?,
            url: format!("{}/messages", base.trim_end_matches('/')),
            api_key,
            settings,
            retry: RetryConfig::default(),
        })
    }

    fn body<'a>(&'a self, request: &'a ChatRequest) -> AnthropicRequest<'a> {
        AnthropicRequest {
            model: &self.settings.model_name,
            max_tokens: self
                .settings
                .max_tokens(request)
                .unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
            system: request
                .system
                .as_deref()
                .filter(|system| !system.trim().is_empty()),
            messages: vec![ChatMessageRequest {
                role: "user",
                content: &request.user,
            }],
            temperature: self.settings.temperature(request),
        }
    }

    fn complete_once(&self, request: &ChatRequest) -> Result<String, AdapterError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key).map_err(|err| {
                AdapterError::InvalidConfig(format!("invalid api key header: {}", err))
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let response = self
            .client
            .post(&self.url)
            .headers(headers)
            .json(&self.body(request))
            .send()?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::HttpStatus { status, body });
        }

        let parsed: AnthropicResponse = response.json()?;
        parse_anthropic_response(parsed)
    }
}

impl LanguageModel for AnthropicAdapter {
    fn complete(&self, request: &ChatRequest) -> Result<String, LanguageModelError> {
        Ok(call_with_retry(|| self.complete_once(request), &self.retry)?)
    }
}

struct GeminiAdapter {
    client: Client,
    url: String,
    settings: Settings,
    retry: RetryConfig,
    base_delay: Duration,
}

impl GeminiAdapter {
    fn new(api_key: String, base_url: &str, settings: Settings) -> Result<Self, AdapterError> {
        if api_key.trim().is_empty() {
            return Err(AdapterError::MissingField {
                provider: "Gemini",
                field: "api_key",
            });
        }

        if settings.model_name.is_empty() {
            return Err(AdapterError::MissingField {
                provider: "Gemini",
                field: "model_name",
            });
        }

        let base = if base_url.trim().is_empty() {
            "https://generativelanguage.googleapis.com/v1beta".to_string()
        } else {
            base_url.trim().trim_end_matches('/').to_string()
        };

        Ok(Self {
            client: build_client(settings.timeout)?,
            url: format!(
                "{base}/models/{model}:generateContent?key={api}",
                model = settings.model_name,
                api = api_key
            ),
            settings,
            retry: RetryConfig::default(),
            base_delay: Duration::from_secs(5),
        })
    }

    fn complete_once(&self, request: &ChatRequest) -> Result<String, AdapterError> {
        let body = GeminiRequest {
            system_instruction: request
                .system
                .as_deref()
                .filter(|system| !system.trim().is_empty())
                .map(|system| GeminiSystemInstruction {
                    parts: vec![GeminiRequestPart { text: system }],
                }),
            contents: vec![GeminiRequestContent {
                role: "user",
                parts: vec![GeminiRequestPart {
                    text: &request.user,
                }],
            }],
            generation_config: GeminiGenerationConfig {
                max_output_tokens: self.settings.max_tokens(request),
                temperature: self.settings.temperature(request),
            },
        };

        let response = self.client.post(&self.url).json(&body).send()?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::HttpStatus { status, body });
        }

        let parsed: GeminiResponse = response.json()?;
        parse_gemini_response(parsed)
    }

    fn rate_limit_delay(&self, err: &AdapterError, attempt: usize) -> Option<Duration> {
        match err {
            AdapterError::HttpStatus { status, body } => {
                let lower = body.to_ascii_lowercase();
                if *status == StatusCode::TOO_MANY_REQUESTS
                    || lower.contains("quota")
                    || lower.contains("rate limit")
                {
                    if let Some(secs) = parse_retry_delay(body) {
                        return Some(Duration::from_secs(secs + 5));
                    }
                    let multiplier = 1u32.checked_shl(attempt as u32).unwrap_or(1);
                    return self
                        .base_delay
                        .checked_mul(multiplier)
                        .or(Some(self.base_delay));
                }
                None
            }
            _ => None,
        }
    }
}

impl LanguageModel for GeminiAdapter {
    fn complete(&self, request: &ChatRequest) -> Result<String, LanguageModelError> {
        let attempts = self.retry.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match self.complete_once(request) {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if attempt + 1 < attempts {
                        let delay = self
                            .rate_limit_delay(&err, attempt)
                            .unwrap_or_else(|| self.retry.delay_for(attempt + 1));
                        warn!(
                            "Gemini call failed ({}), retrying in {:?} (attempt {}/{})",
                            err,
                            delay,
                            attempt + 1,
                            attempts
                        );
                        thread::sleep(delay);
                    }
                    last_error = Some(err);
                }
            }
        }

        let err = last_error.unwrap_or(AdapterError::EmptyResponse);
        Err(AdapterError::retry_exhausted(attempts, err).into())
    }
}

/// Offline stand-in for dry runs; answers without touching the network.
struct StubAdapter {
    model_name: String,
}

impl StubAdapter {
    fn new(model_name: &str) -> Self {
        let model_name = if model_name.is_empty() {
            "stub".to_string()
        } else {
            model_name.to_string()
        };
        Self { model_name }
    }
}

impl LanguageModel for StubAdapter {
    fn complete(&self, request: &ChatRequest) -> Result<String, LanguageModelError> {
        Ok(format!(
            "[{}] received {} characters.",
            self.model_name,
            request.user.chars().count()
        ))
    }
}

fn handle_chat_response(response: reqwest::blocking::Response) -> Result<String, AdapterError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        return Err(AdapterError::HttpStatus { status, body });
    }

    let parsed: ChatCompletionResponse = response.json()?;
    extract_choice_content(parsed).ok_or(AdapterError::EmptyResponse)
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessageRequest<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn extract_choice_content(response: ChatCompletionResponse) -> Option<String> {
    for choice in response.choices {
        if let Some(message) = choice.message {
            if let Some(content) = message.content {
                if !content.trim().is_empty() {
                    return Some(content);
                }
            }
        }
        if let Some(content) = choice.content {
            if !content.trim().is_empty() {
                return Some(content);
            }
        }
    }
    None
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<ChatMessageRequest<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

fn parse_anthropic_response(response: AnthropicResponse) -> Result<String, AdapterError> {
    if response.stop_reason.as_deref() == Some("max_tokens") {
        warn!("Anthropic response truncated due to max_tokens limit");
    }
    let text: String = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();
    if text.trim().is_empty() {
        Err(AdapterError::EmptyResponse)
    } else {
        Ok(text)
    }
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    #[serde(rename = "system_instruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction<'a>>,
    contents: Vec<GeminiRequestContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiSystemInstruction<'a> {
    parts: Vec<GeminiRequestPart<'a>>,
}

#[derive(Serialize)]
struct GeminiRequestContent<'a> {
    role: &'static str,
    parts: Vec<GeminiRequestPart<'a>>,
}

#[derive(Serialize)]
struct GeminiRequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    Other(serde_json::Value),
}

fn parse_gemini_response(response: GeminiResponse) -> Result<String, AdapterError> {
    for candidate in response.candidates {
        if let Some(reason) = candidate.finish_reason.as_deref() {
            match reason {
                "MAX_TOKENS" => warn!("Gemini response truncated due to max_tokens limit"),
                "SAFETY" => warn!("Gemini response blocked by safety filters"),
                "RECITATION" => warn!("Gemini response blocked due to recitation concerns"),
                _ => {}
            }
        }

        if let Some(content) = candidate.content {
            let mut text = String::new();
            for part in content.parts {
                if let GeminiPart::Text { text: part_text } = part {
                    text.push_str(&part_text);
                }
            }
            if !text.trim().is_empty() {
                return Ok(text);
            }
        }
    }

    Err(AdapterError::EmptyResponse)
}

fn parse_retry_delay(body: &str) -> Option<u64> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(details) = value
            .get("error")
            .and_then(|v| v.get("details"))
            .and_then(|v| v.as_array())
        {
            for detail in details {
                if let Some(delay) = detail
                    .get("retryDelay")
                    .or_else(|| detail.get("retry_delay"))
                {
                    if let Some(parsed) = parse_delay_value(delay) {
                        return Some(parsed);
                    }
                }
            }
        }
    }

    static RETRY_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"retry[_ ]?delay[^0-9]*(\d+)").expect("valid regex for retry delay")
    });

    RETRY_RE
        .captures(body)
        .and_then(|caps| caps.get(1))
        .and_then(|matched| matched.as_str().parse::<u64>().ok())
}

fn parse_delay_value(value: &serde_json::Value) -> Option<u64> {
    if let Some(number) = value.as_u64() {
        return Some(number);
    }

    value
        .as_str()
        .and_then(|text| text.trim_end_matches('s').parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(format: &str, model: &str) -> LlmConfig {
        LlmConfig {
            api_key: "sk-test".to_string(),
            interface_format: format.to_string(),
            model_name: model.to_string(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn blank_format_is_inferred_from_model() {
        assert_eq!(interface_for(&profile("", "claude-3-5-sonnet")), "anthropic");
        assert_eq!(interface_for(&profile("", "gpt-4o")), "openai");
        assert_eq!(interface_for(&profile(" Gemini ", "claude")), "gemini");
    }

    #[test]
    fn factory_rejects_unknown_and_incomplete_profiles() {
        assert!(matches!(
            create_llm_adapter_from_profile(&profile("carrier pigeon", "x")),
            Err(AdapterError::UnknownInterface(name)) if name == "carrier pigeon"
        ));
        assert!(matches!(
            create_llm_adapter_from_profile(&profile("openai", " ")),
            Err(AdapterError::MissingField { field: "model_name", .. })
        ));
        let mut keyless = profile("anthropic", "claude-3-haiku");
        keyless.api_key.clear();
        assert!(matches!(
            create_llm_adapter_from_profile(&keyless),
            Err(AdapterError::MissingField { field: "api_key", .. })
        ));
        assert!(matches!(
            create_llm_adapter(&Config::default(), "missing"),
            Err(AdapterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn stub_answers_offline() {
        let model = create_llm_adapter_from_profile(&profile("stub", "dry-run")).unwrap();
        let answer = model.complete(&ChatRequest::user("four")).unwrap();
        assert_eq!(answer, "[dry-run] received 4 characters.");
    }

    #[test]
    fn anthropic_body_carries_system_separately() {
        let adapter = AnthropicAdapter::new(
            "key".to_string(),
            "",
            Settings {
                model_name: "claude-3-haiku".to_string(),
                max_tokens: 0,
                temperature: 0.7,
                timeout: 5,
            },
        )
        .unwrap();
        assert_eq!(adapter.url, "https://api.anthropic.com/v1/messages");

        let request = ChatRequest::user("rewrite")
            .with_system("be terse")
            .with_temperature(0.2);
        let body = serde_json::to_value(adapter.body(&request)).unwrap();
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn anthropic_text_blocks_are_joined() {
        let parsed: AnthropicResponse = serde_json::from_str(
            r#"{"content": [{"type": "text", "text": "Rain "}, {"type": "tool_use"}, {"type": "text", "text": "fell."}], "stop_reason": "end_turn"}"#,
        )
        .unwrap();
        assert_eq!(parse_anthropic_response(parsed).unwrap(), "Rain fell.");

        let empty: AnthropicResponse = serde_json::from_str(r#"{"content": []}"#).unwrap();
        assert!(matches!(
            parse_anthropic_response(empty),
            Err(AdapterError::EmptyResponse)
        ));
    }

    #[test]
    fn chat_choices_skip_blank_content() {
        let parsed: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"content": "  "}}, {"message": {"content": "draft"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_choice_content(parsed).as_deref(), Some("draft"));
    }

    #[test]
    fn retry_delay_is_read_from_error_details() {
        let body = r#"{"error": {"details": [{"retryDelay": "17s"}]}}"#;
        assert_eq!(parse_retry_delay(body), Some(17));
        assert_eq!(parse_retry_delay("quota hit, retry_delay: 9"), Some(9));
        assert_eq!(parse_retry_delay("nothing here"), None);
    }

    #[test]
    fn request_overrides_profile_defaults() {
        let settings = Settings {
            model_name: "m".to_string(),
            max_tokens: 8000,
            temperature: 0.7,
            timeout: 5,
        };
        let request = ChatRequest::user("x").with_max_tokens(1024);
        assert_eq!(settings.max_tokens(&request), Some(1024));
        assert!((settings.temperature(&request) - 0.7).abs() < f32::EPSILON);
        assert_eq!(settings.max_tokens(&ChatRequest::user("x")), Some(8000));
    }
}
