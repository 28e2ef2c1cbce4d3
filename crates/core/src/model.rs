use serde::Serialize;
use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct LanguageModelError {
    inner: Box<dyn StdError + Send + Sync>,
}

impl LanguageModelError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
        }
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            inner: message.into().into(),
        }
    }

    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync> {
        self.inner
    }
}

impl fmt::Display for LanguageModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for LanguageModelError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// One chat-completion call: an optional system message followed by a user message.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub user: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            user: text.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        let system = system.into();
        self.system = if system.trim().is_empty() {
            None
        } else {
            Some(system)
        };
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system {
            messages.push(ChatMessage {
                role: ChatRole::System,
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: ChatRole::User,
            content: self.user.clone(),
        });
        messages
    }
}

pub trait LanguageModel: Send + Sync {
    fn complete(&self, request: &ChatRequest) -> Result<String, LanguageModelError>;

    fn invoke(&self, prompt: &str) -> Result<String, LanguageModelError> {
        self.complete(&ChatRequest::user(prompt))
    }
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn complete(&self, request: &ChatRequest) -> Result<String, LanguageModelError> {
        (**self).complete(request)
    }
}

impl<M: LanguageModel + ?Sized> LanguageModel for &M {
    fn complete(&self, request: &ChatRequest) -> Result<String, LanguageModelError> {
        (**self).complete(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl LanguageModel for Echo {
        fn complete(&self, request: &ChatRequest) -> Result<String, LanguageModelError> {
            Ok(format!(
                "{}|{}",
                request.system.as_deref().unwrap_or("-"),
                request.user
            ))
        }
    }

    #[test]
    fn invoke_sends_user_only_request() {
        assert_eq!(Echo.invoke("hello").unwrap(), "-|hello");
    }

    #[test]
    fn blank_system_prompt_is_dropped() {
        let request = ChatRequest::user("body").with_system("   ");
        assert!(request.system.is_none());
        assert_eq!(request.messages().len(), 1);
    }

    #[test]
    fn boxed_models_forward_calls() {
        let boxed: Box<dyn LanguageModel> = Box::new(Echo);
        let request = ChatRequest::user("u").with_system("s");
        assert_eq!(boxed.complete(&request).unwrap(), "s|u");
    }
}
