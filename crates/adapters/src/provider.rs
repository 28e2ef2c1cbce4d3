use prose_core::config::LlmConfig;
use prose_core::{LanguageModel, LanguageModelError, ModelProvider};

use crate::llm::create_llm_adapter_from_profile;

/// Hands experiments a model built from one profile, swapping the model
/// name when an experiment asks for a different one.
#[derive(Clone, Debug)]
pub struct ProfileModelProvider {
    profile: LlmConfig,
}

impl ProfileModelProvider {
    pub fn new(profile: LlmConfig) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &LlmConfig {
        &self.profile
    }
}

impl ModelProvider for ProfileModelProvider {
    fn default_model(&self) -> String {
        self.profile.model_name.trim().to_string()
    }

    fn model(&self, name: Option<&str>) -> Result<Box<dyn LanguageModel>, LanguageModelError> {
        let profile = self.profile.with_model_override(name, None);
        Ok(create_llm_adapter_from_profile(&profile)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prose_core::ChatRequest;

    #[test]
    fn override_replaces_model_name() {
        let provider = ProfileModelProvider::new(LlmConfig {
            interface_format: "stub".to_string(),
            model_name: "base-model".to_string(),
            ..LlmConfig::default()
        });
        assert_eq!(provider.default_model(), "base-model");

        let model = provider.model(Some("other-model")).unwrap();
        let reply = model.complete(&ChatRequest::user("ab")).unwrap();
        assert!(reply.starts_with("[other-model]"));

        let model = provider.model(None).unwrap();
        assert!(model.invoke("ab").unwrap().starts_with("[base-model]"));
    }
}
