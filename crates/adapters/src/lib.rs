mod base_url;
mod error;
mod llm;
mod provider;
mod retry;

pub use base_url::check_base_url;
pub use error::AdapterError;
pub use llm::{create_llm_adapter, create_llm_adapter_from_profile, interface_for};
pub use provider::ProfileModelProvider;
pub use retry::{call_with_retry, RetryConfig};

pub use prose_core::config::{Config, ConfigStore, LlmConfig};
pub use prose_core::{LanguageModel, LanguageModelError};
