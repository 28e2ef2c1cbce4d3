use prose_core::LanguageModelError;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("request to provider failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{provider} profile is missing `{field}`")]
    MissingField {
        provider: &'static str,
        field: &'static str,
    },
    #[error("unknown interface_format `{0}`")]
    UnknownInterface(String),
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
    #[error("provider answered {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("gave up after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: usize,
        #[source]
        source: Box<AdapterError>,
    },
    #[error("provider returned no text")]
    EmptyResponse,
}

impl AdapterError {
    pub fn retry_exhausted(attempts: usize, source: AdapterError) -> Self {
        AdapterError::RetryExhausted {
            attempts,
            source: Box::new(source),
        }
    }

    /// Client errors other than rate limiting will not succeed on retry.
    pub fn is_permanent(&self) -> bool {
        match self {
            AdapterError::HttpStatus { status, .. } => {
                status.is_client_error() && *status != StatusCode::TOO_MANY_REQUESTS
            }
            AdapterError::MissingField { .. }
            | AdapterError::UnknownInterface(_)
            | AdapterError::InvalidConfig(_) => true,
            _ => false,
        }
    }
}

impl From<AdapterError> for LanguageModelError {
    fn from(err: AdapterError) -> Self {
        LanguageModelError::new(err)
    }
}
