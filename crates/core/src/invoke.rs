use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::{ChatRequest, LanguageModel, LanguageModelError};

pub(crate) const DEFAULT_MAX_RETRIES: usize = 3;

/// Calls a model, retrying empty answers and transport failures. Returns an
/// empty string when every attempt came back blank; callers decide whether
/// that is fatal for their stage.
pub(crate) struct Invoker<'a> {
    sink: &'a dyn LogSink,
    max_retries: usize,
}

impl<'a> Invoker<'a> {
    pub(crate) fn new(sink: &'a dyn LogSink, max_retries: usize) -> Self {
        Self {
            sink,
            max_retries: max_retries.max(1),
        }
    }

    pub(crate) fn call<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        label: &str,
        request: &ChatRequest,
    ) -> Result<String, LanguageModelError> {
        for attempt in 1..=self.max_retries {
            self.log(
                LogLevel::Info,
                format!("{label}: sending request (attempt {attempt}/{})", self.max_retries),
            );
            self.log(
                LogLevel::Debug,
                format!(
                    "{label} prompt:\n[system]\n{}\n[user]\n{}",
                    request.system.as_deref().unwrap_or(""),
                    request.user
                ),
            );

            match model.complete(request) {
                Ok(response) => {
                    self.log(LogLevel::Debug, format!("{label} response:\n{response}"));
                    let trimmed = response.trim();
                    if !trimmed.is_empty() {
                        return Ok(trimmed.to_string());
                    }
                    self.log(
                        LogLevel::Warn,
                        format!("{label}: empty response (attempt {attempt}/{})", self.max_retries),
                    );
                }
                Err(err) => {
                    self.log(
                        LogLevel::Warn,
                        format!(
                            "{label}: model call failed (attempt {attempt}/{}): {err}",
                            self.max_retries
                        ),
                    );
                    if attempt == self.max_retries {
                        return Err(err);
                    }
                }
            }
        }

        Ok(String::new())
    }

    fn log(&self, level: LogLevel, message: String) {
        self.sink.log(LogRecord::new(level, message));
    }
}
