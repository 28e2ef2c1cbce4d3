use std::thread;
use std::time::Duration;

use log::warn;

use crate::error::AdapterError;

#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    pub max_retries: usize,
    /// Delay before the second attempt; doubled for each later one.
    pub sleep: Duration,
}

impl RetryConfig {
    pub const fn new(max_retries: usize, sleep: Duration) -> Self {
        Self { max_retries, sleep }
    }

    pub fn delay_for(&self, failed_attempts: usize) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16) as u32;
        self.sleep
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.sleep)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            sleep: Duration::from_secs(2),
        }
    }
}

pub fn call_with_retry<F, T>(mut f: F, config: &RetryConfig) -> Result<T, AdapterError>
where
    F: FnMut() -> Result<T, AdapterError>,
{
    let attempts = config.max_retries.max(1);
    let mut last_error: Option<AdapterError> = None;

    for attempt in 1..=attempts {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_permanent() => {
                warn!("[call_with_retry] permanent failure, not retrying: {}", err);
                return Err(err);
            }
            Err(err) => {
                if attempt < attempts {
                    let delay = config.delay_for(attempt);
                    warn!(
                        "[call_with_retry] attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, attempts, err, delay
                    );
                    thread::sleep(delay);
                } else {
                    warn!(
                        "[call_with_retry] attempt {}/{} failed: {}",
                        attempt, attempts, err
                    );
                }
                last_error = Some(err);
            }
        }
    }

    let err = last_error.unwrap_or(AdapterError::EmptyResponse);
    Err(AdapterError::retry_exhausted(attempts, err))
}
