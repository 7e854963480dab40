use crate::error::TranslationError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Short in-line retry for idempotent provider reads.
///
/// This is not the poll backoff (see `scheduler::PollPolicy`); it only
/// smooths over a dropped connection while a caller is waiting.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Preset: result fetch while the provider is waiting on our webhook
    /// response (3 attempts, delays 250ms then 500ms)
    pub fn provider_read() -> Self {
        Self::new(3, Duration::from_millis(250)).with_max_delay(Duration::from_secs(1))
    }

    /// Delay before the given attempt (0-indexed)
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::provider_read()
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `config.max_attempts` is used up. Returns the last error on failure.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, TranslationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TranslationError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let delay = config.delay_for_attempt(attempt);
        if !delay.is_zero() {
            debug!(
                "{}: Retry attempt {}/{} after {:?}",
                operation_name,
                attempt + 1,
                max_attempts,
                delay
            );
            sleep(delay).await;
        }

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => {
                debug!("{}: Error is not retryable: {}", operation_name, e);
                return Err(e);
            }
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    warn!(
                        "{}: All {} attempts failed. Last error: {}",
                        operation_name, max_attempts, e
                    );
                    return Err(e);
                }
                warn!(
                    "{}: Attempt {}/{} failed ({}), {} retries remaining",
                    operation_name,
                    attempt,
                    max_attempts,
                    e,
                    max_attempts - attempt
                );
            }
        }
    }
}
