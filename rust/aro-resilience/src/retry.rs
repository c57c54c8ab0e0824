//! Retry with backoff and jitter

use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Delay growth between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    Fixed,
    Linear,
    Exponential,
}

/// Per-family retry tuning
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub strategy: RetryStrategy,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: RetryStrategy::Exponential,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Delay before retrying after `attempt` failures (1-based), jittered
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = match self.strategy {
            RetryStrategy::Fixed => self.initial_delay,
            RetryStrategy::Linear => self.initial_delay * attempt.max(1),
            RetryStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
                self.initial_delay.saturating_mul(factor)
            }
        };
        let capped = base.min(self.max_delay);
        capped + jitter(capped)
    }
}

/// Uniform jitter in [0, 0.1 * delay]
fn jitter(delay: Duration) -> Duration {
    let max_jitter = delay.as_secs_f64() * 0.1;
    if max_jitter <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=max_jitter))
}

/// Backoff for the dispatch worker: exponential from 250 ms, capped at 30 s
pub fn dispatch_backoff(attempt: u32) -> Duration {
    RetryConfig::default().delay_for_attempt(attempt)
}

/// Execute `operation` with retries; `retryable` decides which errors are
/// worth another attempt. Transient errors are retried here and nowhere
/// else in the request path.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= config.max_attempts || !retryable(&e) {
                    return Err(e);
                }
                sleep(config.delay_for_attempt(attempt)).await;
            }
        }
    }
}
