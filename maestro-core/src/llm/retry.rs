//! Retry logic for provider invocations
//!
//! Exponential backoff with jitter for transient provider failures. A
//! failure only counts against a provider's health window after the retry
//! budget is exhausted.

use std::time::Duration;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling for the computed delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add jitter to prevent thundering herd
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Builder: set max attempts.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Builder: set initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Builder: enable/disable jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Delay before retrying after the given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let clamped = base.min(self.max_delay.as_millis() as f64);

        let with_jitter = if self.add_jitter {
            // Up to 25% jitter
            clamped + clamped * 0.25 * jitter_unit()
        } else {
            clamped
        };

        Duration::from_millis(with_jitter as u64)
    }
}

/// Pseudo-random value in [0, 1).
///
/// A small LCG seeded from a monotonic counter mixed with the wall clock;
/// good enough for jitter and weighted sampling, and dependency-free.
pub(crate) fn jitter_unit() -> f64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEED: AtomicU64 = AtomicU64::new(0);

    const A: u64 = 1103515245;
    const C: u64 = 12345;
    const M: u64 = 1 << 31;

    let counter = SEED.fetch_add(1, Ordering::Relaxed);
    let clock = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let next = (A.wrapping_mul(counter.wrapping_add(clock)).wrapping_add(C)) % M;
    (next as f64) / (M as f64)
}

/// Execute an async operation, retrying on failure per `config`.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                if attempt >= config.max_attempts {
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt - 1);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying provider call");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
