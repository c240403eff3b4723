//! Retry with exponential backoff and jitter.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use gateway::GatewayError;
use tracing::warn;

use crate::config::RetryConfig;

/// Classifies errors for [`RetryPolicy::run`].
pub trait Retryable: Display {
    fn is_retryable(&self) -> bool;

    /// Server-requested minimum wait before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for GatewayError {
    fn is_retryable(&self) -> bool {
        GatewayError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        GatewayError::retry_after(self)
    }
}

impl Retryable for monitor_core::Error {
    fn is_retryable(&self) -> bool {
        monitor_core::Error::is_retryable(self)
    }
}

/// Produces the random part of a backoff, given the retry number.
pub type JitterFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Attempt budget and backoff schedule.
///
/// Retry `n` (1-based) waits `min(base * 2^(n-1), max) + jitter(n)`, raised to
/// the error's `retry_after` when that is longer.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    jitter: JitterFn,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: Arc::new(|_| Duration::ZERO),
        }
    }

    /// Gateway policy: `max_retries + 1` attempts with clock-seeded jitter.
    pub fn from_config(config: &RetryConfig) -> Self {
        let jitter_ms = config.jitter_ms;
        Self::new(
            config.max_retries.saturating_add(1),
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
        .with_jitter(Arc::new(move |_| Duration::from_millis(rand_jitter(jitter_ms))))
    }

    pub fn with_jitter(mut self, jitter: JitterFn) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff before retry `retry` (1-based), jitter included.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        delay.saturating_add((self.jitter)(retry))
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number. The
    /// last error is returned on exhaustion.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() || attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    let mut backoff = self.delay_for(attempt);
                    if let Some(floor) = e.retry_after() {
                        backoff = backoff.max(floor);
                    }
                    warn!(
                        operation = what,
                        attempt = attempt,
                        backoff_ms = %backoff.as_millis(),
                        error = %e,
                        "Retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    use std::time::SystemTime;
    let seed = u64::from(
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos(),
    );
    seed % max_ms.saturating_add(1)
}
