// src/services/fetcher/retry.rs
use crate::env_config::models::app_config::FetcherConfig;
use crate::error::GatewayError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time;
use tracing::{debug, warn};

/// Bounded retry with exponential backoff and jitter for gateway calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound for a single attempt
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FetcherConfig, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
            attempt_timeout,
        }
    }

    /// Delay before the attempt following `attempt` (1-based), without jitter
    pub fn delay_for(&self, attempt: u32, error: &GatewayError) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let mut delay = self.base_delay.saturating_mul(1u32 << exponent);

        // Back off harder when the provider is throttling us
        if matches!(error, GatewayError::RateLimited(_)) {
            delay = delay.saturating_mul(2);
        }

        delay.min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter_cap = delay.as_millis() as u64 / 4;
        if jitter_cap == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
        (delay + Duration::from_millis(jitter)).min(self.max_delay.max(delay))
    }

    /// Runs `operation` until it succeeds, fails permanently or the attempt
    /// budget is spent. The last error is returned.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 1;
        loop {
            let result = match time::timeout(self.attempt_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Transient(format!(
                    "{} timed out after {:?}",
                    label, self.attempt_timeout
                ))),
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                warn!("{} failed permanently: {}", label, error);
                return Err(error);
            }

            if attempt >= self.max_attempts {
                warn!("{} failed after {} attempts: {}", label, attempt, error);
                return Err(error);
            }

            let delay = self.jittered(self.delay_for(attempt, &error));
            warn!(
                "{} attempt {}/{} failed: {}. Retrying in {:?}",
                label, attempt, self.max_attempts, error, delay
            );
            time::sleep(delay).await;
            attempt += 1;
        }
    }
}
