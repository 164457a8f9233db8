use std::{future::Future, time::Duration};

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{common::errors::NetError, configs::RetryConfig};

/// Transient-vs-fatal classification plus exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Disable the random spread added to each delay.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `error` on the zero-based `attempt` warrants another try.
    pub fn should_retry(&self, error: &NetError, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts && !error.is_cancelled() && error.is_retryable()
    }

    /// Delay before retry number `attempt + 1`: base × 2^attempt, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        // Up to +25% so concurrent sessions do not retry in lockstep.
        let spread = delay.as_millis() as u64 / 4;
        let extra = rand::thread_rng().gen_range(0..=spread);
        (delay + Duration::from_millis(extra)).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent.
    ///
    /// `op` receives the zero-based attempt number. Cancellation is checked
    /// before every attempt and during every backoff sleep.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T, NetError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, NetError>>,
    {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(NetError::Cancelled);
            }

            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if error.is_cancelled() {
                debug!("Retry loop stopped by cancellation");
                return Err(error);
            }

            if !error.is_retryable() {
                return Err(error);
            }

            if !self.should_retry(&error, attempt) {
                return Err(NetError::RetryExhausted {
                    attempts: attempt + 1,
                    source: Box::new(error),
                });
            }

            let delay = self.backoff_delay(attempt);
            warn!(
                "Attempt {}/{} failed: {}. Retrying in {:?}",
                attempt + 1,
                self.max_attempts,
                error,
                delay
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(NetError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

/// Stateful backoff counter for loops that manage their own attempts.
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub fn next(&mut self) -> Duration {
        let delay = self.policy.backoff_delay(self.attempt);
        self.attempt += 1;
        delay
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt + 1 >= self.policy.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
