use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

use super::client::ApiError;

/// Remote statuses that signal quota or transient trouble.
/// 402 payment required, 408 request timeout, 503 unavailable, 504 gateway timeout.
pub const RETRY_RESPONSE_CODES: [u16; 4] = [402, 408, 503, 504];

/// Last wait is 2^8 = 256s.
pub const BACKOFF_MAX_RETRIES: u32 = 8;

pub fn is_retryable(status: u16) -> bool {
    RETRY_RESPONSE_CODES.contains(&status)
}

/// How many attempts to make and how to wait between them.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    sleep: fn(Duration),
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(BACKOFF_MAX_RETRIES)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            sleep: std::thread::sleep,
        }
    }

    /// Same attempt budget, but never blocks.
    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            sleep: |_| {},
        }
    }

    /// Blocks the calling thread using the policy's sleeper.
    pub fn pause(&self, delay: Duration) {
        (self.sleep)(delay)
    }
}

/// Exponential backoff with jitter: wait `2^attempt` seconds plus up to one
/// second after each failure.
#[derive(Debug)]
pub struct Backoff {
    attempt: u32,
    policy: RetryPolicy,
    total_delay: Duration,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            attempt: 0,
            policy,
            total_delay: Duration::ZERO,
        }
    }

    pub fn should_continue(&self) -> bool {
        self.attempt < self.policy.max_attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn total_delay(&self) -> Duration {
        self.total_delay
    }

    pub fn delay_for(attempt: u32, jitter_ms: u64) -> Duration {
        Duration::from_secs(2u64.saturating_pow(attempt)) + Duration::from_millis(jitter_ms)
    }

    /// Records one failed attempt and blocks for the resulting delay.
    pub fn record_failure_and_wait(&mut self) -> Duration {
        self.attempt += 1;
        let jitter_ms = rand::thread_rng().gen_range(0..1000);
        let delay = Self::delay_for(self.attempt, jitter_ms);
        info!("Waiting for {:.3}s and retrying...", delay.as_secs_f64());
        self.policy.pause(delay);
        self.total_delay += delay;
        delay
    }
}

/// Outcome of a request that did not succeed under backoff.
#[derive(Debug, Error)]
pub enum BackoffError {
    /// A non-retryable failure; returned on first sight.
    #[error(transparent)]
    Failed(ApiError),
    /// Every attempt hit a retryable status.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ApiError },
}

/// Runs `request` until it succeeds, fails hard, or the retry budget is spent.
pub fn run_with_backoff<T>(
    policy: RetryPolicy,
    operation: &str,
    mut request: impl FnMut() -> Result<T, ApiError>,
) -> Result<T, BackoffError> {
    let mut backoff = Backoff::new(policy);
    let mut last_error = None;
    while backoff.should_continue() {
        match request() {
            Ok(value) => return Ok(value),
            Err(err) => match err.status() {
                Some(status) if is_retryable(status) => {
                    info!("Possible quota problem {} ({}).", operation, status);
                    last_error = Some(err);
                    backoff.record_failure_and_wait();
                }
                _ => return Err(BackoffError::Failed(err)),
            },
        }
    }
    warn!(
        "Giving up {} after {} attempts ({:.1}s spent waiting).",
        operation,
        backoff.attempts(),
        backoff.total_delay().as_secs_f64()
    );
    Err(BackoffError::Exhausted {
        attempts: backoff.attempts(),
        last: last_error.unwrap_or(ApiError::Transport(format!(
            "{} was never attempted (retry budget is zero)",
            operation
        ))),
    })
}
