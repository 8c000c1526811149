//! Provider retries with capped, jittered backoff.
//!
//! [`with_backoff`] drives a fallible async operation. Failures classified as
//! fatal by [`Retryable::is_fatal`] propagate after the first attempt;
//! everything else is retried until [`RetryConfig::max_attempts`] is spent.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Fatal/transient classification consumed by [`with_backoff`].
pub trait Retryable {
    /// `true` when retrying the same request cannot succeed.
    fn is_fatal(&self) -> bool;
}

/// Wait schedule between provider attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same pause before every retry.
    Fixed { delay: Duration },
    /// `base * factor^n` before retry `n`, never above `max`.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        /// Spread each pause uniformly over 50%..150% of its nominal value.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::doubling(Duration::from_millis(500))
    }
}

impl Backoff {
    /// Doubling from `base` with jitter, capped at 16x the base.
    pub fn doubling(base: Duration) -> Self {
        Self::Exponential {
            base,
            factor: 2.0,
            max: base.saturating_mul(16),
            jitter: true,
        }
    }

    /// Pause before retry number `retry` (0-based).
    pub fn delay(self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
                let seconds = (base.as_secs_f64() * factor.powi(exponent)).min(max.as_secs_f64());
                let nominal = Duration::from_secs_f64(seconds.max(0.0));
                if jitter {
                    spread(nominal)
                } else {
                    nominal
                }
            }
        }
    }
}

fn spread(nominal: Duration) -> Duration {
    let nominal_ms = u64::try_from(nominal.as_millis()).unwrap_or(u64::MAX);
    let offset = fastrand::u64(0..=nominal_ms);
    Duration::from_millis((nominal_ms / 2).saturating_add(offset))
}

/// Attempt budget and wait schedule for one provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one. Values below 1 act as 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryConfig {
    /// Exponential doubling from `base_delay` with jitter.
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::doubling(base_delay),
        }
    }

    /// Fixed delay between attempts.
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed { delay },
        }
    }

    /// A single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Calculate the delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

/// Run `op` until it succeeds, fails fatally, or the attempt budget is spent.
///
/// The last error is returned on exhaustion. Sleeping only suspends the
/// calling task.
pub async fn with_backoff<T, E, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_fatal() => {
                debug!(attempt, %error, "fatal error, not retrying");
                return Err(error);
            }
            Err(error) if attempt >= max_attempts => {
                warn!(attempt, %error, "retry budget exhausted");
                return Err(error);
            }
            Err(error) => {
                let delay = config.delay_for_attempt(attempt - 1);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "transient error, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
