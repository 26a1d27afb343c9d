//! Retry policy, delay calculation, and the retry executor.
//!
//! [`RetryPolicy::run`] wraps one asynchronous operation with bounded
//! retries and exponential backoff. Classification is structural:
//!
//! - transport failures ([`MimirError::Transport`]) are always retried;
//! - errors carrying an HTTP status are retried iff the status is in
//!   [`RetryPolicy::retryable_statuses`];
//! - everything else fails immediately.
//!
//! Instead of a side-effecting callback, every scheduled retry is recorded
//! in a [`RetryHistory`] returned by [`RetryPolicy::run_with_history`].

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::telemetry;
use crate::{MimirError, Result};

/// Status codes retried by default: request timeout, too many requests,
/// and the transient 5xx family.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Maximum relative jitter applied to a computed delay (±25%).
const JITTER_FRACTION: f64 = 0.25;

/// Configuration for retry behaviour on transient errors.
///
/// ```rust
/// # use mimir::upstream::retry::RetryPolicy;
/// # use std::time::Duration;
/// let policy = RetryPolicy::new()
///     .max_retries(5)
///     .initial_delay(Duration::from_millis(200))
///     .jitter(false);
/// assert_eq!(policy.total_attempts(), 6);
/// assert_eq!(policy.base_delay(2), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt. 0 = no retry. Default: 3.
    pub max_retries: u32,
    /// Delay before the first retry. Default: 1s.
    pub initial_delay: Duration,
    /// Cap on any computed delay. Default: 10s.
    pub max_delay: Duration,
    /// Growth factor per attempt. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Perturb delays by up to ±25%. Default: true.
    pub jitter: bool,
    /// HTTP statuses considered transient.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single attempt, no retry.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Policy for credential exchange: more attempts, longer waits.
    pub fn patient() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            ..Self::default()
        }
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    pub fn retryable_statuses(mut self, statuses: impl Into<Vec<u16>>) -> Self {
        self.retryable_statuses = statuses.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 0.0 {
            return Err(MimirError::Configuration(format!(
                "backoff multiplier must be positive, got {}",
                self.backoff_multiplier
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(MimirError::Configuration(
                "initial retry delay exceeds max delay".to_string(),
            ));
        }
        Ok(())
    }

    /// Total attempts including the first.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether `err` should be retried under this policy.
    pub fn is_retryable(&self, err: &MimirError) -> bool {
        if err.is_transport() {
            return true;
        }
        err.http_status()
            .is_some_and(|status| self.retryable_statuses.contains(&status))
    }

    /// Delay after failed attempt `attempt` (1-indexed), before jitter:
    /// `min(max_delay, initial_delay * multiplier^(attempt - 1))`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// Delay to wait after `attempt` failed with `err`.
    ///
    /// A `Retry-After` hint from the upstream replaces the backoff (capped at
    /// `max_delay`, no jitter).
    pub fn delay_for(&self, attempt: u32, err: &MimirError) -> Duration {
        if let Some(hint) = err.retry_after() {
            return hint.min(self.max_delay);
        }
        let base = self.base_delay(attempt);
        if self.jitter {
            apply_jitter(base, rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION))
        } else {
            base
        }
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out.
    pub async fn run<F, Fut, T>(&self, upstream: &str, operation: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with_history(upstream, operation, op).await.result
    }

    /// Like [`run`](Self::run), also returning every scheduled retry.
    pub async fn run_with_history<F, Fut, T>(
        &self,
        upstream: &str,
        operation: &str,
        mut op: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut history = RetryHistory::default();
        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        history,
                    };
                }
                Err(e) => e,
            };

            if !self.is_retryable(&err) || attempt >= self.total_attempts() {
                return RetryOutcome {
                    result: Err(err),
                    history,
                };
            }

            let delay = self.delay_for(attempt, &err);
            metrics::counter!(telemetry::RETRIES_TOTAL,
                "upstream" => upstream.to_owned(),
                "operation" => operation.to_owned(),
            )
            .increment(1);
            warn!(
                upstream,
                operation,
                attempt,
                max_attempts = self.total_attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after transient error"
            );
            history.attempts.push(RetryAttempt {
                attempt,
                error: err,
                delay,
            });

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Scale `delay` by `1 + factor`, never going below zero.
fn apply_jitter(delay: Duration, factor: f64) -> Duration {
    let secs = (delay.as_secs_f64() * (1.0 + factor)).max(0.0);
    Duration::try_from_secs_f64(secs).unwrap_or(delay)
}

/// One failed attempt that was followed by a retry.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    /// 1-indexed attempt that failed.
    pub attempt: u32,
    pub error: MimirError,
    /// Wait scheduled before the next attempt.
    pub delay: Duration,
}

/// Retries scheduled during one invocation, in order.
#[derive(Debug, Clone, Default)]
pub struct RetryHistory {
    pub attempts: Vec<RetryAttempt>,
}

impl RetryHistory {
    pub fn retries(&self) -> usize {
        self.attempts.len()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.attempts.iter().map(|a| a.delay).collect()
    }
}

/// Result of [`RetryPolicy::run_with_history`].
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub history: RetryHistory,
}

impl<T> RetryOutcome<T> {
    /// Total attempts made: retries plus the final attempt.
    pub fn attempts(&self) -> usize {
        self.history.retries() + 1
    }
}
