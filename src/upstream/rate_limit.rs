//! Per-upstream token-bucket admission control.
//!
//! # Algorithm
//!
//! - The bucket holds up to `capacity` tokens and refills continuously at
//!   `refill_per_sec`. The level is recomputed lazily from elapsed time on
//!   every call; nothing ticks in the background.
//! - [`RateLimiter::acquire`] takes a token immediately when one is free
//!   and nobody is queued. Otherwise the caller joins a FIFO queue.
//! - A single drain task per limiter sleeps until the level reaches one
//!   token, releases the queue head, and keeps going until the queue is
//!   empty. Waiters never poll on their own.
//!
//! The limiter only delays; it never rejects. A waiter whose future is
//! dropped before release is skipped without consuming a token.
//!
//! ```text
//!  acquire() ──► refill ──► queue empty && level ≥ 1 ? ──yes──► level -= 1
//!                                 │ no
//!                                 ▼
//!                 push_back(waiter) ──► drain task: sleep (1-level)/rate
//!                                             │
//!                                             └─► pop_front, level -= 1, repeat
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::telemetry;
use crate::{MimirError, Result};

/// Bucket parameters.
///
/// ```rust
/// # use mimir::upstream::rate_limit::RateLimit;
/// let limit = RateLimit::per_second(10);
/// assert_eq!(limit.capacity, 10);
/// assert!(limit.validate().is_ok());
/// assert!(RateLimit::new(0, 1.0).validate().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
pub struct RateLimit {
    /// Maximum burst size; at least 1.
    pub capacity: u32,
    /// Tokens added per second; finite and positive.
    pub refill_per_sec: f64,
}

impl RateLimit {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
        }
    }

    /// Burst of `n`, refilled at `n` tokens per second.
    pub fn per_second(n: u32) -> Self {
        Self::new(n, f64::from(n))
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity < 1 {
            return Err(MimirError::Configuration(
                "rate limit capacity must be at least 1".to_string(),
            ));
        }
        if !self.refill_per_sec.is_finite() || self.refill_per_sec <= 0.0 {
            return Err(MimirError::Configuration(format!(
                "rate limit refill rate must be positive, got {}",
                self.refill_per_sec
            )));
        }
        Ok(())
    }
}

struct BucketState {
    level: f64,
    last_refill: Instant,
    waiters: VecDeque<oneshot::Sender<()>>,
    /// Whether a drain task is currently scheduled.
    draining: bool,
}

impl BucketState {
    fn refill(&mut self, limit: &RateLimit, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.level = (self.level + elapsed * limit.refill_per_sec).min(f64::from(limit.capacity));
        self.last_refill = now;
    }

    fn prune_cancelled(&mut self) {
        self.waiters.retain(|w| !w.is_closed());
    }

    /// Saturates at [`Duration::MAX`] for refill rates too slow to express.
    fn time_until_token(&self, limit: &RateLimit) -> Duration {
        let missing = (1.0 - self.level).max(0.0);
        Duration::try_from_secs_f64(missing / limit.refill_per_sec).unwrap_or(Duration::MAX)
    }
}

struct Inner {
    name: String,
    limit: RateLimit,
    state: Mutex<BucketState>,
}

/// Token-bucket limiter for one upstream.
///
/// Cheap to clone; clones share the same bucket.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    /// Create a full bucket. Rejects `capacity < 1` and non-positive refill.
    pub fn new(name: impl Into<String>, limit: RateLimit) -> Result<Self> {
        limit.validate()?;
        let state = BucketState {
            level: f64::from(limit.capacity),
            last_refill: Instant::now(),
            waiters: VecDeque::new(),
            draining: false,
        };
        Ok(Self {
            inner: Arc::new(Inner {
                name: name.into(),
                limit,
                state: Mutex::new(state),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn limit(&self) -> RateLimit {
        self.inner.limit
    }

    /// Wait until a token has been reserved for the caller.
    pub async fn acquire(&self) {
        loop {
            let released = {
                let mut state = self.inner.state.lock();
                state.refill(&self.inner.limit, Instant::now());
                state.prune_cancelled();
                if state.waiters.is_empty() && state.level >= 1.0 {
                    state.level -= 1.0;
                    return;
                }

                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                if !state.draining {
                    state.draining = true;
                    tokio::spawn(drain(Arc::clone(&self.inner)));
                }
                debug!(
                    upstream = %self.inner.name,
                    queued = state.waiters.len(),
                    level = state.level,
                    "rate limit reached, queueing"
                );
                rx
            };

            metrics::counter!(telemetry::RATE_LIMIT_WAITS_TOTAL, "upstream" => self.inner.name.clone())
                .increment(1);

            if released.await.is_ok() {
                return;
            }
            // Dropped without a release is not an admission; queue again.
        }
    }

    /// Take a token if one is free right now, without waiting or jumping
    /// ahead of queued callers.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.inner.state.lock();
        state.refill(&self.inner.limit, Instant::now());
        state.prune_cancelled();
        if state.waiters.is_empty() && state.level >= 1.0 {
            state.level -= 1.0;
            true
        } else {
            false
        }
    }

    /// Refill to capacity and release every queued waiter without charging
    /// them a token.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        state.level = f64::from(self.inner.limit.capacity);
        state.last_refill = Instant::now();
        let released = state.waiters.len();
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(());
        }
        debug!(upstream = %self.inner.name, released, "rate limiter reset");
    }

    /// Current token level after lazy refill.
    pub fn available(&self) -> f64 {
        let mut state = self.inner.state.lock();
        state.refill(&self.inner.limit, Instant::now());
        state.level
    }

    /// Number of callers waiting for a token.
    pub fn queued(&self) -> usize {
        let mut state = self.inner.state.lock();
        state.prune_cancelled();
        state.waiters.len()
    }
}

/// Clears `draining` when a drain task ends without doing so itself
/// (runtime shutdown, panic), so the next `acquire` schedules a new one.
struct DrainGuard {
    inner: Arc<Inner>,
    armed: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if self.armed {
            self.inner.state.lock().draining = false;
        }
    }
}

/// Release queued waiters in order as tokens become available.
async fn drain(inner: Arc<Inner>) {
    let mut guard = DrainGuard {
        inner: Arc::clone(&inner),
        armed: true,
    };
    loop {
        let wait = {
            let mut state = inner.state.lock();
            state.refill(&inner.limit, Instant::now());
            while state.level >= 1.0 {
                let Some(waiter) = state.waiters.pop_front() else {
                    break;
                };
                // A dropped receiver means the caller gave up; keep the token.
                if waiter.send(()).is_ok() {
                    state.level -= 1.0;
                }
            }
            state.prune_cancelled();
            if state.waiters.is_empty() {
                state.draining = false;
                guard.armed = false;
                return;
            }
            state.time_until_token(&inner.limit)
        };
        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_limits() {
        assert!(RateLimiter::new("t", RateLimit::new(0, 1.0)).is_err());
        assert!(RateLimiter::new("t", RateLimit::new(1, 0.0)).is_err());
        assert!(RateLimiter::new("t", RateLimit::new(1, -2.0)).is_err());
        assert!(RateLimiter::new("t", RateLimit::new(1, f64::NAN)).is_err());
        assert!(RateLimiter::new("t", RateLimit::new(1, f64::INFINITY)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn level_never_exceeds_capacity() {
        let limiter = RateLimiter::new("t", RateLimit::new(3, 100.0)).unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.available(), 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn try_acquire_drains_then_refills() {
        let limiter = RateLimiter::new("t", RateLimit::new(2, 4.0)).unwrap();
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn time_until_token_saturates_for_tiny_refill() {
        let limit = RateLimit::new(1, 1e-20);
        let state = BucketState {
            level: 0.0,
            last_refill: Instant::now(),
            waiters: VecDeque::new(),
            draining: false,
        };
        assert_eq!(state.time_until_token(&limit), Duration::MAX);

        let state = BucketState { level: 0.5, ..state };
        let limit = RateLimit::new(1, 2.0);
        assert_eq!(state.time_until_token(&limit), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn tiny_refill_rate_keeps_waiter_queued_without_admitting() {
        let limiter = RateLimiter::new("slow", RateLimit::new(1, 1e-20)).unwrap();
        limiter.acquire().await;

        let waiter = tokio::spawn({
            let limiter = limiter.clone();
            async move { limiter.acquire().await }
        });
        while limiter.queued() == 0 {
            tokio::task::yield_now().await;
        }

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(!waiter.is_finished());
        assert_eq!(limiter.queued(), 1);
        assert!(limiter.inner.state.lock().draining);

        limiter.reset();
        waiter.await.unwrap();
    }

    #[test]
    fn drain_guard_clears_flag_unless_disarmed() {
        let limiter = RateLimiter::new("t", RateLimit::new(1, 1.0)).unwrap();

        limiter.inner.state.lock().draining = true;
        drop(DrainGuard {
            inner: Arc::clone(&limiter.inner),
            armed: true,
        });
        assert!(!limiter.inner.state.lock().draining);

        limiter.inner.state.lock().draining = true;
        drop(DrainGuard {
            inner: Arc::clone(&limiter.inner),
            armed: false,
        });
        assert!(limiter.inner.state.lock().draining);
    }
}
