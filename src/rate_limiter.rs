//! Minimum-delay rate limiting for source calls
//!
//! The RateLimiter spaces outbound calls to the extraction source so that two calls
//! never start closer together than the configured minimum delay. It is shared by every
//! worker of a phase, so parallel sessions are paced as one stream of calls.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Shared minimum-delay limiter
///
/// # Algorithm
///
/// - `delay = max(0, min_delay - (now - last_call))`
/// - `last_call` is set *after* the wait completes, so back-to-back callers are spaced
///   by exactly `min_delay` no matter how long the caller's own work took
/// - The first call never waits
///
/// The internal lock is held across the sleep, which serializes concurrent waiters.
#[derive(Clone)]
pub struct RateLimiter {
    min_delay: Duration,
    state: Arc<Mutex<LimiterState>>,
}

#[derive(Debug, Default)]
struct LimiterState {
    last_call: Option<Instant>,
    request_count: u64,
    total_delay: Duration,
}

/// Rate limiter counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterStats {
    /// Calls that passed through `wait()` since the last reset
    pub request_count: u64,
    /// Time spent waiting since the last reset, in milliseconds
    pub total_delay_ms: u64,
    /// Configured minimum delay, in milliseconds
    pub min_delay_ms: u64,
}

impl RateLimiter {
    /// Create a limiter with the given minimum spacing
    ///
    /// # Examples
    ///
    /// ```
    /// use federation_import::rate_limiter::RateLimiter;
    /// use std::time::Duration;
    ///
    /// let limiter = RateLimiter::new(Duration::from_millis(500));
    /// assert_eq!(limiter.min_delay(), Duration::from_millis(500));
    /// ```
    #[must_use]
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            state: Arc::new(Mutex::new(LimiterState::default())),
        }
    }

    /// Configured minimum delay
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Wait until the next call is allowed
    ///
    /// Returns the time actually spent waiting.
    pub async fn wait(&self) -> Duration {
        let mut state = self.state.lock().await;

        let delay = match state.last_call {
            Some(last) => self.min_delay.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        };

        if !delay.is_zero() {
            tracing::trace!(delay_ms = delay.as_millis() as u64, "Rate limiting source call");
            tokio::time::sleep(delay).await;
        }

        state.last_call = Some(Instant::now());
        state.request_count += 1;
        state.total_delay += delay;
        delay
    }

    /// Clear the counters for a fresh phase
    ///
    /// The time of the last call is kept, so a reset never lets a call through early.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.request_count = 0;
        state.total_delay = Duration::ZERO;
    }

    /// Current counters
    pub async fn stats(&self) -> RateLimiterStats {
        let state = self.state.lock().await;
        RateLimiterStats {
            request_count: state.request_count,
            total_delay_ms: state.total_delay.as_millis() as u64,
            min_delay_ms: self.min_delay.as_millis() as u64,
        }
    }
}
