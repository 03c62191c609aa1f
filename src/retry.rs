//! Retry logic with exponential backoff
//!
//! This module classifies errors as transient or permanent and retries transient ones.
//! Ordinary transient failures back off exponentially (`base * 2^(attempt-1)`); while the
//! source is known to be completely unreachable ("full outage") every wait is a fixed,
//! much longer delay instead. Every wait can be interrupted by the run's cancellation
//! token.
//!
//! # Example
//!
//! ```no_run
//! use federation_import::retry::{RetryManager, RetryOptions};
//! use federation_import::config::RetryConfig;
//! use federation_import::Error;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Error> {
//! let retry = RetryManager::new(RetryConfig::default());
//! let cancel = CancellationToken::new();
//! let page = retry
//!     .execute(|| async { Ok::<_, Error>(vec![1, 2, 3]) }, RetryOptions::new(&cancel))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Message fragments that mark an error as transient
///
/// Matched case-insensitively against the error message.
pub const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "econnrefused",
    "connection refused",
    "econnreset",
    "connection reset",
    "socket hang up",
    "502",
    "503",
    "504",
    "enotfound",
    "eai_again",
    "dns",
];

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, refused/reset connections, gateway errors, DNS) should
/// return `true`. Permanent failures (bad markup, not found, auth) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

/// Whether an error message matches one of the [`TRANSIENT_PATTERNS`]
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Source and untyped errors are classified by message
            Error::Source(msg) | Error::Other(msg) => is_transient_message(msg),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            // Cancellation and timeout must stop the run, never loop
            Error::Cancelled | Error::Timeout { .. } => false,
            Error::PhaseFatal { .. } => false,
            Error::Database(_) | Error::Sqlx(_) => false,
            Error::Config { .. } => false,
            Error::AlreadyRunning { .. } | Error::NotRunning | Error::TimerNotStarted => false,
            Error::Serialization(_) => false,
            Error::NotFound(_) => false,
        }
    }
}

/// Per-call retry options
#[derive(Clone, Copy)]
pub struct RetryOptions<'a> {
    /// Token that interrupts pending back-off waits
    pub cancel: &'a CancellationToken,
    /// Use the fixed full-outage delay instead of exponential backoff
    pub full_outage: bool,
    /// Override the configured total attempts
    pub max_attempts: Option<u32>,
}

impl<'a> RetryOptions<'a> {
    /// Default options bound to a cancellation token
    pub fn new(cancel: &'a CancellationToken) -> Self {
        Self {
            cancel,
            full_outage: false,
            max_attempts: None,
        }
    }

    /// Set full-outage mode
    pub fn full_outage(mut self, full_outage: bool) -> Self {
        self.full_outage = full_outage;
        self
    }

    /// Override total attempts
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Retry counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryMetrics {
    /// Every call of an operation, first tries included
    pub total_attempts: u64,
    /// Operations that failed at least once and then succeeded
    pub successful_retries: u64,
    /// Operations that exhausted their attempts or hit a permanent error
    pub failed_operations: u64,
}

/// Executes operations with classification-aware retries
///
/// Safe to share between concurrent workers; the counters are atomic.
pub struct RetryManager {
    config: RetryConfig,
    total_attempts: AtomicU64,
    successful_retries: AtomicU64,
    failed_operations: AtomicU64,
}

impl RetryManager {
    /// Create a manager from configuration
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            total_attempts: AtomicU64::new(0),
            successful_retries: AtomicU64::new(0),
            failed_operations: AtomicU64::new(0),
        }
    }

    /// Configured default total attempts
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay to wait after a failed `attempt` (1-based)
    ///
    /// `base * 2^(attempt-1)` normally, the fixed full-outage delay otherwise.
    pub fn delay_for_attempt(&self, attempt: u32, full_outage: bool) -> Duration {
        if full_outage {
            return self.config.full_outage_delay;
        }
        let exponent = attempt.saturating_sub(1).min(31);
        self.config.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Run `operation` until it succeeds, fails permanently, runs out of attempts, or the
    /// token fires
    ///
    /// # Errors
    ///
    /// - The operation's own error once attempts are exhausted or it is permanent
    /// - [`Error::Cancelled`] if the token fires before an attempt or during a wait
    pub async fn execute<F, Fut, T>(&self, mut operation: F, options: RetryOptions<'_>) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = options.max_attempts.unwrap_or(self.config.max_attempts).max(1);
        let mut attempt = 0u32;

        loop {
            if options.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            attempt += 1;
            self.total_attempts.fetch_add(1, Ordering::Relaxed);

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        self.successful_retries.fetch_add(1, Ordering::Relaxed);
                        tracing::info!(attempts = attempt, "Operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for_attempt(attempt, options.full_outage);

                    tracing::warn!(
                        error = %e,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        full_outage = options.full_outage,
                        "Operation failed, retrying"
                    );

                    tokio::select! {
                        _ = options.cancel.cancelled() => {
                            tracing::info!(attempt, "Retry wait interrupted by cancellation");
                            return Err(Error::Cancelled);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    if e.is_cancelled() {
                        return Err(e);
                    }
                    self.failed_operations.fetch_add(1, Ordering::Relaxed);
                    if e.is_retryable() {
                        tracing::error!(
                            error = %e,
                            attempts = attempt,
                            "Operation failed after all retry attempts exhausted"
                        );
                    } else {
                        tracing::error!(error = %e, "Operation failed with non-retryable error");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Current counters
    pub fn metrics(&self) -> RetryMetrics {
        RetryMetrics {
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
            successful_retries: self.successful_retries.load(Ordering::Relaxed),
            failed_operations: self.failed_operations.load(Ordering::Relaxed),
        }
    }
}
