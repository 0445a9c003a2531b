//! Retry logic with exponential backoff
//!
//! Transient transport failures against the registry portal are retried
//! within a single lookup, with exponential backoff and jitter. This is
//! strictly per-request plumbing: a lookup that exhausts its retries becomes
//! an ordinary per-file failure in the run results, never a batch abort.
//! CAPTCHA solves are not retried here; the solver carries its own deadline.

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets) should return `true`.
/// Permanent failures (validation, unsolvable CAPTCHA) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Solver errors are handled by the fetch worker, not retried here
            Error::Captcha(_) => false,
            Error::Validation { .. } => false,
            Error::Serialization(_) => false,
            Error::InvalidUrl(_) => false,
            Error::Other(_) => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// Returns the successful result or the last error after all retry attempts
/// are exhausted. Non-retryable errors are returned immediately.
pub async fn fetch_with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Lookup succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Lookup failed, retrying"
                );

                let jittered_delay = if config.jitter { add_jitter(delay) } else { delay };
                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                tracing::debug!(error = %e, attempts = attempt + 1, "Lookup failed, not retrying");
                return Err(e);
            }
        }
    }
}

/// Add up to 25% random jitter to a delay
fn add_jitter(delay: Duration) -> Duration {
    let jitter_range = delay.as_secs_f64() * 0.25;
    let jitter = rand::thread_rng().gen_range(0.0..=jitter_range);
    Duration::from_secs_f64(delay.as_secs_f64() + jitter)
}

/// Sleep for a pacing interval plus uniform random jitter
///
/// Used between sequential lookups to keep traffic non-bursty.
pub async fn paced_sleep(delay: Duration, max_jitter: Duration) {
    let jitter = if max_jitter.is_zero() {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=max_jitter.as_secs_f64()))
    };
    tokio::time::sleep(delay + jitter).await;
}
