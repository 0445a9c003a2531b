//! Error types for registry-scraper
//!
//! This module provides the error taxonomy for the batch engine:
//! - Fatal input validation errors (no artifact, non-zero exit)
//! - Per-request transport and serialization errors
//! - CAPTCHA-solving errors, split by whether the solver failed or timed out
//!
//! Per-file fetch problems are deliberately *not* errors at the engine level:
//! they are absorbed into the run's results as failed attempts (see
//! [`crate::types::FetchOutcome`]) and never abort the batch. Only the
//! blocking detector's threshold policy may abort a run.

use thiserror::Error;

/// Result type alias for registry-scraper operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for registry-scraper
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing input (fatal; the run produces no artifact)
    #[error("validation error: {message}")]
    Validation {
        /// Human-readable description of the invalid input
        message: String,
        /// The input key that caused the error (e.g., "FILE_NUMBERS")
        key: Option<String>,
    },

    /// Network error from the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// CAPTCHA-solving error
    #[error("captcha error: {0}")]
    Captcha(#[from] CaptchaError),

    /// I/O error (artifact writing)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed URL in configuration
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Convenience constructor for validation errors
    pub fn validation(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Errors from the CAPTCHA-solving capability
///
/// The solver is a black-box external API. `Unsolvable` is the variant the
/// fetch worker maps to a `Blocked` outcome; the others indicate solver-side
/// trouble rather than anti-bot blocking.
#[derive(Debug, Error)]
pub enum CaptchaError {
    /// The solving service reported it cannot solve the challenge
    #[error("captcha unsolvable: {0}")]
    Unsolvable(String),

    /// The solve did not complete within the configured deadline
    #[error("captcha solve timed out after {seconds}s")]
    Timeout {
        /// Deadline that was exceeded
        seconds: u64,
    },

    /// The solving API rejected the request (bad key, zero balance, etc.)
    #[error("captcha API error: {0}")]
    Api(String),

    /// Transport failure talking to the solving API
    #[error("captcha transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = Error::validation("file number list is empty", "FILE_NUMBERS");
        assert_eq!(
            err.to_string(),
            "validation error: file number list is empty"
        );
        match err {
            Error::Validation { key, .. } => assert_eq!(key.as_deref(), Some("FILE_NUMBERS")),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_captcha_error_converts_into_error() {
        let err: Error = CaptchaError::Timeout { seconds: 120 }.into();
        assert_eq!(
            err.to_string(),
            "captcha error: captcha solve timed out after 120s"
        );
    }
}
