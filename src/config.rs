//! Configuration types for registry-scraper
//!
//! All runtime configuration arrives via environment variables (the engine is
//! scheduled by an external Runner that supplies the environment and collects
//! artifacts; there are no positional CLI arguments). The batch input itself
//! (`FILE_NUMBERS`, `REQUEST_ID`) is not part of [`Config`] — it is parsed
//! into a [`crate::types::BatchRequest`] by [`crate::request`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Registry portal settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the registry search endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout for registry lookups (default: 30s)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// User agent presented to the portal
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// CAPTCHA-solving service settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptchaConfig {
    /// API key for the solving service
    pub api_key: String,

    /// Base URL of the solving API (default: 2captcha)
    #[serde(default = "default_captcha_base_url")]
    pub base_url: String,

    /// How long to wait for a solve before giving up (default: 120s)
    #[serde(default = "default_solve_deadline")]
    pub solve_deadline: Duration,

    /// Interval between polls for a pending solve (default: 5s)
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,
}

impl CaptchaConfig {
    /// Build a config with the given API key and all defaults
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: default_captcha_base_url(),
            solve_deadline: default_solve_deadline(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// Pacing between sequential lookups
///
/// Deliberate, non-bursty pacing is the first line of anti-bot avoidance.
/// A base delay plus uniform random jitter is applied before every lookup
/// after the first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Base delay between lookups (default: 2s)
    #[serde(default = "default_pacing_delay")]
    pub delay: Duration,

    /// Maximum additional random jitter (default: 1s)
    #[serde(default = "default_pacing_jitter")]
    pub max_jitter: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            delay: default_pacing_delay(),
            max_jitter: default_pacing_jitter(),
        }
    }
}

/// Retry behavior for transient per-request failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retry attempts after the initial try (default: 2)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay (default: 1s)
    #[serde(default = "default_initial_delay")]
    pub initial_delay: Duration,

    /// Upper bound on the backoff delay (default: 15s)
    #[serde(default = "default_max_delay")]
    pub max_delay: Duration,

    /// Backoff multiplier applied after each failed attempt (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether to add random jitter to backoff delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for the batch engine
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Registry portal settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// CAPTCHA-solving service settings
    pub captcha: CaptchaConfig,

    /// Pacing between sequential lookups
    #[serde(default)]
    pub pacing: PacingConfig,

    /// Retry behavior for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Consecutive `Blocked` outcomes that abort the batch (default: 2)
    #[serde(default = "default_blocked_threshold")]
    pub blocked_threshold: u32,

    /// Directory artifacts are written to (default: current directory)
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Config {
    /// Load configuration from the environment
    ///
    /// `CAPTCHA_API_KEY` is required; everything else falls back to defaults:
    /// `REGISTRY_BASE_URL`, `BLOCKED_THRESHOLD`, `PACING_MS`, `OUTPUT_DIR`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("CAPTCHA_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::validation("CAPTCHA_API_KEY is not set", "CAPTCHA_API_KEY"))?;

        let mut config = Self {
            registry: RegistryConfig::default(),
            captcha: CaptchaConfig::with_api_key(api_key),
            pacing: PacingConfig::default(),
            retry: RetryConfig::default(),
            blocked_threshold: default_blocked_threshold(),
            output_dir: default_output_dir(),
        };

        if let Ok(base_url) = std::env::var("REGISTRY_BASE_URL") {
            if !base_url.trim().is_empty() {
                config.registry.base_url = base_url;
            }
        }

        if let Ok(raw) = std::env::var("BLOCKED_THRESHOLD") {
            let threshold: u32 = raw.trim().parse().map_err(|_| {
                Error::validation(
                    format!("BLOCKED_THRESHOLD must be a positive integer, got {raw:?}"),
                    "BLOCKED_THRESHOLD",
                )
            })?;
            if threshold == 0 {
                return Err(Error::validation(
                    "BLOCKED_THRESHOLD must be at least 1",
                    "BLOCKED_THRESHOLD",
                ));
            }
            config.blocked_threshold = threshold;
        }

        if let Ok(raw) = std::env::var("PACING_MS") {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                Error::validation(
                    format!("PACING_MS must be an integer number of milliseconds, got {raw:?}"),
                    "PACING_MS",
                )
            })?;
            config.pacing.delay = Duration::from_millis(millis);
        }

        if let Ok(dir) = std::env::var("OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                config.output_dir = PathBuf::from(dir);
            }
        }

        Ok(config)
    }
}

fn default_base_url() -> String {
    "https://registry.example.gov/search".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("registry-scraper/{}", env!("CARGO_PKG_VERSION"))
}

fn default_captcha_base_url() -> String {
    "https://2captcha.com".to_string()
}

fn default_solve_deadline() -> Duration {
    Duration::from_secs(120)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_pacing_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_pacing_jitter() -> Duration {
    Duration::from_secs(1)
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(15)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_blocked_threshold() -> u32 {
    2
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}
