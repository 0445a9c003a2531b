//! CAPTCHA-solving API client
//!
//! Thin client for a 2captcha-compatible solving service: submit the
//! challenge (`in.php`), then poll for the solution (`res.php`) until it is
//! ready or the configured deadline passes. The client enforces its own
//! deadline and is never retried by the fetch worker; an unsolvable or
//! timed-out challenge is what the worker maps to a `Blocked` outcome.

use crate::config::CaptchaConfig;
use crate::error::CaptchaError;
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, warn};

/// Response envelope used by both `in.php` and `res.php` in JSON mode
#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: u8,
    request: String,
}

/// Client for a reCAPTCHA-solving service
#[derive(Debug, Clone)]
pub struct CaptchaSolver {
    config: CaptchaConfig,
    client: reqwest::Client,
}

impl CaptchaSolver {
    /// Create a solver that shares the given HTTP client
    pub fn new(config: CaptchaConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Solve a reCAPTCHA for the given site key and page URL
    ///
    /// Returns the response token on success. Polls the service at the
    /// configured interval until the solve completes or the deadline passes.
    pub async fn solve_recaptcha(
        &self,
        site_key: &str,
        page_url: &str,
    ) -> Result<String, CaptchaError> {
        let task_id = self.submit(site_key, page_url).await?;
        debug!(task_id = %task_id, "Captcha task submitted, polling for solution");

        let deadline = Instant::now() + self.config.solve_deadline;
        loop {
            tokio::time::sleep(self.config.poll_interval).await;

            if Instant::now() >= deadline {
                warn!(task_id = %task_id, "Captcha solve deadline exceeded");
                return Err(CaptchaError::Timeout {
                    seconds: self.config.solve_deadline.as_secs(),
                });
            }

            match self.poll(&task_id).await? {
                Some(token) => {
                    debug!(task_id = %task_id, "Captcha solved");
                    return Ok(token);
                }
                None => {
                    debug!(task_id = %task_id, "Captcha not ready yet");
                }
            }
        }
    }

    async fn submit(&self, site_key: &str, page_url: &str) -> Result<String, CaptchaError> {
        let url = format!(
            "{}/in.php?key={}&method=userrecaptcha&googlekey={}&pageurl={}&json=1",
            self.config.base_url,
            urlencoding::encode(&self.config.api_key),
            urlencoding::encode(site_key),
            urlencoding::encode(page_url),
        );

        let response: ApiResponse = self.client.post(&url).send().await?.json().await?;
        if response.status != 1 {
            return Err(classify_api_error(&response.request));
        }
        Ok(response.request)
    }

    /// Poll for a solution; `Ok(None)` means the solve is still pending
    async fn poll(&self, task_id: &str) -> Result<Option<String>, CaptchaError> {
        let url = format!(
            "{}/res.php?key={}&action=get&id={}&json=1",
            self.config.base_url,
            urlencoding::encode(&self.config.api_key),
            urlencoding::encode(task_id),
        );

        let response: ApiResponse = self.client.get(&url).send().await?.json().await?;
        if response.status == 1 {
            return Ok(Some(response.request));
        }
        if response.request == "CAPCHA_NOT_READY" {
            return Ok(None);
        }
        Err(classify_api_error(&response.request))
    }
}

/// Map a service error code to the right error variant
fn classify_api_error(code: &str) -> CaptchaError {
    if code.contains("UNSOLVABLE") {
        CaptchaError::Unsolvable(code.to_string())
    } else {
        CaptchaError::Api(code.to_string())
    }
}
