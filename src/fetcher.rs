//! Fetch worker: one registry lookup per call
//!
//! The worker performs a single file-number search against the registry
//! portal and classifies the result into exactly one [`FetchOutcome`]:
//!
//! - `Success` — the portal answered with a result page (zero matches is a
//!   legal success)
//! - `Failure` — ordinary network/parse trouble; never implies blocking
//! - `Blocked` — anti-bot interstitial, blocking status code, or a CAPTCHA
//!   challenge the solver could not clear
//!
//! If the portal serves a reCAPTCHA challenge, the worker delegates to the
//! [`CaptchaSolver`] once (the solver enforces its own deadline and is not
//! retried) and resubmits the search with the solved token. The worker has no
//! persistence side effects; recording outcomes is the engine's job.

use crate::captcha::CaptchaSolver;
use crate::config::{RegistryConfig, RetryConfig};
use crate::error::{CaptchaError, Error, Result};
use crate::retry::fetch_with_retry;
use crate::types::FetchOutcome;
use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

/// Selector for business records on the search result page
const RESULT_ROW_SELECTOR: &str = "table.search-results tbody tr";

/// Seam for the engine loop; mocked in tests
#[async_trait]
pub trait RegistryFetcher: Send + Sync {
    /// Look up one file number and classify the outcome
    async fn fetch(&self, file_number: &str) -> FetchOutcome;
}

/// HTTP implementation of the fetch worker
pub struct HttpRegistryFetcher {
    client: reqwest::Client,
    registry: RegistryConfig,
    retry: RetryConfig,
    solver: CaptchaSolver,
    row_selector: Selector,
    sitekey_pattern: Regex,
    interstitial_pattern: Regex,
}

impl HttpRegistryFetcher {
    /// Build a fetch worker with a cookie-keeping HTTP client
    ///
    /// The cookie store matters: the portal ties solved challenges to the
    /// session, and a cookie-less client would be re-challenged on every
    /// lookup.
    pub fn new(
        registry: RegistryConfig,
        retry: RetryConfig,
        solver: CaptchaSolver,
        client: reqwest::Client,
    ) -> Result<Self> {
        let row_selector = Selector::parse(RESULT_ROW_SELECTOR)
            .map_err(|e| Error::Other(format!("invalid result row selector: {e}")))?;
        let sitekey_pattern = Regex::new(r#"data-sitekey="([^"]+)""#)
            .map_err(|e| Error::Other(format!("invalid sitekey pattern: {e}")))?;
        let interstitial_pattern =
            Regex::new(r"(?i)access denied|unusual traffic|automated requests|request blocked")
                .map_err(|e| Error::Other(format!("invalid interstitial pattern: {e}")))?;

        Ok(Self {
            client,
            registry,
            retry,
            solver,
            row_selector,
            sitekey_pattern,
            interstitial_pattern,
        })
    }

    fn search_url(&self, file_number: &str) -> Result<Url> {
        let mut url = Url::parse(&self.registry.base_url)?;
        url.query_pairs_mut().append_pair("file_number", file_number);
        Ok(url)
    }

    async fn get_page(&self, url: &Url) -> Result<(StatusCode, String)> {
        let response = fetch_with_retry(&self.retry, || async {
            self.client
                .get(url.clone())
                .send()
                .await
                .map_err(Error::from)
        })
        .await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    /// Resubmit the search with a solved CAPTCHA token
    async fn resubmit_with_token(
        &self,
        file_number: &str,
        token: &str,
    ) -> Result<(StatusCode, String)> {
        let response = self
            .client
            .post(&self.registry.base_url)
            .form(&[
                ("file_number", file_number),
                ("g-recaptcha-response", token),
            ])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    async fn lookup(&self, file_number: &str) -> Result<FetchOutcome> {
        let url = self.search_url(file_number)?;
        let (status, body) = self.get_page(&url).await?;

        match self.classify(status, &body) {
            Page::Results(businesses_found) => {
                debug!(file_number, businesses_found, "Lookup succeeded");
                Ok(FetchOutcome::Success { businesses_found })
            }
            Page::Interstitial => {
                warn!(file_number, %status, "Anti-bot interstitial served");
                Ok(FetchOutcome::Blocked)
            }
            Page::ServerError(status) => {
                debug!(file_number, %status, "Registry returned a non-success status");
                Ok(FetchOutcome::Failure {
                    reason: format!("registry returned HTTP {status}"),
                })
            }
            Page::Challenge { site_key } => {
                info!(file_number, "Captcha challenge served, delegating to solver");
                let token = match self.solver.solve_recaptcha(&site_key, url.as_str()).await {
                    Ok(token) => token,
                    Err(CaptchaError::Unsolvable(_)) | Err(CaptchaError::Timeout { .. }) => {
                        warn!(file_number, "Solver could not clear the challenge");
                        return Ok(FetchOutcome::Blocked);
                    }
                    Err(e) => return Err(e.into()),
                };

                let (status, body) = self.resubmit_with_token(file_number, &token).await?;
                match self.classify(status, &body) {
                    Page::Results(businesses_found) => {
                        debug!(file_number, businesses_found, "Lookup succeeded after solve");
                        Ok(FetchOutcome::Success { businesses_found })
                    }
                    // Still challenged after a valid token: the session is burned
                    Page::Challenge { .. } | Page::Interstitial => Ok(FetchOutcome::Blocked),
                    Page::ServerError(status) => Ok(FetchOutcome::Failure {
                        reason: format!("registry returned HTTP {status} after captcha solve"),
                    }),
                }
            }
        }
    }

    fn classify(&self, status: StatusCode, body: &str) -> Page {
        if let Some(captures) = self.sitekey_pattern.captures(body) {
            return Page::Challenge {
                site_key: captures[1].to_string(),
            };
        }
        if matches!(
            status,
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
        ) || self.interstitial_pattern.is_match(body)
        {
            return Page::Interstitial;
        }
        if !status.is_success() {
            return Page::ServerError(status);
        }
        Page::Results(count_result_rows(body, &self.row_selector))
    }
}

/// What kind of page the portal served
enum Page {
    /// A result page with this many business records
    Results(u32),
    /// A reCAPTCHA challenge with the extracted site key
    Challenge { site_key: String },
    /// A hard anti-bot block with no solvable challenge
    Interstitial,
    /// An ordinary non-success status; a per-file failure, not blocking
    ServerError(StatusCode),
}

/// Count business records on a result page
///
/// Kept synchronous and self-contained: `Html` is not `Send`, so it must not
/// live across an await point.
fn count_result_rows(body: &str, row_selector: &Selector) -> u32 {
    let document = Html::parse_document(body);
    document.select(row_selector).count() as u32
}

#[async_trait]
impl RegistryFetcher for HttpRegistryFetcher {
    async fn fetch(&self, file_number: &str) -> FetchOutcome {
        match self.lookup(file_number).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(file_number, error = %e, "Lookup failed");
                FetchOutcome::Failure {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptchaConfig;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RESULTS_TWO_ROWS: &str = r#"
        <html><body><table class="search-results"><tbody>
        <tr><td>ACME LLC</td></tr>
        <tr><td>ACME HOLDINGS LLC</td></tr>
        </tbody></table></body></html>
    "#;

    const RESULTS_EMPTY: &str = r#"
        <html><body><p>No records found.</p>
        <table class="search-results"><tbody></tbody></table></body></html>
    "#;

    const CHALLENGE_PAGE: &str = r#"
        <html><body>
        <div class="g-recaptcha" data-sitekey="site-key-123"></div>
        </body></html>
    "#;

    const INTERSTITIAL_PAGE: &str =
        "<html><body><h1>Access Denied</h1><p>Unusual traffic detected.</p></body></html>";

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 0,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    fn fetcher_for_base(registry_base: String, captcha: &MockServer) -> HttpRegistryFetcher {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .unwrap();
        let solver = CaptchaSolver::new(
            CaptchaConfig {
                api_key: "k".to_string(),
                base_url: captcha.uri(),
                solve_deadline: Duration::from_secs(2),
                poll_interval: Duration::from_millis(10),
            },
            client.clone(),
        );
        HttpRegistryFetcher::new(
            RegistryConfig {
                base_url: registry_base,
                request_timeout: Duration::from_secs(5),
                user_agent: "test".to_string(),
            },
            fast_retry(),
            solver,
            client,
        )
        .unwrap()
    }

    fn fetcher_for(registry: &MockServer, captcha: &MockServer) -> HttpRegistryFetcher {
        fetcher_for_base(format!("{}/search", registry.uri()), captcha)
    }

    async fn mount_solver_success(captcha: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/in.php"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": 1, "request": "task-1"})),
            )
            .mount(captcha)
            .await;
        Mock::given(method("GET"))
            .and(path("/res.php"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": 1, "request": "tok-1"})),
            )
            .mount(captcha)
            .await;
    }

    #[tokio::test]
    async fn test_success_counts_result_rows() {
        let registry = MockServer::start().await;
        let captcha = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("file_number", "123"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS_TWO_ROWS))
            .mount(&registry)
            .await;

        let outcome = fetcher_for(&registry, &captcha).fetch("123").await;
        assert_eq!(
            outcome,
            FetchOutcome::Success {
                businesses_found: 2
            }
        );
    }

    #[tokio::test]
    async fn test_zero_rows_is_still_success() {
        let registry = MockServer::start().await;
        let captcha = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS_EMPTY))
            .mount(&registry)
            .await;

        let outcome = fetcher_for(&registry, &captcha).fetch("999").await;
        assert_eq!(
            outcome,
            FetchOutcome::Success {
                businesses_found: 0
            }
        );
    }

    #[tokio::test]
    async fn test_forbidden_status_is_blocked() {
        let registry = MockServer::start().await;
        let captcha = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(403).set_body_string("<html>nope</html>"))
            .mount(&registry)
            .await;

        let outcome = fetcher_for(&registry, &captcha).fetch("123").await;
        assert_eq!(outcome, FetchOutcome::Blocked);
    }

    #[tokio::test]
    async fn test_interstitial_markers_are_blocked() {
        let registry = MockServer::start().await;
        let captcha = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INTERSTITIAL_PAGE))
            .mount(&registry)
            .await;

        let outcome = fetcher_for(&registry, &captcha).fetch("123").await;
        assert_eq!(outcome, FetchOutcome::Blocked);
    }

    #[tokio::test]
    async fn test_challenge_solved_then_results() {
        let registry = MockServer::start().await;
        let captcha = MockServer::start().await;
        mount_solver_success(&captcha).await;

        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CHALLENGE_PAGE))
            .mount(&registry)
            .await;

        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_string_contains("g-recaptcha-response=tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS_TWO_ROWS))
            .mount(&registry)
            .await;

        let outcome = fetcher_for(&registry, &captcha).fetch("123").await;
        assert_eq!(
            outcome,
            FetchOutcome::Success {
                businesses_found: 2
            }
        );
    }

    #[tokio::test]
    async fn test_unsolvable_challenge_is_blocked() {
        let registry = MockServer::start().await;
        let captcha = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CHALLENGE_PAGE))
            .mount(&registry)
            .await;

        Mock::given(method("POST"))
            .and(path("/in.php"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": 1, "request": "task-2"})),
            )
            .mount(&captcha)
            .await;
        Mock::given(method("GET"))
            .and(path("/res.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"status": 0, "request": "ERROR_CAPTCHA_UNSOLVABLE"}),
            ))
            .mount(&captcha)
            .await;

        let outcome = fetcher_for(&registry, &captcha).fetch("123").await;
        assert_eq!(outcome, FetchOutcome::Blocked);
    }

    #[tokio::test]
    async fn test_rechallenge_after_solve_is_blocked() {
        let registry = MockServer::start().await;
        let captcha = MockServer::start().await;
        mount_solver_success(&captcha).await;

        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CHALLENGE_PAGE))
            .mount(&registry)
            .await;

        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CHALLENGE_PAGE))
            .mount(&registry)
            .await;

        let outcome = fetcher_for(&registry, &captcha).fetch("123").await;
        assert_eq!(outcome, FetchOutcome::Blocked);
    }

    #[tokio::test]
    async fn test_network_error_is_failure_not_blocked() {
        let captcha = MockServer::start().await;
        // Bind an ephemeral port, then free it: connecting to it is refused
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = fetcher_for_base(format!("http://{addr}/search"), &captcha);

        let outcome = fetcher.fetch("123").await;
        match outcome {
            FetchOutcome::Failure { reason } => {
                assert!(reason.contains("network error"), "reason = {reason}")
            }
            other => panic!("expected Failure, got {other:?}"),
        }
    }
}
