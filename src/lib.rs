//! # registry-scraper
//!
//! Resumable, blocking-aware batch engine for retrieving public business
//! registration records from a government registry portal, keyed by file
//! number.
//!
//! ## Design Philosophy
//!
//! - **Sequential by design** - one lookup in flight at a time, with paced,
//!   non-bursty traffic to avoid tripping anti-bot defenses
//! - **Blocking-aware** - sustained blocking aborts the run early instead of
//!   burning CAPTCHA budget against a dead session
//! - **Resumable** - an aborted run hands its unprocessed remainder to the
//!   next invocation through a continuation artifact; no file number is ever
//!   lost or duplicated across the handoff
//! - **Kill-safe** - the scrape artifact is rewritten atomically after every
//!   attempt, so an external kill never discards or corrupts progress
//!
//! ## Quick Start
//!
//! ```no_run
//! use registry_scraper::{
//!     BatchRequest, CaptchaSolver, Config, Engine, HttpRegistryFetcher, ResultWriter,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let request = BatchRequest::parse("req-1", "123,456,789", false)?;
//!
//!     let client = registry_scraper::build_http_client(&config.registry)?;
//!     let solver = CaptchaSolver::new(config.captcha.clone(), client.clone());
//!     let fetcher = HttpRegistryFetcher::new(
//!         config.registry.clone(),
//!         config.retry.clone(),
//!         solver,
//!         client,
//!     )?;
//!
//!     let engine = Engine::new(
//!         Arc::new(fetcher),
//!         ResultWriter::new(&config.output_dir),
//!         config.pacing.clone(),
//!         config.blocked_threshold,
//!     );
//!
//!     let report = registry_scraper::run_with_shutdown(&engine, &request).await?;
//!     if report.needs_continuation() {
//!         println!("run aborted, remainder handed off");
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// CAPTCHA-solving API client
pub mod captcha;
/// Configuration types and environment loading
pub mod config;
/// Continuation planning for aborted runs
pub mod continuation;
/// Consecutive-blocking detection
pub mod detector;
/// The sequential batch engine
pub mod engine;
/// Error types
pub mod error;
/// Fetch worker: one registry lookup per call
pub mod fetcher;
/// Progress state and artifact writing
pub mod progress;
/// Batch request parsing
pub mod request;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types
pub mod types;

// Re-export commonly used types
pub use captcha::CaptchaSolver;
pub use config::{CaptchaConfig, Config, PacingConfig, RegistryConfig, RetryConfig};
pub use continuation::{next_request_id, plan_continuation};
pub use detector::{BlockingDetector, Verdict};
pub use engine::{Engine, RunReport};
pub use error::{CaptchaError, Error, Result};
pub use fetcher::{HttpRegistryFetcher, RegistryFetcher};
pub use progress::{ProgressState, ResultWriter, CONTINUATION_FILENAME};
pub use types::{
    BatchRequest, ContinuationDescriptor, FetchOutcome, FileResult, RequestId, RunMetadata,
    ScrapeRun,
};

/// Build the HTTP client shared by the fetch worker and the CAPTCHA solver
///
/// Cookie store enabled: the portal ties solved challenges to the session.
pub fn build_http_client(registry: &RegistryConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(&registry.user_agent)
        .timeout(registry.request_timeout)
        .cookie_store(true)
        .build()?)
}

/// Run one batch with graceful signal handling.
///
/// The Runner enforces wall-clock limits by terminating the process; a
/// catchable signal (SIGTERM/SIGINT) stops the loop after the in-flight
/// fetch, finalizes the artifact, and writes a continuation descriptor for
/// the untouched remainder. A hard kill still leaves a consistent artifact
/// because the engine flushes after every attempt.
pub async fn run_with_shutdown(engine: &Engine, request: &BatchRequest) -> Result<RunReport> {
    let shutdown = engine.shutdown_flag();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
    });
    engine.run(request).await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
