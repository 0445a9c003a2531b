//! Binary entrypoint for the batch engine
//!
//! Configuration is entirely via environment (the Runner supplies it):
//! `CAPTCHA_API_KEY`, `FILE_NUMBERS`, `REQUEST_ID`, and optionally
//! `TEST_RUN`, `OUTPUT_DIR`, `REGISTRY_BASE_URL`, `BLOCKED_THRESHOLD`,
//! `PACING_MS`, `RUST_LOG`. No positional arguments.
//!
//! Exit status: zero on any completed run, including an early abort that
//! produced a continuation artifact (an expected, handled condition);
//! non-zero on input validation failure or an unrecoverable fault, with no
//! artifact guarantee in that case.

use registry_scraper::{
    build_http_client, run_with_shutdown, BatchRequest, CaptchaSolver, Config, Engine, Error,
    HttpRegistryFetcher, ResultWriter,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ Error::Validation { .. }) => {
            error!(error = %e, "Invalid input, no artifact written");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "Unrecoverable fault");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> registry_scraper::Result<()> {
    let config = Config::from_env()?;
    let request = batch_request_from_env()?;

    let client = build_http_client(&config.registry)?;
    let solver = CaptchaSolver::new(config.captcha.clone(), client.clone());
    let fetcher =
        HttpRegistryFetcher::new(config.registry.clone(), config.retry.clone(), solver, client)?;

    let engine = Engine::new(
        Arc::new(fetcher),
        ResultWriter::new(&config.output_dir),
        config.pacing.clone(),
        config.blocked_threshold,
    );

    let report = run_with_shutdown(&engine, &request).await?;

    if let Some(descriptor) = &report.continuation {
        info!(
            next_request_id = %descriptor.request_id,
            remaining = descriptor.file_numbers.len(),
            "Run aborted early, remainder handed off to the next invocation"
        );
    } else {
        info!(
            attempted = report.scrape_run.metadata.total_attempted,
            "Lineage complete"
        );
    }

    Ok(())
}

fn batch_request_from_env() -> registry_scraper::Result<BatchRequest> {
    let request_id = std::env::var("REQUEST_ID")
        .map_err(|_| Error::validation("REQUEST_ID is not set", "REQUEST_ID"))?;
    let file_numbers = std::env::var("FILE_NUMBERS")
        .map_err(|_| Error::validation("FILE_NUMBERS is not set", "FILE_NUMBERS"))?;
    let test_run = std::env::var("TEST_RUN")
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    BatchRequest::parse(&request_id, &file_numbers, test_run)
}
