//! Sequential batch engine
//!
//! One engine run consumes one [`BatchRequest`]: it walks the file numbers in
//! submission order with exactly one fetch in flight at a time, records every
//! outcome, and flushes the scrape artifact after each attempt. Sequential
//! processing is deliberate — CAPTCHA solving and anti-bot avoidance benefit
//! from non-bursty pacing, and parallel fetches would accelerate detection.
//! No internal locking is needed because there is no internal concurrency.
//!
//! Two things end a run early, and both hand the unattempted remainder to the
//! continuation planner:
//! - the blocking detector's threshold policy (sets `blocked` in the run
//!   metadata), or
//! - an external shutdown request (SIGTERM/SIGINT), which stops the loop
//!   after the in-flight fetch.

use crate::config::PacingConfig;
use crate::continuation::plan_continuation;
use crate::detector::{BlockingDetector, Verdict};
use crate::fetcher::RegistryFetcher;
use crate::progress::{ProgressState, ResultWriter};
use crate::retry::paced_sleep;
use crate::types::{BatchRequest, ContinuationDescriptor, ScrapeRun};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// What one engine run produced
#[derive(Clone, Debug)]
pub struct RunReport {
    /// The finished (possibly partial) run
    pub scrape_run: ScrapeRun,
    /// Present if and only if unattempted file numbers remain
    pub continuation: Option<ContinuationDescriptor>,
}

impl RunReport {
    /// Whether this lineage needs a follow-up invocation
    pub fn needs_continuation(&self) -> bool {
        self.continuation.is_some()
    }
}

/// The sequential batch engine
pub struct Engine {
    fetcher: Arc<dyn RegistryFetcher>,
    writer: ResultWriter,
    pacing: PacingConfig,
    blocked_threshold: u32,
    shutdown: Arc<AtomicBool>,
}

impl Engine {
    /// Create an engine
    pub fn new(
        fetcher: Arc<dyn RegistryFetcher>,
        writer: ResultWriter,
        pacing: PacingConfig,
        blocked_threshold: u32,
    ) -> Self {
        Self {
            fetcher,
            writer,
            pacing,
            blocked_threshold,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the run after the in-flight fetch when set
    ///
    /// Wired to SIGTERM/SIGINT by [`crate::run_with_shutdown`].
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Process one batch to completion or abort
    ///
    /// Every non-crash path leaves a finalized scrape artifact on disk, plus
    /// a continuation artifact when unattempted file numbers remain.
    pub async fn run(&self, request: &BatchRequest) -> crate::error::Result<RunReport> {
        info!(
            request_id = %request.request_id,
            file_numbers = request.file_numbers.len(),
            test_run = request.test_run,
            threshold = self.blocked_threshold,
            "Starting batch run"
        );

        let mut progress = ProgressState::new(request.request_id.clone(), request.test_run);
        let mut detector = BlockingDetector::new(self.blocked_threshold);
        let mut blocked = false;
        let mut interrupted = false;

        // Flush the empty artifact up front so even an immediate external
        // kill leaves a well-formed document behind.
        self.writer.write_scrape_run(progress.run())?;

        for (index, file_number) in request.file_numbers.iter().enumerate() {
            if self.shutdown.load(Ordering::SeqCst) {
                warn!(attempted = progress.attempted(), "Shutdown requested, stopping batch");
                interrupted = true;
                break;
            }

            if index > 0 {
                paced_sleep(self.pacing.delay, self.pacing.max_jitter).await;
            }

            let outcome = self.fetcher.fetch(file_number).await;
            progress.record(file_number, &outcome);
            let verdict = detector.record(&outcome);

            // Incremental flush: progress survives an ungraceful kill
            self.writer.write_scrape_run(progress.run())?;

            if verdict == Verdict::Abort {
                blocked = true;
                break;
            }
        }

        progress.finalize(blocked);
        self.writer.write_scrape_run(progress.run())?;

        let continuation = if blocked || interrupted {
            plan_continuation(request, progress.attempted())
        } else {
            None
        };
        if let Some(descriptor) = &continuation {
            self.writer.write_continuation(descriptor)?;
        }

        info!(
            request_id = %request.request_id,
            attempted = progress.attempted(),
            blocked,
            continuation = continuation.is_some(),
            "Batch run finished"
        );

        Ok(RunReport {
            scrape_run: progress.run().clone(),
            continuation,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FetchOutcome, RequestId};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted fetcher: pops outcomes in order, repeating the last one
    struct ScriptedFetcher {
        script: Mutex<Vec<FetchOutcome>>,
    }

    impl ScriptedFetcher {
        fn new(outcomes: Vec<FetchOutcome>) -> Self {
            Self {
                script: Mutex::new(outcomes),
            }
        }
    }

    #[async_trait]
    impl RegistryFetcher for ScriptedFetcher {
        async fn fetch(&self, _file_number: &str) -> FetchOutcome {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }
    }

    fn success(n: u32) -> FetchOutcome {
        FetchOutcome::Success { businesses_found: n }
    }

    fn no_pacing() -> PacingConfig {
        PacingConfig {
            delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    fn engine_with(
        outcomes: Vec<FetchOutcome>,
        dir: &tempfile::TempDir,
        threshold: u32,
    ) -> Engine {
        Engine::new(
            Arc::new(ScriptedFetcher::new(outcomes)),
            ResultWriter::new(dir.path()),
            no_pacing(),
            threshold,
        )
    }

    fn batch(id: &str, file_numbers: &[&str]) -> BatchRequest {
        BatchRequest {
            request_id: RequestId::new(id),
            file_numbers: file_numbers.iter().map(|s| s.to_string()).collect(),
            test_run: false,
        }
    }

    #[tokio::test]
    async fn test_no_blocking_attempts_every_file_number_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(
            vec![success(1), success(0), success(3)],
            &dir,
            2,
        );
        let request = batch("r1", &["A", "B", "C"]);

        let report = engine.run(&request).await.unwrap();

        let keys: Vec<&String> = report.scrape_run.results.keys().collect();
        assert_eq!(keys, ["A", "B", "C"]);
        assert_eq!(report.scrape_run.metadata.total_attempted, 3);
        assert!(!report.scrape_run.metadata.blocked);
        assert!(report.continuation.is_none());
        assert!(!dir.path().join("remaining_files.json").exists());
    }

    #[tokio::test]
    async fn test_blocked_from_second_file_with_threshold_one() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(vec![success(2), FetchOutcome::Blocked], &dir, 1);
        let request = batch("r1", &["A", "B", "C"]);

        let report = engine.run(&request).await.unwrap();

        // A succeeded; B triggered the detector and is recorded, not dropped
        let keys: Vec<&String> = report.scrape_run.results.keys().collect();
        assert_eq!(keys, ["A", "B"]);
        assert!(report.scrape_run.results["A"].success);
        assert_eq!(report.scrape_run.results["A"].businesses_found, 2);
        assert!(!report.scrape_run.results["B"].success);
        assert!(report.scrape_run.metadata.blocked);

        let continuation = report.continuation.unwrap();
        assert_eq!(continuation.file_numbers, vec!["C"]);
        assert_ne!(continuation.request_id, request.request_id);
        assert!(dir.path().join("remaining_files.json").exists());
    }

    #[tokio::test]
    async fn test_single_block_is_tolerated_at_threshold_two() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(
            vec![FetchOutcome::Blocked, success(1), success(1)],
            &dir,
            2,
        );
        let request = batch("r1", &["A", "B", "C"]);

        let report = engine.run(&request).await.unwrap();
        assert_eq!(report.scrape_run.metadata.total_attempted, 3);
        assert!(!report.scrape_run.metadata.blocked);
        assert!(report.continuation.is_none());
        assert!(!report.scrape_run.results["A"].success);
    }

    #[tokio::test]
    async fn test_per_file_failures_never_abort() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(
            vec![FetchOutcome::Failure {
                reason: "timeout".into(),
            }],
            &dir,
            2,
        );
        let request = batch("r1", &["A", "B", "C", "D"]);

        let report = engine.run(&request).await.unwrap();
        assert_eq!(report.scrape_run.metadata.total_attempted, 4);
        assert!(report.continuation.is_none());
        assert!(!report.scrape_run.metadata.blocked);
    }

    #[tokio::test]
    async fn test_partition_invariant_on_abort() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(
            vec![success(1), FetchOutcome::Blocked],
            &dir,
            1,
        );
        let request = batch("r1", &["A", "B", "C", "D", "E"]);

        let report = engine.run(&request).await.unwrap();

        let mut rejoined: Vec<String> =
            report.scrape_run.results.keys().cloned().collect();
        let continuation = report.continuation.unwrap();
        rejoined.extend(continuation.file_numbers.clone());
        assert_eq!(rejoined, request.file_numbers);
    }

    #[tokio::test]
    async fn test_abort_on_final_file_number_leaves_no_continuation() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(
            vec![success(1), success(1), FetchOutcome::Blocked],
            &dir,
            1,
        );
        let request = batch("r1", &["A", "B", "C"]);

        let report = engine.run(&request).await.unwrap();
        assert!(report.scrape_run.metadata.blocked);
        assert!(report.continuation.is_none());
        assert!(!dir.path().join("remaining_files.json").exists());
    }

    #[tokio::test]
    async fn test_shutdown_flag_stops_the_run_with_a_continuation() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(vec![success(1)], &dir, 2);
        engine.shutdown_flag().store(true, Ordering::SeqCst);
        let request = batch("r1", &["A", "B"]);

        let report = engine.run(&request).await.unwrap();
        assert_eq!(report.scrape_run.metadata.total_attempted, 0);
        assert!(!report.scrape_run.metadata.blocked);
        let continuation = report.continuation.unwrap();
        assert_eq!(continuation.file_numbers, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_lineage_shrinks_until_exhaustion() {
        // Block the first three calls overall, then succeed forever: the
        // chain must make progress each step and terminate.
        struct EventuallyUnblocked {
            calls: Mutex<u32>,
        }

        #[async_trait]
        impl RegistryFetcher for EventuallyUnblocked {
            async fn fetch(&self, _file_number: &str) -> FetchOutcome {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                if *calls <= 3 {
                    FetchOutcome::Blocked
                } else {
                    success(1)
                }
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(EventuallyUnblocked {
            calls: Mutex::new(0),
        });
        let engine = Engine::new(
            fetcher,
            ResultWriter::new(dir.path()),
            no_pacing(),
            1,
        );

        let mut request = batch("r1", &["A", "B", "C", "D"]);
        let original = request.file_numbers.clone();
        let mut attempted_overall: Vec<String> = Vec::new();
        let mut steps = 0;

        loop {
            steps += 1;
            assert!(steps <= 10, "lineage must terminate");
            let report = engine.run(&request).await.unwrap();

            for key in report.scrape_run.results.keys() {
                // No file number is revisited after a prior run consumed it
                assert!(!attempted_overall.contains(key), "revisited {key}");
                attempted_overall.push(key.clone());
            }

            match report.continuation {
                Some(descriptor) => {
                    assert!(!descriptor.file_numbers.is_empty());
                    request = BatchRequest {
                        request_id: descriptor.request_id,
                        file_numbers: descriptor.file_numbers,
                        test_run: false,
                    };
                }
                None => break,
            }
        }

        assert_eq!(attempted_overall, original);
    }
}
