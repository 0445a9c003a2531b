//! Progress state and result writing
//!
//! [`ProgressState`] accumulates per-file outcomes strictly in submission
//! order. [`ResultWriter`] serializes the run to its artifact via
//! write-to-temp-then-rename, so a partially written artifact is never
//! observable: the Runner enforces wall-clock limits externally and may kill
//! the process at any point, and an external kill must never corrupt or
//! discard progress already flushed.

use crate::error::Result;
use crate::types::{
    ContinuationDescriptor, FetchOutcome, FileResult, RequestId, RunMetadata, ScrapeRun,
};
use chrono::Utc;
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Filename of the continuation artifact
pub const CONTINUATION_FILENAME: &str = "remaining_files.json";

/// Accumulates outcomes for the current run, in input order
#[derive(Debug)]
pub struct ProgressState {
    run: ScrapeRun,
}

impl ProgressState {
    /// Start tracking a new run
    pub fn new(request_id: RequestId, test_run: bool) -> Self {
        Self {
            run: ScrapeRun {
                request_id,
                results: IndexMap::new(),
                metadata: RunMetadata {
                    blocked: false,
                    total_attempted: 0,
                    test_run,
                    started_at: Utc::now(),
                    finished_at: None,
                },
            },
        }
    }

    /// Record the outcome of one attempted file number
    ///
    /// Duplicate file numbers overwrite the earlier entry in the results map
    /// (each attempt still counts toward `total_attempted`).
    pub fn record(&mut self, file_number: &str, outcome: &FetchOutcome) {
        self.run
            .results
            .insert(file_number.to_string(), FileResult::from(outcome));
        self.run.metadata.total_attempted += 1;
        debug!(
            file_number,
            attempted = self.run.metadata.total_attempted,
            "Outcome recorded"
        );
    }

    /// Number of attempts recorded so far
    pub fn attempted(&self) -> usize {
        self.run.metadata.total_attempted
    }

    /// Stamp the run's final metadata
    pub fn finalize(&mut self, blocked: bool) {
        self.run.metadata.blocked = blocked;
        self.run.metadata.finished_at = Some(Utc::now());
    }

    /// The run as accumulated so far
    pub fn run(&self) -> &ScrapeRun {
        &self.run
    }
}

/// Writes run and continuation artifacts as newline-terminated JSON
#[derive(Debug, Clone)]
pub struct ResultWriter {
    output_dir: PathBuf,
}

impl ResultWriter {
    /// Create a writer targeting the given artifact directory
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Path of the scrape artifact for a request
    pub fn scrape_run_path(&self, request_id: &RequestId) -> PathBuf {
        self.output_dir
            .join(format!("scraped_data_{request_id}.json"))
    }

    /// Path of the continuation artifact
    pub fn continuation_path(&self) -> PathBuf {
        self.output_dir.join(CONTINUATION_FILENAME)
    }

    /// Write (or rewrite) the scrape artifact for the given run
    ///
    /// Called after every attempt so progress survives an external kill.
    pub fn write_scrape_run(&self, run: &ScrapeRun) -> Result<PathBuf> {
        let path = self.scrape_run_path(&run.request_id);
        self.write_json(&path, run)?;
        Ok(path)
    }

    /// Write the continuation artifact
    ///
    /// The artifact's presence, not the process exit code, is what signals
    /// the Runner to schedule a follow-up invocation.
    pub fn write_continuation(&self, descriptor: &ContinuationDescriptor) -> Result<PathBuf> {
        let path = self.continuation_path();
        self.write_json(&path, descriptor)?;
        info!(
            request_id = %descriptor.request_id,
            remaining = descriptor.file_numbers.len(),
            path = %path.display(),
            "Continuation artifact written"
        );
        Ok(path)
    }

    /// Serialize to a temp file in the target directory, then rename over the
    /// final path. Rename within a directory is atomic on POSIX filesystems.
    fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        fs::create_dir_all(&self.output_dir)?;
        let mut document = serde_json::to_string_pretty(value)?;
        document.push('\n');

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, document)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
