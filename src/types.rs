//! Core types for registry-scraper

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Opaque identifier for one lineage step
///
/// A lineage (chain) is the sequence of batch executions produced by
/// successive continuation handoffs for one original submission. Each step
/// gets its own `RequestId`; the continuation planner derives the next one
/// deterministically from the current one (see
/// [`crate::continuation::next_request_id`]).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    /// Create a new RequestId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One normalized batch of work, consumed exactly once by one engine run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Identifier for this lineage step
    pub request_id: RequestId,
    /// File numbers to look up, in submission order (duplicates are legal)
    pub file_numbers: Vec<String>,
    /// Marks dry runs; carried through into the run metadata
    #[serde(default)]
    pub test_run: bool,
}

/// Classified outcome of one file-number lookup
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The registry answered; zero matches is still a success
    Success {
        /// Number of business records matched for the file number
        businesses_found: u32,
    },
    /// Ordinary per-file failure (network, parse); does not imply blocking
    Failure {
        /// What went wrong, for the run results
        reason: String,
    },
    /// Anti-bot interstitial or a CAPTCHA the solver could not clear
    Blocked,
}

impl FetchOutcome {
    /// Whether this outcome counts as a successful lookup
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }
}

/// Per-file record in the run results
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResult {
    /// Whether the lookup completed
    pub success: bool,
    /// Business records found (0 when the lookup failed)
    pub businesses_found: u32,
}

impl From<&FetchOutcome> for FileResult {
    fn from(outcome: &FetchOutcome) -> Self {
        match outcome {
            FetchOutcome::Success { businesses_found } => Self {
                success: true,
                businesses_found: *businesses_found,
            },
            FetchOutcome::Failure { .. } | FetchOutcome::Blocked => Self {
                success: false,
                businesses_found: 0,
            },
        }
    }
}

/// Run-level metadata attached to the scrape artifact
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// True when the run aborted early on sustained blocking
    pub blocked: bool,
    /// Number of file numbers actually attempted in this run
    pub total_attempted: usize,
    /// Mirrors the batch request's test flag
    #[serde(default)]
    pub test_run: bool,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finalized; None while the run is in flight
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// The finished (possibly partial) run artifact
///
/// Invariant: `results` keys are exactly the file numbers attempted in this
/// run, in submission order. Never a superset of the batch request's file
/// numbers. The map is order-preserving so downstream consumers can correlate
/// input position to result without an auxiliary index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeRun {
    /// Identifier of the lineage step that produced this run
    pub request_id: RequestId,
    /// Per-file outcomes, keyed by file number, in input order
    pub results: IndexMap<String, FileResult>,
    /// Run-level metadata
    pub metadata: RunMetadata,
}

/// Persisted record of unprocessed work handed to the next lineage step
///
/// Exists only when a run aborted before exhausting its batch. Its
/// `file_numbers`, unioned with the attempted keys of the corresponding
/// [`ScrapeRun`], equal the original batch's file numbers with no overlap and
/// original relative order preserved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationDescriptor {
    /// Fresh identifier for the next lineage step
    pub request_id: RequestId,
    /// File numbers not attempted in the aborted run, in original order
    pub file_numbers: Vec<String>,
}
