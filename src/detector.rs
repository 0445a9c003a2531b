//! Blocking detector
//!
//! Watches the stream of fetch outcomes for sustained anti-bot blocking.
//! Anti-bot defenses typically block the whole session or egress IP once
//! triggered, so continuing to spend CAPTCHA budget against a blocked session
//! is wasted and risks a longer ban. The policy: a lone `Blocked` outcome is
//! tolerated (recorded as a failed attempt), but a configured number of
//! *consecutive* `Blocked` outcomes aborts the batch so the remainder can be
//! resumed under a fresh execution context.

use crate::types::FetchOutcome;
use tracing::warn;

/// Decision after recording one outcome
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Keep processing the batch
    Continue,
    /// Sustained blocking detected; abort and hand off the remainder
    Abort,
}

/// Tracks consecutive `Blocked` outcomes within one run
#[derive(Debug)]
pub struct BlockingDetector {
    threshold: u32,
    consecutive_blocked: u32,
}

impl BlockingDetector {
    /// Create a detector that aborts at `threshold` consecutive blocks
    ///
    /// A threshold of 0 is coerced to 1; "never abort" is not a supported
    /// policy.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_blocked: 0,
        }
    }

    /// Record one outcome and decide whether the batch continues
    ///
    /// Any non-`Blocked` outcome resets the streak: an isolated challenge
    /// failure is not evidence that the session is burned.
    pub fn record(&mut self, outcome: &FetchOutcome) -> Verdict {
        match outcome {
            FetchOutcome::Blocked => {
                self.consecutive_blocked += 1;
                if self.consecutive_blocked >= self.threshold {
                    warn!(
                        consecutive = self.consecutive_blocked,
                        threshold = self.threshold,
                        "Sustained blocking detected, aborting batch"
                    );
                    Verdict::Abort
                } else {
                    warn!(
                        consecutive = self.consecutive_blocked,
                        threshold = self.threshold,
                        "Blocked outcome tolerated, continuing"
                    );
                    Verdict::Continue
                }
            }
            FetchOutcome::Success { .. } | FetchOutcome::Failure { .. } => {
                self.consecutive_blocked = 0;
                Verdict::Continue
            }
        }
    }

    /// Current streak of consecutive blocked outcomes
    pub fn consecutive_blocked(&self) -> u32 {
        self.consecutive_blocked
    }
}
