//! Continuation planning
//!
//! When a run aborts before exhausting its batch, the planner computes the
//! unprocessed remainder and assigns it a fresh request identifier for the
//! next lineage step. Attempts are strictly sequential, so the remainder is
//! always the suffix of the input after the attempted prefix; partitioning by
//! position (not by value) keeps duplicate file numbers correct.
//!
//! The next identifier is derived deterministically from the current one:
//! `req` → `req-c1` → `req-c2` → … . A derived identifier keeps the whole
//! chain traceable from artifact names alone, without an external correlation
//! table, and guarantees the new artifact namespace cannot collide with the
//! just-finished run's.

use crate::types::{BatchRequest, ContinuationDescriptor, RequestId};

/// Compute the continuation for an aborted run
///
/// `attempted` is the number of file numbers actually attempted (the prefix
/// length). Returns `None` when the batch was exhausted; a completed lineage
/// produces no descriptor.
pub fn plan_continuation(
    request: &BatchRequest,
    attempted: usize,
) -> Option<ContinuationDescriptor> {
    if attempted >= request.file_numbers.len() {
        return None;
    }

    Some(ContinuationDescriptor {
        request_id: next_request_id(&request.request_id),
        file_numbers: request.file_numbers[attempted..].to_vec(),
    })
}

/// Derive the identifier for the next lineage step
///
/// A `-c<N>` suffix marks continuation steps; an existing suffix is
/// incremented rather than stacked, so step 12 of a chain is `base-c12`, not
/// `base-c1-c1-…`.
pub fn next_request_id(current: &RequestId) -> RequestId {
    let current = current.as_str();
    if let Some((base, counter)) = current.rsplit_once("-c") {
        if let Ok(n) = counter.parse::<u64>() {
            return RequestId::new(format!("{base}-c{}", n + 1));
        }
    }
    RequestId::new(format!("{current}-c1"))
}
