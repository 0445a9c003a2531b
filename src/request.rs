//! Batch request parsing
//!
//! Normalizes the caller-supplied file-number encoding into an ordered
//! [`BatchRequest`]. Two encodings are accepted and detected by structural
//! sniffing: a JSON array literal (leading `[`) or a comma-separated list.
//! Both parse to the identical ordered batch. Duplicates are legal and are
//! each attempted; deduplication here would silently drop work the caller
//! asked for.

use crate::error::{Error, Result};
use crate::types::{BatchRequest, RequestId};

impl BatchRequest {
    /// Parse a raw file-number encoding and request identifier into a batch
    ///
    /// Fails with a validation error when the identifier is empty or would
    /// escape the artifact directory, or when the normalized sequence
    /// contains no file numbers.
    pub fn parse(request_id: &str, raw_file_numbers: &str, test_run: bool) -> Result<Self> {
        let request_id = request_id.trim();
        if request_id.is_empty() {
            return Err(Error::validation(
                "request identifier is empty or absent",
                "REQUEST_ID",
            ));
        }
        // The identifier names the scrape artifact; a separator or parent
        // reference would escape the output directory
        if request_id.contains(['/', '\\']) || request_id.contains("..") {
            return Err(Error::validation(
                format!("request identifier {request_id:?} must not contain path separators"),
                "REQUEST_ID",
            ));
        }

        let file_numbers = parse_file_numbers(raw_file_numbers)?;
        if file_numbers.is_empty() {
            return Err(Error::validation(
                "no file numbers after normalization",
                "FILE_NUMBERS",
            ));
        }

        Ok(Self {
            request_id: RequestId::new(request_id),
            file_numbers,
            test_run,
        })
    }
}

/// Normalize a raw encoding into an ordered list of file numbers
///
/// Tokens are trimmed and empty tokens dropped; order is preserved.
fn parse_file_numbers(raw: &str) -> Result<Vec<String>> {
    let trimmed = raw.trim();

    let tokens: Vec<String> = if trimmed.starts_with('[') {
        let values: Vec<serde_json::Value> = serde_json::from_str(trimmed).map_err(|e| {
            Error::validation(
                format!("FILE_NUMBERS looks like a JSON array but failed to parse: {e}"),
                "FILE_NUMBERS",
            )
        })?;
        values
            .into_iter()
            .map(|value| match value {
                serde_json::Value::String(s) => Ok(s),
                // Callers sometimes hand over bare numbers in the array
                serde_json::Value::Number(n) => Ok(n.to_string()),
                other => Err(Error::validation(
                    format!("unsupported element in FILE_NUMBERS array: {other}"),
                    "FILE_NUMBERS",
                )),
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        trimmed.split(',').map(|s| s.to_string()).collect()
    };

    Ok(tokens
        .into_iter()
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .collect())
}
