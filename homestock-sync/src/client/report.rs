//! Terminal-failure diagnostics.

use super::retry::RetryAttempt;
use crate::config::duration_ms;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot of a request that failed for good, handed to the
/// [`ErrorReporter`](crate::ErrorReporter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub endpoint: String,
    pub method: String,
    /// Request headers with credentials redacted.
    pub headers: Vec<(String, String)>,
    /// Status of the last response, if any response was obtained.
    pub status: Option<u16>,
    /// Body of the last response, if any.
    pub response_body: Option<String>,
    /// Every attempt that was retried, in order.
    pub attempts: Vec<RetryAttempt>,
    #[serde(with = "duration_ms")]
    pub total_duration: Duration,
    /// Display form of the final error.
    pub error: String,
}

impl ErrorDetails {
    /// Total number of requests issued (first attempt plus retries).
    pub fn requests_issued(&self) -> usize {
        self.attempts.len() + 1
    }
}

/// Masks credential-bearing header values.
pub(crate) fn redact_headers<'a>(
    headers: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Vec<(String, String)> {
    headers
        .into_iter()
        .map(|(name, value)| {
            let value = if name.eq_ignore_ascii_case("authorization") {
                match value.split_once(' ') {
                    Some((scheme, _)) => format!("{scheme} ***"),
                    None => "***".to_string(),
                }
            } else {
                value.to_string()
            };
            (name.to_string(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_is_redacted() {
        let headers = redact_headers([
            ("Authorization", "Bearer secret-token"),
            ("Content-Type", "application/json"),
        ]);
        assert_eq!(headers[0], ("Authorization".into(), "Bearer ***".into()));
        assert_eq!(headers[1], ("Content-Type".into(), "application/json".into()));
    }

    #[test]
    fn bare_credential_is_fully_masked() {
        let headers = redact_headers([("authorization", "secret")]);
        assert_eq!(headers[0].1, "***");
    }
}
