//! WDS client error types.

use thiserror::Error;

/// WDS client errors.
#[derive(Debug, Error)]
pub enum WdsError {
    /// Network-level failure or 5xx that survived every retry.
    #[error("transient error calling {endpoint}: {source}")]
    Transient {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-retryable HTTP status (4xx).
    #[error("{endpoint} returned status {status}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
    },

    /// The response body did not decode as the expected JSON shape.
    #[error("malformed response from {endpoint}: {detail}")]
    Malformed { endpoint: String, detail: String },

    /// The WDS envelope carried a non-success status.
    #[error("{endpoint} responded with status '{status}'")]
    Upstream { endpoint: String, status: String },

    #[error("invalid base url: {0}")]
    InvalidUrl(String),
}

impl WdsError {
    /// Whether a retry on a later scheduler pass could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Result type for WDS operations.
pub type WdsResult<T> = std::result::Result<T, WdsError>;
