//! Test error types.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while driving an exchange in memory.
#[derive(Error, Debug)]
pub enum TestError {
    /// A header name or value could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// The request body could not be serialized, or the response body is not
    /// the expected JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The response body is not valid UTF-8.
    #[error("body read error: {0}")]
    BodyRead(String),

    /// The handler stack set a status that is not a valid HTTP status.
    #[error("invalid response status {0}")]
    InvalidStatus(u16),

    /// The connection closed before the response finished.
    #[error("exchange aborted: {0}")]
    Aborted(String),

    /// The response did not finish in time.
    #[error("response did not finish within {0:?}")]
    Timeout(Duration),
}
