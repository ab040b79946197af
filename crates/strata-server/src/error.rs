//! Server error types.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised while running the server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The configured bind address does not parse.
    #[error("invalid address '{addr}': {reason}")]
    InvalidAddress {
        /// The address as configured.
        addr: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Failed to bind the listener.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The exchange ended without a complete response after the status line
    /// was committed. The connection is dropped.
    #[error("exchange aborted after headers were sent")]
    Aborted,

    /// I/O error during server operation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
