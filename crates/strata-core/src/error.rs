//! Error types for Strata.
//!
//! [`StrataError`] is the failure value that travels down a handler stack.
//! Once a failure enters the continuation chain it is shared as
//! [`Error`] (an `Arc<StrataError>`), because the same value may be handed to
//! several error handlers, the terminal responder and an error reporter.
//!
//! HTTP metadata is carried on the [`StrataError::Http`] variant. Its status is
//! stored exactly as given and only validated when it is used: a status outside
//! `400..=599` is ignored by the terminal responder.

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::any::Any;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

/// Shared handle to a failure travelling through a continuation chain.
pub type Error = Arc<StrataError>;

/// Result type alias using [`StrataError`].
pub type StrataResult<T> = Result<T, StrataError>;

/// Errors raised by handlers, transports and the Strata runtime itself.
#[derive(Error, Debug)]
pub enum StrataError {
    /// A failure that carries HTTP metadata.
    #[error("{message}")]
    Http {
        /// Requested status code, validated against `400..=599` when used.
        status: u16,
        /// Human-readable message.
        message: String,
        /// Headers to attach when this error decides the response status.
        headers: HeaderMap,
    },

    /// A plain failure message.
    #[error("{0}")]
    Message(String),

    /// A handler panicked; the payload is the panic message when it had one.
    #[error("handler panicked: {0}")]
    Panic(String),

    /// The underlying transport failed.
    #[error("channel error: {0}")]
    Channel(String),

    /// An API was called with malformed arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An internal failure wrapping an opaque source error.
    #[error("{message}")]
    Internal {
        /// Error message.
        message: String,
        /// The underlying cause.
        #[source]
        source: anyhow::Error,
    },
}

impl StrataError {
    /// Creates an error carrying an HTTP status.
    #[must_use]
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Adds a header to an [`StrataError::Http`] error.
    ///
    /// Headers are ignored on other variants, and invalid names or values are
    /// dropped.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let Self::Http { headers, .. } = &mut self {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name),
                HeaderValue::try_from(value),
            ) {
                headers.append(name, value);
            }
        }
        self
    }

    /// Creates a plain message error.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Creates a transport error.
    #[must_use]
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel(message.into())
    }

    /// Creates an invalid-argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Creates an internal error with a source error.
    pub fn internal(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            message: message.into(),
            source: source.into(),
        }
    }

    /// Builds an error from a panic payload caught with `catch_unwind`.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::Panic(message)
    }

    /// Wraps this error for sharing along a continuation chain.
    #[must_use]
    pub fn shared(self) -> Error {
        Arc::new(self)
    }

    /// Returns the raw status this error asked for, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the requested status when it is a client or server error.
    #[must_use]
    pub fn status_code(&self) -> Option<StatusCode> {
        self.status().and_then(error_status)
    }

    /// Returns the headers carried by this error, if any.
    #[must_use]
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            Self::Http { headers, .. } if !headers.is_empty() => Some(headers),
            _ => None,
        }
    }

    /// Returns a diagnostic description: the display text followed by every
    /// error in the source chain.
    #[must_use]
    pub fn detail(&self) -> String {
        let mut out = format!("Error: {self}");
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            let _ = write!(out, "\n    caused by: {cause}");
            source = cause.source();
        }
        out
    }
}

impl From<std::io::Error> for StrataError {
    fn from(err: std::io::Error) -> Self {
        Self::Channel(err.to_string())
    }
}

impl From<anyhow::Error> for StrataError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
            source: err,
        }
    }
}

/// Validates a raw status code as an error status (`400..=599`).
#[must_use]
pub fn error_status(status: u16) -> Option<StatusCode> {
    if (400..=599).contains(&status) {
        StatusCode::from_u16(status).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_is_validated() {
        assert_eq!(
            StrataError::http(404, "nope").status_code(),
            Some(StatusCode::NOT_FOUND)
        );
        assert_eq!(
            StrataError::http(599, "edge").status_code().map(|s| s.as_u16()),
            Some(599)
        );
        assert_eq!(StrataError::http(399, "redirect").status_code(), None);
        assert_eq!(StrataError::http(600, "beyond").status_code(), None);
        assert_eq!(StrataError::http(200, "ok").status(), Some(200));
    }

    #[test]
    fn test_message_has_no_status() {
        let err = StrataError::message("boom!");
        assert_eq!(err.status(), None);
        assert_eq!(err.status_code(), None);
        assert_eq!(err.to_string(), "boom!");
    }

    #[test]
    fn test_headers_only_on_http_variant() {
        let err = StrataError::http(429, "slow down").with_header("Retry-After", "10");
        let headers = err.headers().unwrap();
        assert_eq!(headers.get("retry-after").unwrap(), "10");

        let plain = StrataError::message("x").with_header("X-Test", "1");
        assert!(plain.headers().is_none());
    }

    #[test]
    fn test_invalid_header_is_dropped() {
        let err = StrataError::http(500, "bad").with_header("bad header", "v");
        assert!(err.headers().is_none());
    }

    #[test]
    fn test_detail_includes_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = StrataError::internal("write failed", io);
        let detail = err.detail();
        assert!(detail.starts_with("Error: write failed"));
        assert!(detail.contains("caused by: disk on fire"));
    }

    #[test]
    fn test_from_panic_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(
            StrataError::from_panic(payload.as_ref()).to_string(),
            "handler panicked: static message"
        );

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(
            StrataError::from_panic(payload.as_ref()).to_string(),
            "handler panicked: owned"
        );

        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert!(StrataError::from_panic(payload.as_ref())
            .to_string()
            .contains("non-string"));
    }

    #[test]
    fn test_error_status_bounds() {
        assert!(error_status(400).is_some());
        assert!(error_status(599).is_some());
        assert!(error_status(0).is_none());
        assert!(error_status(1000).is_none());
    }
}
