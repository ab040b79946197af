//! Test response wrapper.

use crate::error::TestError;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, StatusCode};
use serde::de::DeserializeOwned;
use std::fmt;

/// A finished response captured by the [`TestClient`](crate::TestClient).
pub struct TestResponse {
    status: StatusCode,
    status_message: Option<String>,
    headers: HeaderMap,
    body: Bytes,
}

impl TestResponse {
    /// Creates a test response from raw parts.
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            status_message: None,
            headers,
            body,
        }
    }

    /// Captures a finished [`strata_core::Response`].
    pub fn from_response(res: &strata_core::Response) -> Result<Self, TestError> {
        let status =
            StatusCode::from_u16(res.status()).map_err(|_| TestError::InvalidStatus(res.status()))?;
        Ok(Self {
            status,
            status_message: res.status_message(),
            headers: res.headers(),
            body: res.body(),
        })
    }

    /// Returns the status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the status code as a u16.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// The reason phrase the response carried.
    #[must_use]
    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    /// Returns a reference to the headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Gets a header value by name.
    #[must_use]
    pub fn header(&self, name: impl AsRef<str>) -> Option<&HeaderValue> {
        self.headers.get(name.as_ref())
    }

    /// Gets a header value as a string.
    #[must_use]
    pub fn header_str(&self, name: impl AsRef<str>) -> Option<&str> {
        self.header(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the Content-Type header value.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header_str(header::CONTENT_TYPE.as_str())
    }

    /// Returns the raw body bytes.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the body as a string.
    pub fn text(&self) -> Result<String, TestError> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| TestError::BodyRead(format!("invalid UTF-8: {e}")))
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TestError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The `error` field of a `{"error": ...}` body, if the body has that shape.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        let value: serde_json::Value = self.json().ok()?;
        value.get("error")?.as_str().map(str::to_string)
    }

    // Assertion methods

    /// Asserts the status code.
    ///
    /// # Panics
    ///
    /// Panics if the status code doesn't match.
    pub fn assert_status(&self, expected: u16) -> &Self {
        assert_eq!(
            self.status.as_u16(),
            expected,
            "expected status {expected}, got {} (body: {})",
            self.status,
            String::from_utf8_lossy(&self.body)
        );
        self
    }

    /// Asserts that a header exists with the expected value.
    ///
    /// # Panics
    ///
    /// Panics if the header is missing or differs.
    pub fn assert_header(&self, name: impl AsRef<str>, expected: impl AsRef<str>) -> &Self {
        let name = name.as_ref();
        let expected = expected.as_ref();
        let actual = self
            .header_str(name)
            .unwrap_or_else(|| panic!("header '{name}' not found"));
        assert_eq!(actual, expected, "header '{name}'");
        self
    }

    /// Asserts that a header is absent.
    ///
    /// # Panics
    ///
    /// Panics if the header is present.
    pub fn assert_no_header(&self, name: impl AsRef<str>) -> &Self {
        let name = name.as_ref();
        assert!(
            self.header(name).is_none(),
            "header '{name}' should be absent, got {:?}",
            self.header(name)
        );
        self
    }

    /// Asserts that the body equals the expected string.
    ///
    /// # Panics
    ///
    /// Panics if the body doesn't match.
    pub fn assert_body_eq(&self, expected: impl AsRef<str>) -> &Self {
        assert_eq!(
            String::from_utf8_lossy(&self.body),
            expected.as_ref(),
            "body mismatch"
        );
        self
    }

    /// Asserts that the body contains the expected substring.
    ///
    /// # Panics
    ///
    /// Panics if the body doesn't contain the substring.
    pub fn assert_body_contains(&self, expected: impl AsRef<str>) -> &Self {
        let expected = expected.as_ref();
        let body = String::from_utf8_lossy(&self.body);
        assert!(
            body.contains(expected),
            "body should contain '{expected}', got: {body}"
        );
        self
    }

    /// Asserts a terminal-responder style error body: JSON content type and
    /// `{"error": expected}`.
    ///
    /// # Panics
    ///
    /// Panics if the body has another shape or message.
    pub fn assert_json_error(&self, expected: impl AsRef<str>) -> &Self {
        let content_type = self.content_type().unwrap_or_default();
        assert!(
            content_type.starts_with("application/json"),
            "expected a JSON error body, got content type '{content_type}'"
        );
        assert_eq!(
            self.error_message().as_deref(),
            Some(expected.as_ref()),
            "error message mismatch"
        );
        self
    }
}

impl fmt::Debug for TestResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_error(status: u16, message: &str) -> TestResponse {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        let body = serde_json::json!({ "error": message }).to_string();
        TestResponse::new(StatusCode::from_u16(status).unwrap(), headers, Bytes::from(body))
    }

    #[test]
    fn test_error_message() {
        let response = json_error(404, "Cannot GET /");
        assert_eq!(response.error_message().as_deref(), Some("Cannot GET /"));
        response
            .assert_status(404)
            .assert_json_error("Cannot GET /")
            .assert_no_header("content-encoding");
    }

    #[test]
    fn test_plain_body_has_no_error_message() {
        let response = TestResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from("ok"));
        assert!(response.error_message().is_none());
        assert_eq!(response.text().unwrap(), "ok");
        assert!(response.json::<serde_json::Value>().is_err());
    }

    #[test]
    #[should_panic(expected = "expected status 200")]
    fn test_assert_status_panics() {
        json_error(500, "boom").assert_status(200);
    }

    #[test]
    fn test_from_response() {
        let res = strata_core::Response::new();
        res.set_status(201);
        res.set_header("X-Id", "7").unwrap();
        res.end_with("made");

        let captured = TestResponse::from_response(&res).unwrap();
        captured
            .assert_status(201)
            .assert_header("x-id", "7")
            .assert_body_eq("made");
        assert_eq!(captured.status_message(), Some("Created"));
    }

    #[test]
    fn test_from_response_rejects_bogus_status() {
        let res = strata_core::Response::new();
        res.set_status(7);
        assert!(matches!(
            TestResponse::from_response(&res),
            Err(TestError::InvalidStatus(7))
        ));
    }
}
