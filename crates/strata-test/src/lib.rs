//! # Strata Test
//!
//! In-memory testing for Strata applications. Requests go through the
//! complete handler stack, terminal responder included, without binding a
//! port.
//!
//! ## Example
//!
//! ```ignore
//! use strata_test::TestClient;
//!
//! #[tokio::test]
//! async fn test_missing_route() {
//!     let client = TestClient::new(app);
//!
//!     client
//!         .get("/missing")
//!         .send()
//!         .await
//!         .assert_status(404)
//!         .assert_json_error("Cannot GET /missing");
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/strata-test/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod client;
mod error;
mod response;

pub use client::{TestClient, TestRequest, DEFAULT_TIMEOUT};
pub use error::TestError;
pub use response::TestResponse;
