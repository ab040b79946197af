//! # Strata Server
//!
//! HTTP/1.1 server for Strata applications.
//!
//! Every request accepted by hyper is turned into a [`Request`]/[`Response`]
//! pair on a fresh [`Connection`] and dispatched into an [`App`]. The
//! exchange is answered once the response finishes. If the connection is
//! torn down first the client gets a `500` with a `{"error": ...}` body, and
//! a stack that takes longer than the request timeout gets a `504`.
//!
//! ## Graceful Shutdown
//!
//! [`Server::run`] stops on Ctrl+C or SIGTERM. [`Server::run_with_shutdown`]
//! and [`Server::serve`] take a [`ShutdownSignal`] instead. Either way the
//! accept loop stops first, in-flight exchanges are allowed to complete, and
//! the server returns once every connection closed or the shutdown timeout
//! elapsed.
//!
//! [`Request`]: strata_core::Request
//! [`Response`]: strata_core::Response
//! [`Connection`]: strata_core::Connection
//! [`App`]: strata_middleware::App

#![doc(html_root_url = "https://docs.rs/strata-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod exchange;
mod server;
mod shutdown;

pub use config::{
    ServerConfig, ServerConfigBuilder, DEFAULT_HTTP_ADDR, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};
pub use error::ServerError;
pub use server::Server;
pub use shutdown::{ConnectionToken, ConnectionTracker, ShutdownReceiver, ShutdownSignal};
