//! # Strata Core
//!
//! Core types for the Strata request-dispatch framework.
//!
//! This crate provides the pieces every other Strata crate builds on:
//!
//! - [`Request`], [`Response`] and [`Connection`] - the exchange types
//! - [`StrataError`] - the failure type carried along a handler stack
//! - [`EventEmitter`] and the [`Emitter`] trait - named-event subscription
//! - [`first`] - first-event-wins aggregation with guaranteed cleanup
//! - [`on_finished`] / [`is_finished`] - exactly-once completion detection
//! - [`Environment`] - deployment environment
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use strata_core::{on_finished, Connection, Response};
//!
//! let conn = Connection::new();
//! let res = Response::with_channel(Arc::new(conn));
//!
//! on_finished(&res, |err, res: Response| {
//!     assert!(err.is_none());
//!     assert_eq!(res.body(), "done");
//! });
//! res.end_with("done");
//! ```

#![doc(html_root_url = "https://docs.rs/strata-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod connection;
mod environment;
mod error;
mod event;
mod finished;
mod first;
mod request;
mod response;
mod schedule;

pub use connection::Connection;
pub use environment::Environment;
pub use error::{error_status, Error, StrataError, StrataResult};
pub use event::{Emitter, Event, EventEmitter, Listener, ListenerId, Payload};
pub use finished::{is_finished, on_finished, Channel, CompletionSlot, MessageState, Subject};
pub use first::{first, EventGroup, Fired, FirstHandle};
pub use request::Request;
pub use response::Response;
pub use schedule::defer;
