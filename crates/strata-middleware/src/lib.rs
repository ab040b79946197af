//! # Strata Middleware
//!
//! Handler stacks and the dispatcher that walks them.
//!
//! An [`App`] is an ordered list of handlers, each mounted at a path. Every
//! exchange walks the list in order:
//!
//! ```text
//! request ─▶ [/]  ─▶ [/blog] ─▶ [/blog/admin] ─▶ ... ─▶ terminal responder
//!             │        │ url "/blog/x" seen as "/x"
//!             └ error? only error handlers run from here on
//! ```
//!
//! - A route matches when it is a path-component prefix of the request path
//!   (case-insensitive, followed by `/`, `.` or the end of the path).
//! - While a handler runs, its route is stripped from the request URL; the
//!   URL is restored when the walk continues.
//! - A failing handler (returned error or panic) turns the walk into an error
//!   walk. Normal handlers are skipped until an error handler recovers.
//! - If nothing answers, the terminal responder writes a JSON `404` or an
//!   error response.
//!
//! ## Example
//!
//! ```
//! use strata_middleware::{App, Handler};
//! use strata_core::StrataError;
//!
//! let app = App::new();
//! app.mount("/admin", Handler::normal(|_req, _res, _next| {
//!     Err(StrataError::http(401, "login required").into())
//! }));
//! app.layer(Handler::normal(|req, res, _next| {
//!     res.end_with(format!("hello from {}", req.url()));
//!     Ok(())
//! }));
//! assert_eq!(app.len(), 2);
//! ```

#![doc(html_root_url = "https://docs.rs/strata-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod dispatch;
mod handler;
mod invoke;
mod responder;
mod stack;
pub mod url;

// Re-export main types at crate root
pub use handler::{Dispatch, Done, ErrorFn, Handler, HandlerArgs, HandlerResult, Next, NormalFn};
pub use responder::{finalhandler, ErrorReporter, ResponderOptions};
pub use stack::{App, Mountable, StackEntry, ENVIRONMENT_VAR};
