//! Handler kinds and the continuation passed to them.
//!
//! A handler is registered as one of two kinds:
//!
//! - [`Handler::Normal`] runs while no error is pending: `(req, res, next)`
//! - [`Handler::ErrorHandling`] runs only while an error is pending:
//!   `(err, req, res, next)`
//!
//! A handler resumes the walk by consuming its [`Next`]. Returning without
//! consuming it ends the walk; the handler is then expected to have answered.
//!
//! # Example
//!
//! ```
//! use strata_middleware::{App, Handler};
//! use strata_core::StrataError;
//!
//! let app = App::new();
//! app.layer(Handler::normal(|req, _res, next| {
//!     if req.url().starts_with("/private") {
//!         return Err(StrataError::http(403, "forbidden").into());
//!     }
//!     next.run();
//!     Ok(())
//! }));
//! app.layer(Handler::error(|err, _req, res, _next| {
//!     res.set_status(err.status().unwrap_or(500));
//!     res.end_with(err.to_string());
//!     Ok(())
//! }));
//! ```

use crate::dispatch::{step, RewriteState, Walk};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_core::{Error, Request, Response, StrataError};

/// Result returned by handlers. An `Err` is caught by the dispatcher and
/// becomes the pending error for the rest of the walk.
pub type HandlerResult = Result<(), Error>;

/// The final continuation of a dispatch, run once the stack is exhausted.
pub type Done = Box<dyn FnOnce(Option<Error>) + Send>;

/// Signature of a normal handler.
pub type NormalFn = Arc<dyn Fn(Request, Response, Next) -> HandlerResult + Send + Sync>;

/// Signature of an error-handling handler.
pub type ErrorFn = Arc<dyn Fn(Error, Request, Response, Next) -> HandlerResult + Send + Sync>;

/// A registered handler.
#[derive(Clone)]
pub enum Handler {
    /// Invoked only when no error is pending.
    Normal(NormalFn),
    /// Invoked only when an error is pending.
    ErrorHandling(ErrorFn),
    /// Declared too many parameters to be either kind; never invoked.
    Inert {
        /// The declared parameter count.
        arity: usize,
    },
}

/// Arguments handed to a legacy handler classified with
/// [`Handler::from_arity`].
pub struct HandlerArgs {
    /// The pending error. Always `Some` for error handlers.
    pub error: Option<Error>,
    /// The request.
    pub req: Request,
    /// The response.
    pub res: Response,
    /// The continuation.
    pub next: Next,
}

impl Handler {
    /// Creates a normal handler.
    pub fn normal<F>(f: F) -> Self
    where
        F: Fn(Request, Response, Next) -> HandlerResult + Send + Sync + 'static,
    {
        Self::Normal(Arc::new(f))
    }

    /// Creates an error-handling handler.
    pub fn error<F>(f: F) -> Self
    where
        F: Fn(Error, Request, Response, Next) -> HandlerResult + Send + Sync + 'static,
    {
        Self::ErrorHandling(Arc::new(f))
    }

    /// Classifies a function by its declared parameter count: fewer than four
    /// parameters makes a normal handler, exactly four an error handler, and
    /// more than four an inert entry that is skipped.
    pub fn from_arity<F>(arity: usize, f: F) -> Self
    where
        F: Fn(HandlerArgs) -> HandlerResult + Send + Sync + 'static,
    {
        use std::cmp::Ordering::{Equal, Greater, Less};

        match arity.cmp(&4) {
            Less => Self::normal(move |req, res, next| {
                f(HandlerArgs {
                    error: None,
                    req,
                    res,
                    next,
                })
            }),
            Equal => Self::error(move |err, req, res, next| {
                f(HandlerArgs {
                    error: Some(err),
                    req,
                    res,
                    next,
                })
            }),
            Greater => Self::Inert { arity },
        }
    }

    /// Returns `true` for [`Handler::ErrorHandling`].
    #[must_use]
    pub const fn is_error_handler(&self) -> bool {
        matches!(self, Self::ErrorHandling(_))
    }

    /// Short kind name, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Normal(_) => "normal",
            Self::ErrorHandling(_) => "error",
            Self::Inert { .. } => "inert",
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inert { arity } => f.debug_struct("Inert").field("arity", arity).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// Something that dispatches whole exchanges and can be mounted in a stack.
///
/// [`App`](crate::App) implements this; so can any foreign server that wants
/// to live under a mount point.
pub trait Dispatch: Send + Sync + 'static {
    /// Handles an exchange. When `done` is given the implementation must call
    /// it (with the pending error, if any) to hand the exchange back.
    fn dispatch(&self, req: Request, res: Response, done: Option<Done>);

    /// Told the path this dispatcher was mounted at.
    fn set_mount_path(&self, _path: &str) {}
}

/// The continuation handed to each handler.
///
/// Consuming it resumes the walk at the entry after the current one, with
/// the URL restored to what the current mount point saw. A `Next` only
/// resumes once: if a clone was already used, later calls are ignored.
#[derive(Clone)]
pub struct Next {
    inner: Arc<NextInner>,
}

struct NextInner {
    resumed: AtomicBool,
    walk: Arc<Walk>,
    state: RewriteState,
}

impl Next {
    pub(crate) fn new(walk: Arc<Walk>, state: RewriteState) -> Self {
        Self {
            inner: Arc::new(NextInner {
                resumed: AtomicBool::new(false),
                walk,
                state,
            }),
        }
    }

    /// Continues with no error.
    pub fn run(self) {
        self.resume(None);
    }

    /// Continues with a new error; only error handlers run from here on.
    pub fn fail(self, err: impl Into<StrataError>) {
        self.resume(Some(Arc::new(err.into())));
    }

    /// Continues with the given error state. Error handlers use this to pass
    /// an error on (`Some`) or to recover from it (`None`).
    pub fn forward(self, error: Option<Error>) {
        self.resume(error);
    }

    /// Converts this continuation into a final continuation for a nested
    /// dispatcher.
    pub fn into_done(self) -> Done {
        Box::new(move |error| self.forward(error))
    }

    /// Returns `true` once this continuation (or a clone) has resumed.
    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.inner.resumed.load(Ordering::SeqCst)
    }

    fn resume(&self, error: Option<Error>) {
        if self.inner.resumed.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                index = self.inner.state.index(),
                error = ?error,
                "next() called more than once; ignoring"
            );
            return;
        }
        step(&self.inner.walk, &self.inner.state, error);
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("state", &self.inner.state)
            .field("resumed", &self.is_resumed())
            .finish()
    }
}
