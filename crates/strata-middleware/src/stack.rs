//! The handler stack.
//!
//! An [`App`] owns an ordered list of `(route, handler)` entries. Dispatching
//! an exchange walks the list in registration order, invoking every entry
//! whose route is a path-component prefix of the request path.

use crate::dispatch::{step, RewriteState, Walk};
use crate::handler::{Dispatch, Done, Handler};
use crate::responder::{finalhandler, ResponderOptions};
use crate::url::protohost;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use strata_core::{Environment, Request, Response};
use strata_telemetry::metrics::record_dispatch;

/// Environment variable consulted by [`App::new`].
pub const ENVIRONMENT_VAR: &str = "STRATA_ENV";

/// A registered `(route, handler)` pair.
#[derive(Debug)]
pub struct StackEntry {
    route: String,
    handler: Handler,
}

impl StackEntry {
    /// The mount route, without a trailing slash. The root route is `""`.
    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// The handler.
    #[must_use]
    pub const fn handler(&self) -> &Handler {
        &self.handler
    }
}

/// Anything that can be registered on a stack.
pub enum Mountable {
    /// A plain handler.
    Handler(Handler),
    /// A nested dispatcher, such as another [`App`].
    Dispatch(Arc<dyn Dispatch>),
}

impl Mountable {
    /// Wraps a foreign dispatcher.
    pub fn dispatch(dispatcher: impl Dispatch) -> Self {
        Self::Dispatch(Arc::new(dispatcher))
    }
}

impl From<Handler> for Mountable {
    fn from(handler: Handler) -> Self {
        Self::Handler(handler)
    }
}

impl From<App> for Mountable {
    fn from(app: App) -> Self {
        Self::Dispatch(Arc::new(app))
    }
}

impl fmt::Debug for Mountable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(handler) => f.debug_tuple("Handler").field(handler).finish(),
            Self::Dispatch(_) => f.write_str("Dispatch"),
        }
    }
}

/// An ordered handler stack.
///
/// `App` is a cheap handle; clones share the same stack. It can be mounted
/// inside another `App`, in which case its [`route`](Self::route) reports
/// where.
///
/// # Example
///
/// ```
/// use strata_middleware::{App, Handler};
///
/// let blog = App::new();
/// blog.layer(Handler::normal(|req, res, _next| {
///     res.end_with(format!("blog saw {}", req.url()));
///     Ok(())
/// }));
///
/// let app = App::new();
/// app.mount("/blog", blog.clone());
/// assert_eq!(blog.route(), "/blog");
/// assert_eq!(app.len(), 1);
/// ```
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

struct AppInner {
    stack: RwLock<Vec<Arc<StackEntry>>>,
    route: RwLock<String>,
    options: RwLock<ResponderOptions>,
}

impl App {
    /// Creates an empty stack whose environment is read from `STRATA_ENV`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_environment(Environment::from_env_var(ENVIRONMENT_VAR))
    }

    /// Creates an empty stack for the given environment.
    #[must_use]
    pub fn with_environment(environment: Environment) -> Self {
        Self::with_options(ResponderOptions::for_environment(environment))
    }

    /// Creates an empty stack with explicit terminal responder options.
    #[must_use]
    pub fn with_options(options: ResponderOptions) -> Self {
        Self {
            inner: Arc::new(AppInner {
                stack: RwLock::new(Vec::new()),
                route: RwLock::new("/".to_string()),
                options: RwLock::new(options),
            }),
        }
    }

    /// The environment the terminal responder runs in.
    #[must_use]
    pub fn environment(&self) -> Environment {
        self.inner.options.read().environment
    }

    /// Replaces the terminal responder options.
    pub fn set_options(&self, options: ResponderOptions) {
        *self.inner.options.write() = options;
    }

    /// A copy of the terminal responder options.
    #[must_use]
    pub fn responder_options(&self) -> ResponderOptions {
        self.inner.options.read().clone()
    }

    /// Registers `handler` under `route`.
    pub fn mount(&self, route: &str, handler: impl Into<Mountable>) -> &Self {
        self.register(Some(route), handler)
    }

    /// Registers `handler` at the root, so it sees every request.
    pub fn layer(&self, handler: impl Into<Mountable>) -> &Self {
        self.register(None, handler)
    }

    /// Appends an entry. `None` registers at `/`.
    ///
    /// A nested dispatcher is told its mount path, then wrapped so that its
    /// final continuation resumes this stack.
    pub fn register(&self, route: Option<&str>, handler: impl Into<Mountable>) -> &Self {
        let path = route.unwrap_or("/");

        let handler = match handler.into() {
            Mountable::Handler(handler) => handler,
            Mountable::Dispatch(dispatcher) => {
                dispatcher.set_mount_path(path);
                Handler::normal(move |req, res, next| {
                    dispatcher.dispatch(req, res, Some(next.into_done()));
                    Ok(())
                })
            }
        };

        let route = path.strip_suffix('/').unwrap_or(path).to_string();
        tracing::debug!(route = %route, kind = handler.kind(), "registered handler");
        self.inner
            .stack
            .write()
            .push(Arc::new(StackEntry { route, handler }));
        self
    }

    /// The path this stack was mounted at; `/` when it was never mounted.
    #[must_use]
    pub fn route(&self) -> String {
        self.inner.route.read().clone()
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.stack.read().len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.stack.read().is_empty()
    }

    /// The entry at `index`, if any.
    #[must_use]
    pub fn entry(&self, index: usize) -> Option<Arc<StackEntry>> {
        self.inner.stack.read().get(index).cloned()
    }

    /// Wraps this stack as a plain handler for another stack. Unlike
    /// mounting, the mount path is not recorded.
    #[must_use]
    pub fn as_handler(&self) -> Handler {
        let app = self.clone();
        Handler::normal(move |req, res, next| {
            app.handle(req, res, Some(next.into_done()));
            Ok(())
        })
    }

    /// Dispatches an exchange through the stack.
    ///
    /// With `done` absent the terminal responder answers whatever the stack
    /// leaves unanswered.
    pub fn handle(&self, req: Request, res: Response, done: Option<Done>) {
        if req.original_url().is_none() {
            record_dispatch();
        }
        req.ensure_original_url();

        let done = match done {
            Some(done) => done,
            None => finalhandler(req.clone(), res.clone(), self.responder_options()),
        };

        let protohost = protohost(&req.url()).unwrap_or_default().to_string();
        tracing::debug!(
            url = %req.url(),
            route = %self.route(),
            entries = self.len(),
            "dispatching"
        );

        let walk = Arc::new(Walk::new(self.clone(), req, res, protohost, done));
        step(&walk, &RewriteState::default(), None);
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatch for App {
    fn dispatch(&self, req: Request, res: Response, done: Option<Done>) {
        self.handle(req, res, done);
    }

    fn set_mount_path(&self, path: &str) {
        *self.inner.route.write() = path.to_string();
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("route", &self.route())
            .field("stack", &*self.inner.stack.read())
            .finish()
    }
}
