//! The dispatcher walk.
//!
//! One walk runs per dispatch of an exchange. Each step undoes the URL
//! rewrite of the previous match, finds the next entry whose route matches
//! the current path, strips the route from the URL and invokes the entry.
//! Entries that do not match are skipped in a loop, so a long run of
//! non-matching routes costs no stack depth.

use crate::handler::{Done, Next};
use crate::invoke::invoke;
use crate::stack::App;
use crate::url::pathname;
use parking_lot::Mutex;
use std::sync::Arc;
use strata_core::{defer, Error, Request, Response};

/// Shared state of one walk over a stack.
pub(crate) struct Walk {
    app: App,
    req: Request,
    res: Response,
    protohost: String,
    done: Mutex<Option<Done>>,
}

impl Walk {
    pub(crate) fn new(app: App, req: Request, res: Response, protohost: String, done: Done) -> Self {
        Self {
            app,
            req,
            res,
            protohost,
            done: Mutex::new(Some(done)),
        }
    }
}

/// Where a walk resumes, and which URL rewrite to undo before resuming.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RewriteState {
    index: usize,
    removed: String,
    slash_added: bool,
}

impl RewriteState {
    pub(crate) const fn index(&self) -> usize {
        self.index
    }
}

/// Case-insensitive literal prefix match that only succeeds at a `/`, `.` or
/// end-of-path boundary. The empty route matches everything.
pub(crate) fn matches_route(path: &str, route: &str) -> bool {
    let (path, route) = (path.as_bytes(), route.as_bytes());
    match path.get(..route.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(route) => {
            matches!(path.get(route.len()), None | Some(b'/' | b'.'))
        }
        _ => false,
    }
}

/// Resumes a walk with the given error state.
pub(crate) fn step(walk: &Arc<Walk>, state: &RewriteState, error: Option<Error>) {
    let req = &walk.req;
    let protohost = walk.protohost.as_str();

    if state.slash_added {
        let url = req.url();
        req.set_url(url.get(1..).unwrap_or_default());
    }
    if !state.removed.is_empty() {
        let url = req.url();
        let tail = url.get(protohost.len()..).unwrap_or_default();
        req.set_url(format!("{protohost}{}{tail}", state.removed));
    }

    let mut index = state.index;
    loop {
        let Some(entry) = walk.app.entry(index) else {
            let done = walk.done.lock().take();
            if let Some(done) = done {
                tracing::debug!(index, has_error = error.is_some(), "stack exhausted");
                defer(move || done(error));
            }
            return;
        };
        index += 1;

        let url = req.url();
        let path = match pathname(&url) {
            "" => "/",
            path => path,
        };
        let route = entry.route();
        if !matches_route(path, route) {
            tracing::trace!(route, path, "route does not match");
            continue;
        }

        let mut next_state = RewriteState {
            index,
            ..RewriteState::default()
        };
        if !route.is_empty() && route != "/" {
            let tail = url.get(protohost.len() + route.len()..).unwrap_or_default();
            let mut rewritten = format!("{protohost}{tail}");
            if protohost.is_empty() && !rewritten.starts_with('/') {
                rewritten.insert(0, '/');
                next_state.slash_added = true;
            }
            req.set_url(rewritten);
            next_state.removed = route.to_string();
        }

        let next = Next::new(Arc::clone(walk), next_state);
        invoke(
            entry.handler(),
            route,
            error,
            req.clone(),
            walk.res.clone(),
            next,
        );
        return;
    }
}
