//! Handler invocation by kind.

use crate::handler::{Handler, HandlerResult, Next};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use strata_core::{Error, Request, Response, StrataError};
use strata_telemetry::metrics::{record_handler_failure, FailureKind};

/// Invokes `handler` if its kind fits the error state, otherwise passes the
/// error state straight on.
///
/// A handler that returns an error or panics never unwinds past this point:
/// the failure becomes the new error state and the walk continues with it.
pub(crate) fn invoke(
    handler: &Handler,
    route: &str,
    error: Option<Error>,
    req: Request,
    res: Response,
    next: Next,
) {
    let resume = next.clone();
    let outcome = match (handler, error) {
        (Handler::ErrorHandling(f), Some(err)) => {
            tracing::debug!(route, kind = "error", "invoking handler");
            guarded(|| f(err, req, res, next))
        }
        (Handler::Normal(f), None) => {
            tracing::debug!(route, kind = "normal", "invoking handler");
            guarded(|| f(req, res, next))
        }
        (_, error) => {
            next.forward(error);
            return;
        }
    };

    if let Err(failure) = outcome {
        tracing::debug!(route, error = %failure, "handler failed");
        resume.forward(Some(failure));
    }
}

fn guarded(f: impl FnOnce() -> HandlerResult) -> HandlerResult {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            record_handler_failure(FailureKind::Error);
            Err(err)
        }
        Err(payload) => {
            record_handler_failure(FailureKind::Panic);
            Err(Arc::new(StrataError::from_panic(payload.as_ref())))
        }
    }
}
