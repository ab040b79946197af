//! The terminal responder.
//!
//! Runs when a walk falls off the end of the outermost stack. It answers
//! `404` when nothing handled the request, or an error response built from
//! the pending error. Bodies are always JSON: `{"error":"<message>"}`.

use crate::handler::Done;
use crate::url::{encode_url, pathname};
use http::header::{
    CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_LENGTH, CONTENT_RANGE,
    CONTENT_SECURITY_POLICY, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS,
};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::fmt;
use std::sync::Arc;
use strata_core::{
    defer, error_status, is_finished, on_finished, Environment, Error, Request, Response,
};
use strata_telemetry::metrics::record_terminal_response;

/// Callback told about every error that reaches the terminal responder.
pub type ErrorReporter = Arc<dyn Fn(&Error, &Request, &Response) + Send + Sync>;

/// Terminal responder settings.
#[derive(Clone)]
pub struct ResponderOptions {
    /// Production hides error details from response bodies.
    pub environment: Environment,
    /// Invoked on a later turn for every error.
    pub on_error: Option<ErrorReporter>,
}

impl ResponderOptions {
    /// Options for `environment`, reporting errors through `tracing` unless
    /// running tests.
    #[must_use]
    pub fn for_environment(environment: Environment) -> Self {
        let on_error: Option<ErrorReporter> = match environment {
            Environment::Test => None,
            _ => Some(Arc::new(log_error)),
        };
        Self {
            environment,
            on_error,
        }
    }

    /// Same options without an error reporter.
    #[must_use]
    pub fn silent(mut self) -> Self {
        self.on_error = None;
        self
    }

    /// Same options with a custom error reporter.
    #[must_use]
    pub fn with_reporter<F>(mut self, reporter: F) -> Self
    where
        F: Fn(&Error, &Request, &Response) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(reporter));
        self
    }
}

impl Default for ResponderOptions {
    fn default() -> Self {
        Self::for_environment(Environment::default())
    }
}

impl fmt::Debug for ResponderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponderOptions")
            .field("environment", &self.environment)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

fn log_error(err: &Error, req: &Request, _res: &Response) {
    tracing::error!(
        http.method = %req.method(),
        http.path = %req.original_url().unwrap_or_else(|| req.url()),
        error = %err.detail(),
        "unhandled error"
    );
}

/// Builds the final continuation that answers an exchange nobody answered.
pub fn finalhandler(req: Request, res: Response, options: ResponderOptions) -> Done {
    Box::new(move |error| respond(&req, &res, &options, error))
}

fn respond(req: &Request, res: &Response, options: &ResponderOptions, error: Option<Error>) {
    if error.is_none() && res.headers_sent() {
        tracing::debug!("cannot 404 after headers sent");
        return;
    }

    let (status, headers, message) = match &error {
        Some(err) => {
            let (status, headers) = match err.status_code() {
                Some(status) => (status, err.headers().cloned()),
                None => (response_status(res), None),
            };
            (status, headers, error_message(err, status, options.environment))
        }
        None => {
            let resource = req
                .original_url()
                .map(|url| pathname(&url).to_string())
                .unwrap_or_else(|| "resource".to_string());
            let message = format!("Cannot {} {}", req.method(), encode_url(&resource));
            (StatusCode::NOT_FOUND, None, message)
        }
    };

    if let (Some(err), Some(reporter)) = (&error, &options.on_error) {
        let (reporter, err, req, res) =
            (Arc::clone(reporter), Arc::clone(err), req.clone(), res.clone());
        defer(move || reporter(&err, &req, &res));
    }

    if res.headers_sent() {
        tracing::debug!(status = status.as_u16(), "cannot answer after headers sent");
        destroy_channel(req, res);
        return;
    }

    let reply = Reply {
        status,
        headers,
        message,
    };
    if is_finished(req) == Some(true) {
        reply.write(req, res);
        return;
    }

    req.unpipe();
    let res = res.clone();
    on_finished(req, move |_, req: Request| reply.write(&req, &res));
    req.resume();
}

fn response_status(res: &Response) -> StatusCode {
    error_status(res.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn error_message(err: &Error, status: StatusCode, environment: Environment) -> String {
    if !environment.is_production() {
        return err.detail();
    }
    status
        .canonical_reason()
        .unwrap_or("Unknown Error")
        .to_string()
}

fn destroy_channel(req: &Request, res: &Response) {
    if let Some(channel) = req.channel().or_else(|| res.channel()) {
        channel.destroy();
    }
}

struct Reply {
    status: StatusCode,
    headers: Option<HeaderMap>,
    message: String,
}

impl Reply {
    fn write(self, req: &Request, res: &Response) {
        if res.headers_sent() {
            tracing::debug!("response started while waiting for the request");
            destroy_channel(req, res);
            return;
        }

        let body = serde_json::json!({ "error": self.message }).to_string();

        res.set_status(self.status.as_u16());
        if let Some(reason) = self.status.canonical_reason() {
            res.set_status_message(reason);
        }

        let result = [CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_RANGE]
            .into_iter()
            .try_for_each(|name| res.remove_header(name.as_str()))
            .and_then(|()| match &self.headers {
                Some(headers) => res.extend_headers(headers),
                None => Ok(()),
            })
            .and_then(|()| {
                res.insert_header(
                    CONTENT_SECURITY_POLICY,
                    HeaderValue::from_static("default-src 'none'"),
                )?;
                res.insert_header(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"))?;
                res.insert_header(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/json; charset=utf-8"),
                )?;
                res.insert_header(CONTENT_LENGTH, HeaderValue::from(body.len()))
            });
        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to prepare terminal response");
            destroy_channel(req, res);
            return;
        }

        record_terminal_response(self.status.as_u16());
        if req.method() == Method::HEAD {
            res.end();
        } else {
            res.end_with(body);
        }
    }
}
