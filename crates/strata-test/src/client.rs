//! In-memory client that drives an [`App`] without sockets.

use crate::error::TestError;
use crate::response::TestResponse;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{on_finished, Channel, Connection, Request, Response};
use strata_middleware::App;
use tokio::sync::oneshot;

/// How long [`TestClient`] waits for a response by default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends requests straight into an [`App`].
///
/// Each request runs on its own in-memory [`Connection`]. The body is fed
/// after the stack has been entered, the way it would arrive from the
/// network, and the client waits for the response to finish.
///
/// # Example
///
/// ```
/// use strata_middleware::{App, Handler};
/// use strata_test::TestClient;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let app = App::new();
/// app.mount("/ping", Handler::normal(|_req, res, _next| {
///     res.end_with("pong");
///     Ok(())
/// }));
///
/// let client = TestClient::new(app);
/// client.get("/ping").send().await.assert_status(200).assert_body_eq("pong");
/// client.get("/nope").send().await.assert_status(404);
/// # }
/// ```
#[must_use]
#[derive(Debug, Clone)]
pub struct TestClient {
    app: App,
    default_headers: Vec<(String, String)>,
    timeout: Duration,
}

impl TestClient {
    /// Creates a client for `app`.
    pub fn new(app: App) -> Self {
        Self {
            app,
            default_headers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Adds a header sent with every request.
    pub fn with_default_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Sets how long to wait for a response.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The application under test.
    #[must_use]
    pub fn app(&self) -> &App {
        &self.app
    }

    /// Starts a GET request.
    pub fn get(&self, url: impl Into<String>) -> TestRequest<'_> {
        self.request(Method::GET, url)
    }

    /// Starts a POST request.
    pub fn post(&self, url: impl Into<String>) -> TestRequest<'_> {
        self.request(Method::POST, url)
    }

    /// Starts a PUT request.
    pub fn put(&self, url: impl Into<String>) -> TestRequest<'_> {
        self.request(Method::PUT, url)
    }

    /// Starts a DELETE request.
    pub fn delete(&self, url: impl Into<String>) -> TestRequest<'_> {
        self.request(Method::DELETE, url)
    }

    /// Starts a HEAD request.
    pub fn head(&self, url: impl Into<String>) -> TestRequest<'_> {
        self.request(Method::HEAD, url)
    }

    /// Starts an OPTIONS request.
    pub fn options(&self, url: impl Into<String>) -> TestRequest<'_> {
        self.request(Method::OPTIONS, url)
    }

    /// Starts a request with any method.
    pub fn request(&self, method: Method, url: impl Into<String>) -> TestRequest<'_> {
        let mut request = TestRequest {
            client: self,
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            chunks: Vec::new(),
            error: None,
        };
        for (name, value) in &self.default_headers {
            request = request.header(name, value);
        }
        request
    }

    async fn execute(
        &self,
        method: Method,
        url: String,
        headers: HeaderMap,
        chunks: Vec<Bytes>,
    ) -> Result<TestResponse, TestError> {
        let conn = Connection::new();
        let channel: Arc<dyn Channel> = Arc::new(conn.clone());
        let req = Request::with_channel(method, url, Arc::clone(&channel));
        req.set_headers(headers);
        let res = Response::with_channel(channel);

        let (tx, rx) = oneshot::channel();
        on_finished(&res, move |error, _res: Response| {
            let _ = tx.send(error);
        });

        self.app.handle(req.clone(), res.clone(), None);

        for chunk in chunks {
            req.push_chunk(chunk);
        }
        req.finish_body();

        let outcome = tokio::time::timeout(self.timeout, rx).await;
        conn.destroy();

        match outcome {
            Err(_) => Err(TestError::Timeout(self.timeout)),
            Ok(_) if res.finished() => TestResponse::from_response(&res),
            Ok(Ok(Some(error))) => Err(TestError::Aborted(error.to_string())),
            Ok(_) => Err(TestError::Aborted(
                "connection closed before the response finished".to_string(),
            )),
        }
    }
}

/// A request being built by a [`TestClient`].
#[must_use]
pub struct TestRequest<'a> {
    client: &'a TestClient,
    method: Method,
    url: String,
    headers: HeaderMap,
    chunks: Vec<Bytes>,
    error: Option<TestError>,
}

impl<'a> TestRequest<'a> {
    /// Sets a header, replacing earlier values. An invalid header is reported
    /// when the request is sent.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        match (
            HeaderName::try_from(name),
            HeaderValue::try_from(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => {
                self.error
                    .get_or_insert_with(|| TestError::InvalidHeader(name.to_string()));
            }
        }
        self
    }

    /// Sets the request body, sent as a single chunk.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.chunks = vec![body.into()];
        self
    }

    /// Appends a body chunk. Chunks are delivered one by one.
    pub fn chunk(mut self, chunk: impl Into<Bytes>) -> Self {
        self.chunks.push(chunk.into());
        self
    }

    /// Serializes `value` as the JSON body and sets the content type.
    pub fn json<T: Serialize>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                self.headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                self.chunks = vec![Bytes::from(body)];
            }
            Err(err) => {
                self.error.get_or_insert(TestError::Json(err));
            }
        }
        self
    }

    /// Sends the request and waits for the response.
    ///
    /// # Panics
    ///
    /// Panics if the request is invalid or the exchange did not produce a
    /// response; use [`try_send`](Self::try_send) to inspect those cases.
    pub async fn send(self) -> TestResponse {
        let description = format!("{} {}", self.method, self.url);
        match self.try_send().await {
            Ok(response) => response,
            Err(err) => panic!("{description} failed: {err}"),
        }
    }

    /// Sends the request and returns a Result.
    pub async fn try_send(self) -> Result<TestResponse, TestError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.client
            .execute(self.method, self.url, self.headers, self.chunks)
            .await
    }
}
