//! Bridges one hyper request into a handler stack and back.
//!
//! Each exchange gets its own [`Connection`]. The request body is fed into
//! the [`Request`] by a separate task while the stack runs; the exchange is
//! answered once the [`Response`] finishes or its connection goes away.

use crate::error::ServerError;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, UPGRADE};
use http::{HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_core::{on_finished, Channel, Connection, Request, Response, StrataError};
use strata_middleware::App;
use strata_telemetry::metrics::{record_request, InFlightGuard};
use strata_telemetry::{log_exchange_aborted, log_exchange_complete, log_exchange_start};
use tokio::sync::oneshot;

/// Runs `request` through `app` and converts the outcome into a hyper
/// response.
///
/// Returns [`ServerError::Aborted`] when the stack committed headers but
/// never finished; hyper then drops the connection.
pub(crate) async fn serve_exchange<B>(
    app: App,
    request: http::Request<B>,
    remote: SocketAddr,
    timeout: Duration,
) -> Result<http::Response<Full<Bytes>>, ServerError>
where
    B: Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: Display,
{
    let started = Instant::now();
    let _in_flight = InFlightGuard::new();

    let conn = Connection::with_remote_addr(remote);
    let destroy = DestroyOnDrop(conn.clone());
    let channel: Arc<dyn Channel> = Arc::new(conn.clone());
    let (parts, body) = request.into_parts();
    let method = parts.method;

    let req = Request::with_channel(method.clone(), parts.uri.to_string(), Arc::clone(&channel));
    req.set_upgrade(parts.headers.contains_key(UPGRADE));
    req.set_headers(parts.headers);
    let res = Response::with_channel(channel);

    log_exchange_start!(conn.id(), method, req.url());

    let feeder = tokio::spawn(feed_body(body, req.clone(), conn.clone()));

    let (tx, rx) = oneshot::channel();
    on_finished(&res, move |error, _res: Response| {
        let _ = tx.send(error);
    });

    app.handle(req, res.clone(), None);

    let outcome = tokio::time::timeout(timeout, rx).await;
    feeder.abort();

    let result = match outcome {
        Ok(_) if res.finished() => Ok(finished_response(&res)),
        Ok(Ok(error)) => {
            let reason = error.map_or_else(
                || "connection closed before the response finished".to_string(),
                |e| e.to_string(),
            );
            unanswered(&res, StatusCode::INTERNAL_SERVER_ERROR, &reason)
        }
        Ok(Err(_)) => unanswered(
            &res,
            StatusCode::INTERNAL_SERVER_ERROR,
            "response was dropped before it finished",
        ),
        Err(_) => unanswered(&res, StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout"),
    };

    drop(destroy);

    let elapsed = started.elapsed();
    match &result {
        Ok(response) => {
            let status = response.status().as_u16();
            record_request(method.as_str(), status, elapsed);
            log_exchange_complete!(
                conn.id(),
                status,
                u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
            );
        }
        Err(err) => {
            log_exchange_aborted!(conn.id(), err);
        }
    }

    result
}

/// Destroys the exchange's connection when the exchange ends, including
/// when hyper drops the exchange because the client went away.
struct DestroyOnDrop(Connection);

impl Drop for DestroyOnDrop {
    fn drop(&mut self) {
        self.0.destroy();
    }
}

/// Pushes the hyper body into `req` until it ends or the connection closes.
async fn feed_body<B>(mut body: B, req: Request, conn: Connection)
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Display,
{
    while let Some(frame) = body.frame().await {
        if conn.is_destroyed() {
            return;
        }
        match frame {
            Ok(frame) => {
                if let Ok(data) = frame.into_data() {
                    req.push_chunk(data);
                }
            }
            Err(err) => {
                conn.fail(StrataError::channel(err.to_string()));
                return;
            }
        }
    }
    req.finish_body();
}

fn finished_response(res: &Response) -> http::Response<Full<Bytes>> {
    match res.to_http() {
        Ok(response) => response.map(Full::new),
        Err(err) => {
            tracing::warn!(error = %err, "handler set an invalid status");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
    }
}

fn unanswered(
    res: &Response,
    status: StatusCode,
    reason: &str,
) -> Result<http::Response<Full<Bytes>>, ServerError> {
    if res.headers_sent() {
        return Err(ServerError::Aborted);
    }
    Ok(json_error(status, reason))
}

/// A `{"error": reason}` response.
fn json_error(status: StatusCode, reason: &str) -> http::Response<Full<Bytes>> {
    let body = Bytes::from(serde_json::json!({ "error": reason }).to_string());
    let mut response = http::Response::new(Full::new(body.clone()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use http_body_util::Empty;
    use strata_core::Environment;
    use strata_middleware::{Handler, ResponderOptions};

    fn remote() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn test_app() -> App {
        App::with_options(ResponderOptions::for_environment(Environment::Test))
    }

    async fn body_text(response: http::Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(uri: &str) -> http::Request<Full<Bytes>> {
        http::Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_handler_response_is_returned() {
        let app = test_app();
        app.mount(
            "/hello",
            Handler::normal(|req, res, _next| {
                res.set_header("X-Url", &req.url())?;
                res.end_with("hi");
                Ok(())
            }),
        );

        let response = serve_exchange(app, get("/hello/world"), remote(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-url"], "/world");
        assert_eq!(body_text(response).await, "hi");
    }

    #[tokio::test]
    async fn test_unmatched_request_gets_404_json() {
        let response = serve_exchange(test_app(), get("/nope"), remote(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, r#"{"error":"Cannot GET /nope"}"#);
    }

    #[tokio::test]
    async fn test_request_body_reaches_handler() {
        let app = test_app();
        app.layer(Handler::normal(|req, res, _next| {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            req.pipe(tx);
            tokio::spawn(async move {
                let mut collected = Vec::new();
                while let Some(chunk) = rx.recv().await {
                    collected.extend_from_slice(&chunk);
                }
                res.end_with(collected);
            });
            Ok(())
        }));

        let request = http::Request::builder()
            .method(Method::POST)
            .uri("/echo")
            .body(Full::new(Bytes::from_static(b"payload")))
            .unwrap();
        let response = serve_exchange(app, request, remote(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "payload");
    }

    #[tokio::test]
    async fn test_timeout_answers_504() {
        let app = test_app();
        app.layer(Handler::normal(|_req, _res, _next| Ok(())));

        let request = http::Request::builder()
            .uri("/stuck")
            .body(Empty::<Bytes>::new())
            .unwrap();
        let response = serve_exchange(app, request, remote(), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_partial_response_aborts() {
        let app = test_app();
        app.layer(Handler::normal(|_req, res, _next| {
            res.write("partial");
            Ok(())
        }));

        let result = serve_exchange(app, get("/"), remote(), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(ServerError::Aborted)));
    }

    #[tokio::test]
    async fn test_invalid_status_becomes_500() {
        let app = test_app();
        app.layer(Handler::normal(|_req, res, _next| {
            res.set_status(42);
            res.end();
            Ok(())
        }));

        let response = serve_exchange(app, get("/"), remote(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_dropped_exchange_destroys_connection() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let app = test_app();
        app.layer(Handler::normal(move |_req, res, _next| {
            let tx = tx.clone();
            on_finished(&res, move |error, res: Response| {
                let _ = tx.send((error.is_none(), res.finished()));
            });
            Ok(())
        }));

        let exchange = serve_exchange(app, get("/"), remote(), Duration::from_secs(30));
        let outer = tokio::time::timeout(Duration::from_millis(20), exchange).await;
        assert!(outer.is_err());

        let seen = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(seen, Some((true, false)));
    }

    #[test]
    fn test_json_error_shape() {
        let response = json_error(StatusCode::BAD_GATEWAY, "upstream \"down\"");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "application/json; charset=utf-8"
        );
    }
}
