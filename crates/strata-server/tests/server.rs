//! End-to-end tests over real sockets.

use std::net::SocketAddr;
use std::time::Duration;
use strata_core::{is_finished, on_finished, Environment, Response, StrataError};
use strata_middleware::{App, Handler, ResponderOptions};
use strata_server::{Server, ServerConfig, ShutdownSignal};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

struct Running {
    addr: SocketAddr,
    shutdown: ShutdownSignal,
    handle: JoinHandle<Result<(), strata_server::ServerError>>,
}

impl Running {
    async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), self.handle)
            .await
            .expect("server stops")
            .expect("server task")
            .expect("server result");
    }
}

async fn start(app: App, config: ServerConfig) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = ShutdownSignal::new();
    let handle = tokio::spawn(Server::new(app, config).serve(listener, shutdown.clone()));
    Running {
        addr,
        shutdown,
        handle,
    }
}

fn test_app() -> App {
    App::with_options(ResponderOptions::for_environment(Environment::Test))
}

/// Sends one raw request with `Connection: close` and returns the raw reply.
async fn roundtrip(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut buf))
        .await
        .expect("reply in time")
        .unwrap();
    String::from_utf8(buf).unwrap()
}

fn body_of(reply: &str) -> &str {
    reply.split("\r\n\r\n").nth(1).unwrap_or_default()
}

#[tokio::test]
async fn test_mounted_handler_answers() {
    let app = test_app();
    app.mount(
        "/blog",
        Handler::normal(|req, res, _next| {
            res.set_header("Content-Type", "text/plain")?;
            res.end_with(format!("blog saw {}", req.url()));
            Ok(())
        }),
    );
    let server = start(app, ServerConfig::default()).await;

    let reply = roundtrip(
        server.addr,
        "GET /blog/post/1 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(reply.starts_with("HTTP/1.1 200"), "{reply}");
    assert_eq!(body_of(&reply), "blog saw /post/1");

    server.stop().await;
}

#[tokio::test]
async fn test_unmatched_route_gets_json_404() {
    let server = start(test_app(), ServerConfig::default()).await;

    let reply = roundtrip(
        server.addr,
        "GET /missing?q=<x> HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(reply.starts_with("HTTP/1.1 404"), "{reply}");
    let lower = reply.to_ascii_lowercase();
    assert!(lower.contains("content-type: application/json; charset=utf-8"));
    assert!(lower.contains("x-content-type-options: nosniff"));
    assert_eq!(body_of(&reply), r#"{"error":"Cannot GET /missing"}"#);

    server.stop().await;
}

#[tokio::test]
async fn test_error_status_reaches_client() {
    let app = test_app();
    app.layer(Handler::normal(|_req, _res, _next| {
        Err(StrataError::http(418, "short and stout").into())
    }));
    let server = start(app, ServerConfig::default()).await;

    let reply = roundtrip(
        server.addr,
        "GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(reply.starts_with("HTTP/1.1 418"), "{reply}");
    assert!(body_of(&reply).contains("short and stout"));

    server.stop().await;
}

#[tokio::test]
async fn test_post_body_is_streamed_to_handler() {
    let app = test_app();
    app.layer(Handler::normal(|req, res, _next| {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        req.pipe(tx);
        tokio::spawn(async move {
            let mut total = 0;
            while let Some(chunk) = rx.recv().await {
                total += chunk.len();
            }
            res.end_with(total.to_string());
        });
        Ok(())
    }));
    let server = start(app, ServerConfig::default()).await;

    let reply = roundtrip(
        server.addr,
        "POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Length: 11\r\nConnection: close\r\n\r\nhello world",
    )
    .await;
    assert!(reply.starts_with("HTTP/1.1 200"), "{reply}");
    assert_eq!(body_of(&reply), "11");

    server.stop().await;
}

#[tokio::test]
async fn test_keep_alive_serves_several_requests() {
    let app = test_app();
    app.layer(Handler::normal(|req, res, _next| {
        res.end_with(req.url());
        Ok(())
    }));
    let server = start(app, ServerConfig::default()).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /one HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut buf = [0_u8; 1024];
    let n = stream.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).ends_with("/one"));

    stream
        .write_all(b"GET /two HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(String::from_utf8_lossy(&rest).ends_with("/two"));

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_lets_in_flight_exchange_finish() {
    let app = test_app();
    app.layer(Handler::normal(|_req, res, _next| {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            res.end_with("late");
        });
        Ok(())
    }));
    let server = start(app, ServerConfig::default()).await;

    let client = tokio::spawn(roundtrip(
        server.addr,
        "GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    ));
    tokio::time::sleep(Duration::from_millis(30)).await;
    server.stop().await;

    let reply = client.await.unwrap();
    assert!(reply.starts_with("HTTP/1.1 200"), "{reply}");
    assert_eq!(body_of(&reply), "late");
}

#[tokio::test]
async fn test_client_disconnect_closes_exchange() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let app = test_app();
    app.layer(Handler::normal(move |_req, res, _next| {
        let tx = tx.clone();
        on_finished(&res, move |_, res: Response| {
            let _ = tx.send(is_finished(&res));
        });
        Ok(())
    }));
    let server = start(app, ServerConfig::default()).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /hang HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(stream);

    let seen = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("disconnect reported before the request timeout");
    assert_eq!(seen, Some(Some(true)));

    server.stop().await;
}
