//! The HTTP/1.1 acceptor.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::exchange::serve_exchange;
use crate::shutdown::{ConnectionToken, ConnectionTracker, ShutdownReceiver, ShutdownSignal};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use strata_middleware::App;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Serves an [`App`] over HTTP/1.1.
///
/// # Example
///
/// ```rust,no_run
/// use strata_middleware::{App, Handler};
/// use strata_server::{Server, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let app = App::new();
///     app.mount("/health", Handler::normal(|_req, res, _next| {
///         res.end_with("ok");
///         Ok(())
///     }));
///
///     let config = ServerConfig::builder().http_addr("127.0.0.1:8080").build();
///     Server::new(app, config).run().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Server {
    app: App,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Creates a server for `app`.
    #[must_use]
    pub fn new(app: App, config: ServerConfig) -> Self {
        Self {
            app,
            config: Arc::new(config),
        }
    }

    /// The application being served.
    #[must_use]
    pub fn app(&self) -> &App {
        &self.app
    }

    /// The server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds and serves until Ctrl+C or SIGTERM.
    pub async fn run(self) -> Result<(), ServerError> {
        let shutdown = ShutdownSignal::with_os_signals();
        self.run_with_shutdown(shutdown).await
    }

    /// Binds the configured address and serves until `shutdown` fires.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let addr = self
            .config
            .socket_addr()
            .map_err(|e| ServerError::InvalidAddress {
                addr: self.config.http_addr().to_string(),
                reason: e.to_string(),
            })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        self.serve(listener, shutdown).await
    }

    /// Serves connections from an already bound listener until `shutdown`
    /// fires, then waits up to the shutdown timeout for open connections.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Strata server listening");

        let tracker = ConnectionTracker::new();
        let limit = self.config.max_connections().map(|n| Arc::new(Semaphore::new(n)));
        let mut stop = shutdown.subscribe();

        loop {
            let permit = match &limit {
                Some(semaphore) => tokio::select! {
                    permit = Arc::clone(semaphore).acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                    () = stop.recv() => break,
                },
                None => None,
            };

            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        tracing::debug!(remote = %remote, "accepted connection");
                        let connection = ConnectionTask {
                            app: self.app.clone(),
                            config: Arc::clone(&self.config),
                            shutdown: shutdown.subscribe(),
                            _token: tracker.acquire(),
                            _permit: permit,
                        };
                        tokio::spawn(connection.run(stream, remote));
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to accept connection");
                    }
                },
                () = stop.recv() => break,
            }
        }

        drop(listener);
        tracing::info!("stopped accepting connections");

        let active = tracker.count();
        if active > 0 {
            tracing::info!(active, "waiting for open connections");
            let drained =
                tokio::time::timeout(self.config.shutdown_timeout(), tracker.wait_idle()).await;
            if drained.is_err() {
                tracing::warn!(
                    remaining = tracker.count(),
                    "shutdown timeout elapsed with connections still open"
                );
            }
        }

        tracing::info!("Strata server stopped");
        Ok(())
    }
}

/// One accepted TCP connection, holding its tracker token and limit permit.
struct ConnectionTask {
    app: App,
    config: Arc<ServerConfig>,
    shutdown: ShutdownReceiver,
    _token: ConnectionToken,
    _permit: Option<OwnedSemaphorePermit>,
}

impl ConnectionTask {
    async fn run(mut self, stream: TcpStream, remote: SocketAddr) {
        let app = self.app.clone();
        let timeout = self.config.request_timeout();
        let service = service_fn(move |request| serve_exchange(app.clone(), request, remote, timeout));

        let connection = http1::Builder::new()
            .keep_alive(self.config.keep_alive())
            .serve_connection(TokioIo::new(stream), service);
        tokio::pin!(connection);

        let result = tokio::select! {
            result = connection.as_mut() => result,
            () = self.shutdown.recv() => {
                connection.as_mut().graceful_shutdown();
                connection.await
            }
        };

        if let Err(err) = result {
            tracing::debug!(remote = %remote, error = %err, "connection closed with error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_invalid_address() {
        let config = ServerConfig::builder().http_addr("not an address").build();
        let result = Server::new(App::new(), config)
            .run_with_shutdown(ShutdownSignal::new())
            .await;
        assert!(matches!(result, Err(ServerError::InvalidAddress { .. })));
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = ShutdownSignal::new();
        let server = Server::new(App::new(), ServerConfig::default());
        let handle = tokio::spawn(server.serve(listener, shutdown.clone()));

        shutdown.trigger();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_connection_limit_still_serves() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = ShutdownSignal::new();
        let config = ServerConfig::builder()
            .max_connections(Some(1))
            .shutdown_timeout(Duration::from_millis(100))
            .build();
        let handle = tokio::spawn(Server::new(App::new(), config).serve(listener, shutdown.clone()));

        let mut first = TcpStream::connect(addr).await.unwrap();
        first
            .write_all(b"GET /a HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut buf = Vec::new();
        first.read_to_end(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf).starts_with("HTTP/1.1 404"));

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
