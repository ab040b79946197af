//! # Strata
//!
//! **Connect-style middleware dispatch for Rust HTTP servers**
//!
//! An application is an ordered stack of handlers, each mounted at a path
//! prefix. A request walks the stack; handlers whose prefix matches are
//! called with the prefix stripped from the URL. Errors switch the walk to
//! error handlers, and whatever is left unanswered at the end gets a JSON
//! `{"error": ...}` reply from the terminal responder.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strata::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = strata::create_server();
//!
//!     app.mount("/health", Handler::normal(|_req, res, _next| {
//!         res.end_with("ok");
//!         Ok(())
//!     }));
//!
//!     strata::listen(app, "127.0.0.1:8080").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! hyper ─▶ Server ─▶ App::handle ─▶ [route, handler] ... ─▶ finalhandler
//!                        │                                     │
//!                        └── on_finished(Response) ◀───────────┘
//! ```

#![doc(html_root_url = "https://docs.rs/strata/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use strata_config::StrataConfig;
use strata_middleware::{App, ResponderOptions};
use strata_server::{Server, ServerConfig, ServerError, ShutdownSignal};

// Re-export core types
pub use strata_core as core;

// Re-export middleware types
pub use strata_middleware as middleware;

// Re-export configuration
pub use strata_config as config;

// Re-export telemetry
pub use strata_telemetry as telemetry;

// Re-export server types
pub use strata_server as server;

/// Creates an empty application.
///
/// The environment is read from `STRATA_ENV` and decides how much detail the
/// terminal responder puts into error bodies.
#[must_use]
pub fn create_server() -> App {
    App::new()
}

/// Creates an application whose environment and responder follow `config`.
#[must_use]
pub fn create_server_with_config(config: &StrataConfig) -> App {
    App::with_options(ResponderOptions::for_environment(config.environment))
}

/// Serves `app` on `addr` until Ctrl+C or SIGTERM.
pub async fn listen(app: App, addr: impl Into<String>) -> Result<(), ServerError> {
    let config = ServerConfig::builder().http_addr(addr).build();
    Server::new(app, config).run().await
}

/// Builds the listener configuration from the application configuration.
#[must_use]
pub fn server_config(config: &StrataConfig) -> ServerConfig {
    ServerConfig::builder()
        .http_addr(config.server.http_addr.clone())
        .shutdown_timeout(config.shutdown_timeout())
        .request_timeout(config.request_timeout())
        .keep_alive(config.server.keep_alive)
        .max_connections(match config.server.max_connections {
            0 => None,
            n => usize::try_from(n).ok(),
        })
        .build()
}

/// Serves `app` with `config` until `shutdown` fires.
pub async fn serve(
    app: App,
    config: &StrataConfig,
    shutdown: ShutdownSignal,
) -> Result<(), ServerError> {
    tracing::info!(
        service.name = %config.service_name,
        environment = %config.environment,
        "starting"
    );
    Server::new(app, server_config(config))
        .run_with_shutdown(shutdown)
        .await
}

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use strata::prelude::*;
///
/// let app = App::new();
/// app.layer(Handler::normal(|_req, _res, next| {
///     next.run();
///     Ok(())
/// }));
/// ```
pub mod prelude {
    pub use strata_core::{
        on_finished, Connection, Environment, Error, Request, Response, StrataError, StrataResult,
    };

    pub use strata_middleware::{App, Dispatch, Done, Handler, Mountable, Next, ResponderOptions};

    pub use strata_config::{ConfigLoader, StrataConfig};

    pub use strata_server::{Server, ServerConfig, ShutdownSignal};
}
