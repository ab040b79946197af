//! Logging and metrics for Strata.
//!
//! - **Logging**: `tracing-subscriber` with JSON (production) or pretty
//!   (development) output and an `EnvFilter`
//! - **Metrics**: Prometheus-format metrics via the `metrics` crate
//!
//! The other Strata crates only emit `tracing` events and call the recording
//! functions in [`metrics`]; nothing is exported until the application calls
//! [`init_telemetry`] (or the individual initializers).
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_core::Environment;
//! use strata_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::builder()
//!     .service_name("blog")
//!     .environment(Environment::Production)
//!     .build();
//! init_telemetry(&config)?;
//! ```

#![doc(html_root_url = "https://docs.rs/strata-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, FailureKind, InFlightGuard, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    Ok(())
}
