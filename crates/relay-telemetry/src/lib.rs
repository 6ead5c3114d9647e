//! # Relay Telemetry
//!
//! Logging and metrics for the topic relay client.
//!
//! - **Logs**: `tracing-subscriber` with an `EnvFilter` and either JSON or
//!   human-readable output
//! - **Metrics**: Prometheus counters for the dispatch pipeline
//!
//! Library crates only emit `tracing` events and bump counters. Binaries call
//! [`init_telemetry`] once at startup.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use relay_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env()).expect("telemetry");
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `topic-relay` | Service name in log records |
//! | `RELAY_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `RELAY_JSON_LOGS` | `false` (`true` in containers) | JSON log output |
//! | `RELAY_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

mod config;
mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, DEFAULT_SERVICE_NAME};
pub use metrics::{
    gather_metrics, register_metrics, CALLBACKS_DISPATCHED, DECODE_ERRORS, DROP_REASON_AUTH,
    MESSAGES_DROPPED, MESSAGES_PUBLISHED, MESSAGES_RECEIVED, NETWORK_SUBSCRIPTIONS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and register metrics.
///
/// Returns a guard to hold for the lifetime of the application. A second call
/// in the same process fails with [`TelemetryError::LoggingInit`].
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first; they do not depend on the subscriber.
    register_metrics()?;
    logging::init_logging(&config)?;

    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    service_name: String,
}

impl TelemetryGuard {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry");
    }
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}
