//! Prometheus metrics for the relay client.
//!
//! All metrics follow the naming convention: `relay_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};

use crate::TelemetryError;

/// Label value for messages dropped because token verification failed.
pub const DROP_REASON_AUTH: &str = "auth";

lazy_static! {
    /// Crate metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Messages handed to the dispatcher by the transport
    pub static ref MESSAGES_RECEIVED: Counter = Counter::new(
        "relay_messages_received_total",
        "Total inbound messages received from the transport"
    ).expect("metric creation failed");

    /// Callback invocations scheduled
    pub static ref CALLBACKS_DISPATCHED: Counter = Counter::new(
        "relay_callbacks_dispatched_total",
        "Total subscriber callback invocations scheduled"
    ).expect("metric creation failed");

    /// Messages dropped before matching
    pub static ref MESSAGES_DROPPED: CounterVec = CounterVec::new(
        Opts::new("relay_messages_dropped_total", "Inbound messages dropped before dispatch"),
        &["reason"]  // reason: auth
    ).expect("metric creation failed");

    /// Bodies that failed to parse and fell back to raw text
    pub static ref DECODE_ERRORS: Counter = Counter::new(
        "relay_decode_errors_total",
        "Inbound bodies delivered with a decode error"
    ).expect("metric creation failed");

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Messages handed to the transport
    pub static ref MESSAGES_PUBLISHED: Counter = Counter::new(
        "relay_messages_published_total",
        "Total messages published"
    ).expect("metric creation failed");

    /// Active network-level subscriptions
    pub static ref NETWORK_SUBSCRIPTIONS: Gauge = Gauge::new(
        "relay_network_subscriptions",
        "Number of network-level filter subscriptions held"
    ).expect("metric creation failed");
}

/// Register all metrics with the crate registry.
///
/// Safe to call more than once; metrics that are already registered are
/// skipped.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Inbound
        Box::new(MESSAGES_RECEIVED.clone()),
        Box::new(CALLBACKS_DISPATCHED.clone()),
        Box::new(MESSAGES_DROPPED.clone()),
        Box::new(DECODE_ERRORS.clone()),
        // Outbound
        Box::new(MESSAGES_PUBLISHED.clone()),
        Box::new(NETWORK_SUBSCRIPTIONS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn gather_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
