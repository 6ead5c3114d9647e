//! # Transport Port
//!
//! The broker connection the client drives. Implementations own the network
//! session; the client owns everything above it.
//!
//! ```text
//! RelayClient ──publish/subscribe──▶ Transport ──▶ broker
//!      ▲                                 │
//!      └──────── MessageHandler ◀────────┘  (inbound reader)
//! ```

use async_trait::async_trait;
use relay_types::{ConnectionError, QoS};
use std::sync::Arc;

/// One message as received from the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::default(),
            retain: false,
        }
    }
}

/// Receives inbound messages from the transport's reader.
///
/// Called once per network message. Implementations must return promptly;
/// the reader does not proceed until this returns.
///
/// Transports must poll `on_message` inside a tokio runtime. The client's
/// dispatcher schedules callbacks on the current runtime's blocking pool and
/// drops the message, logging a warning, when there is none.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, message: InboundMessage);
}

/// Broker connection (Driven Port).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens the session.
    async fn connect(&self) -> Result<(), ConnectionError>;

    /// Publishes bytes on a concrete topic.
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), ConnectionError>;

    /// Adds a network-level subscription. Messages on matching topics are
    /// passed to `handler`.
    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), ConnectionError>;

    /// Removes a network-level subscription.
    async fn unsubscribe(&self, filter: &str) -> Result<(), ConnectionError>;

    /// Stops the inbound reader and closes the session.
    async fn disconnect(&self) -> Result<(), ConnectionError>;
}
