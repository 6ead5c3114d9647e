//! # In-Memory Broker
//!
//! Loopback [`Transport`]: published bytes are delivered straight back to the
//! handlers of matching network subscriptions in this process.
//!
//! Every call is recorded so tests can assert on network-level traffic. A
//! handler registered under several matching filters receives a message once,
//! the way a broker delivers one copy per session.

use crate::topic::match_topic;
use crate::transport::{InboundMessage, MessageHandler, Transport};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use relay_types::{ConnectionError, QoS};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// One publish as seen by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

struct NetworkSubscription {
    qos: QoS,
    handler: Arc<dyn MessageHandler>,
}

/// In-process broker.
#[derive(Default)]
pub struct InMemoryBroker {
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_subscribe: AtomicBool,

    /// Network subscriptions by filter.
    subscriptions: RwLock<HashMap<String, NetworkSubscription>>,

    /// Publish log, oldest first.
    published: Mutex<Vec<PublishedMessage>>,

    subscribe_calls: AtomicU64,
    unsubscribe_calls: AtomicU64,
    disconnect_calls: AtomicU64,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `connect` calls fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `subscribe` calls fail.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Delivers `message` to every distinct handler with a matching network
    /// subscription. Returns the number of handlers reached.
    pub async fn deliver(&self, message: InboundMessage) -> usize {
        let handlers: Vec<Arc<dyn MessageHandler>> = {
            let subscriptions = self.subscriptions.read();
            let mut handlers: Vec<Arc<dyn MessageHandler>> = Vec::new();
            for (filter, subscription) in subscriptions.iter() {
                if match_topic(filter, &message.topic).is_none() {
                    continue;
                }
                if !handlers.iter().any(|h| same_handler(h, &subscription.handler)) {
                    handlers.push(subscription.handler.clone());
                }
            }
            handlers
        };

        for handler in &handlers {
            handler.on_message(message.clone()).await;
        }

        debug!(topic = %message.topic, handlers = handlers.len(), "Message delivered");
        handlers.len()
    }

    /// Messages published so far, oldest first.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    /// Filters with an active network subscription, sorted.
    #[must_use]
    pub fn network_filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = self.subscriptions.read().keys().cloned().collect();
        filters.sort();
        filters
    }

    /// QoS a filter was subscribed with.
    #[must_use]
    pub fn subscription_qos(&self, filter: &str) -> Option<QoS> {
        self.subscriptions.read().get(filter).map(|s| s.qos)
    }

    #[must_use]
    pub fn subscribe_calls(&self) -> u64 {
        self.subscribe_calls.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn unsubscribe_calls(&self) -> u64 {
        self.unsubscribe_calls.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn disconnect_calls(&self) -> u64 {
        self.disconnect_calls.load(Ordering::Relaxed)
    }

    fn ensure_connected(&self) -> Result<(), ConnectionError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ConnectionError::Transport("broker session not open".to_string()))
        }
    }
}

/// Compares handler identity by data pointer only.
fn same_handler(a: &Arc<dyn MessageHandler>, b: &Arc<dyn MessageHandler>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn connect(&self) -> Result<(), ConnectionError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ConnectionError::Transport("connection refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), ConnectionError> {
        self.ensure_connected()?;

        self.published.lock().push(PublishedMessage {
            topic: topic.to_string(),
            qos,
            retain,
            payload: payload.clone(),
        });

        self.deliver(InboundMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        })
        .await;
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), ConnectionError> {
        self.ensure_connected()?;
        self.subscribe_calls.fetch_add(1, Ordering::Relaxed);

        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(ConnectionError::Transport(format!(
                "subscribe to '{filter}' rejected"
            )));
        }

        self.subscriptions
            .write()
            .insert(filter.to_string(), NetworkSubscription { qos, handler });
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), ConnectionError> {
        self.ensure_connected()?;
        self.unsubscribe_calls.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.write().remove(filter);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.disconnect_calls.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::SeqCst);
        self.subscriptions.write().clear();
        Ok(())
    }
}
