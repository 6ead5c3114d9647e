//! # Relay Client
//!
//! Owns the transport handle, the subscription registry and the signing
//! envelope, and exposes the application-facing operations.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected ──close──▶ Closing ──▶ Closed
//!       ▲                        │
//!       └──────── error ─────────┘
//! ```
//!
//! `Closed` is terminal. Publish and subscribe require `Connected`.
//!
//! ## Dispatch
//!
//! The [`Dispatcher`] is the transport's [`MessageHandler`]. For every inbound
//! message it decodes (verifying signed tokens), snapshots the registry, and
//! hands each eligible subscriber its own copy of the payload on tokio's
//! blocking pool. The transport reader never waits on a callback.

use crate::codec;
use crate::config::ClientConfig;
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::security::SecureEnvelope;
use crate::topic::{prefixed_topic, TopicFilter};
use crate::transport::{InboundMessage, MessageHandler, Transport};
use async_trait::async_trait;
use parking_lot::RwLock;
use relay_telemetry::{
    metric_inc, CALLBACKS_DISPATCHED, DECODE_ERRORS, DROP_REASON_AUTH, MESSAGES_DROPPED,
    MESSAGES_PUBLISHED, MESSAGES_RECEIVED, NETWORK_SUBSCRIPTIONS,
};
use relay_types::{
    ClientError, ConnectionError, ConnectionState, Payload, QoS, RoutingError, Value,
};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Routes inbound messages to registered subscribers.
pub struct Dispatcher {
    registry: SubscriptionRegistry,
    envelope: SecureEnvelope,
    value_key: String,
}

impl Dispatcher {
    pub fn new(envelope: SecureEnvelope, value_key: impl Into<String>) -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            envelope,
            value_key: value_key.into(),
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Decodes `message` and schedules one callback per eligible subscriber.
    ///
    /// Returns the number of callbacks scheduled. Signed messages that fail
    /// verification are dropped before matching and yield 0, as does any
    /// message dispatched outside a tokio runtime.
    pub fn dispatch(&self, message: &InboundMessage) -> usize {
        metric_inc!(MESSAGES_RECEIVED);

        let Some(payload) = self.decode(message) else {
            return 0;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(topic = %message.topic, "No tokio runtime, message not dispatched");
            return 0;
        };

        let mut dispatched = 0;
        for route in self.registry.snapshot_matching(&message.topic) {
            for (subscriber_id, subscription) in route.subscribers {
                // Signing requirement unmet: routing decision, not a fault.
                if !subscription.accepts(payload.validated) {
                    continue;
                }

                let mut delivery = payload.clone();
                delivery.matched_filter = route.filter.to_string();
                delivery.wildcard_elements = route.wildcard_elements.clone();

                runtime.spawn_blocking(move || run_callback(&subscriber_id, &subscription, delivery));
                dispatched += 1;
            }
        }

        CALLBACKS_DISPATCHED.inc_by(dispatched as f64);
        debug!(topic = %message.topic, callbacks = dispatched, "Message dispatched");
        dispatched
    }

    /// Builds the payload shared by every delivery of `message`.
    fn decode(&self, message: &InboundMessage) -> Option<Payload> {
        let mut payload = Payload::new(message.topic.clone());
        payload.qos = message.qos;
        payload.retain = message.retain;

        if self.envelope.is_signed(&message.payload) {
            let text = String::from_utf8_lossy(&message.payload);
            match self.envelope.verify(&text, &self.value_key) {
                Ok(fields) => {
                    payload.fields = fields;
                    payload.validated = true;
                }
                Err(e) => {
                    metric_inc!(MESSAGES_DROPPED, &[DROP_REASON_AUTH]);
                    warn!(topic = %message.topic, error = %e, "Signed message dropped");
                    return None;
                }
            }
        } else {
            let decoded = codec::decode(&message.payload, &self.value_key);
            if let Some(error) = &decoded.error {
                metric_inc!(DECODE_ERRORS);
                debug!(topic = %message.topic, error = %error, "Delivering undecodable body as text");
            }
            payload.fields = decoded.fields;
            payload.reply_topic = decoded.reply_topic;
            payload.reply_signed = decoded.reply_signed;
            payload.decode_error = decoded.error;
        }

        Some(payload)
    }
}

#[async_trait]
impl MessageHandler for Dispatcher {
    async fn on_message(&self, message: InboundMessage) {
        self.dispatch(&message);
    }
}

/// Runs one callback, containing any panic it raises.
fn run_callback(subscriber_id: &str, subscription: &Subscription, payload: Payload) {
    let topic = payload.topic.clone();
    if panic::catch_unwind(AssertUnwindSafe(|| subscription.invoke(payload))).is_err() {
        warn!(
            subscriber_id = subscriber_id,
            filter = %subscription.filter,
            topic = %topic,
            "Subscriber callback panicked"
        );
    }
}

/// Publish/subscribe client over a [`Transport`].
pub struct RelayClient<T: Transport> {
    transport: Arc<T>,
    dispatcher: Arc<Dispatcher>,
    envelope: SecureEnvelope,
    config: ClientConfig,
    state: RwLock<ConnectionState>,
    /// Serializes registry changes with the network call they imply.
    subscription_lock: Mutex<()>,
}

impl<T: Transport> RelayClient<T> {
    /// Creates a disconnected client.
    ///
    /// # Errors
    ///
    /// `ClientError::Configuration` if `config` fails validation.
    pub fn new(transport: Arc<T>, config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let envelope = SecureEnvelope::from_config(&config);
        let dispatcher = Arc::new(Dispatcher::new(envelope.clone(), config.value_key.clone()));

        Ok(Self {
            transport,
            dispatcher,
            envelope,
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            subscription_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        self.dispatcher.registry()
    }

    /// The handler registered with the transport for every network
    /// subscription.
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// Connects the transport.
    ///
    /// A failed attempt returns to `Disconnected` so the caller may retry.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.transition(&[ConnectionState::Disconnected], ConnectionState::Connecting)?;

        if let Err(e) = self.transport.connect().await {
            *self.state.write() = ConnectionState::Disconnected;
            warn!(client_id = %self.config.client_id, error = %e, "Connect failed");
            return Err(e.into());
        }

        *self.state.write() = ConnectionState::Connected;
        info!(client_id = %self.config.client_id, "Client connected");
        Ok(())
    }

    /// Shuts the client down. Terminal.
    ///
    /// Drops every registration, unsubscribes each filter at the network
    /// level and disconnects the transport. Callbacks already scheduled are
    /// left to finish. Transport failures during shutdown are logged and do
    /// not stop it.
    ///
    /// Waits for in-flight subscribe and unsubscribe calls before leaving
    /// `Connected`, so their network calls complete first.
    pub async fn close(&self) -> Result<(), ClientError> {
        let _guard = self.subscription_lock.lock().await;
        let previous = self.transition(
            &[ConnectionState::Connected, ConnectionState::Disconnected],
            ConnectionState::Closing,
        )?;

        if previous == ConnectionState::Connected {
            for filter in self.dispatcher.registry().clear() {
                match self.transport.unsubscribe(filter.as_str()).await {
                    Ok(()) => NETWORK_SUBSCRIPTIONS.dec(),
                    Err(e) => warn!(filter = %filter, error = %e, "Unsubscribe failed during close"),
                }
            }

            if let Err(e) = self.transport.disconnect().await {
                warn!(error = %e, "Transport disconnect failed");
            }
        } else {
            self.dispatcher.registry().clear();
        }

        *self.state.write() = ConnectionState::Closed;
        info!(client_id = %self.config.client_id, "Client closed");
        Ok(())
    }

    /// Publishes `value` on `topic`. Returns the bytes handed to the
    /// transport.
    pub async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        value: impl Into<Value>,
    ) -> Result<Vec<u8>, ClientError> {
        self.send(topic, qos, retain, value.into(), false).await
    }

    /// Publishes `value` wrapped in a signed token.
    ///
    /// # Errors
    ///
    /// `ConfigurationError::NoSecret` when no secret is configured.
    pub async fn publish_signed(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        value: impl Into<Value>,
    ) -> Result<Vec<u8>, ClientError> {
        self.send(topic, qos, retain, value.into(), true).await
    }

    /// Publishes `value` on the reply topic carried by `payload`, signed if
    /// the sender asked for it.
    ///
    /// # Errors
    ///
    /// `RoutingError::NoReplyTopic` if `payload` carries no reply topic.
    pub async fn reply(
        &self,
        payload: &Payload,
        qos: QoS,
        retain: bool,
        value: impl Into<Value>,
    ) -> Result<Vec<u8>, ClientError> {
        let topic = payload
            .reply_topic
            .as_deref()
            .ok_or(RoutingError::NoReplyTopic)?;

        self.send(topic, qos, retain, value.into(), payload.reply_signed)
            .await
    }

    async fn send(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        value: Value,
        signed: bool,
    ) -> Result<Vec<u8>, ClientError> {
        self.ensure_connected()?;

        let bytes = if signed {
            self.envelope.sign(&value)?.into_bytes()
        } else {
            codec::encode(&value)?
        };

        let topic = prefixed_topic(self.config.publish_prefix.as_deref(), topic);
        self.transport
            .publish(&topic, qos, retain, bytes.clone())
            .await?;

        metric_inc!(MESSAGES_PUBLISHED);
        debug!(topic = %topic, signed = signed, bytes = bytes.len(), "Message published");
        Ok(bytes)
    }

    /// Registers `callback` for `subscriber_id` on `filter`.
    ///
    /// Replaces any earlier registration of the same subscriber on the same
    /// filter. The first subscriber on a filter triggers one network-level
    /// subscribe; if that fails the registration is rolled back.
    pub async fn subscribe<F>(
        &self,
        subscriber_id: &str,
        filter: &str,
        qos: QoS,
        requires_signed: bool,
        callback: F,
    ) -> Result<(), ClientError>
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        self.ensure_connected()?;

        let filter = TopicFilter::with_prefix(self.config.subscribe_prefix.as_deref(), filter)?;
        let subscription =
            Subscription::new(filter.clone(), qos, requires_signed, Arc::new(callback));

        let _guard = self.subscription_lock.lock().await;
        // The client may have closed while this call waited for the lock.
        self.ensure_connected()?;
        let is_new = self.dispatcher.registry().upsert(subscriber_id, subscription);
        debug!(
            subscriber_id = subscriber_id,
            filter = %filter,
            new_filter = is_new,
            "Subscriber registered"
        );

        if !is_new {
            return Ok(());
        }

        let handler: Arc<dyn MessageHandler> = self.dispatcher.clone();
        if let Err(e) = self.transport.subscribe(filter.as_str(), qos, handler).await {
            self.dispatcher
                .registry()
                .remove_one(filter.as_str(), subscriber_id);
            warn!(filter = %filter, error = %e, "Network subscribe failed");
            return Err(e.into());
        }

        NETWORK_SUBSCRIPTIONS.inc();
        Ok(())
    }

    /// Removes `subscriber_id` from `filter`. The network subscription is
    /// dropped once the filter has no subscribers left.
    pub async fn unsubscribe(&self, subscriber_id: &str, filter: &str) -> Result<(), ClientError> {
        let filter = prefixed_topic(self.config.subscribe_prefix.as_deref(), filter);

        let _guard = self.subscription_lock.lock().await;
        if !self.dispatcher.registry().remove_one(&filter, subscriber_id) {
            return Ok(());
        }
        debug!(subscriber_id = subscriber_id, filter = %filter, "Subscriber removed");

        if self.dispatcher.registry().is_empty(&filter) {
            self.unsubscribe_network(&filter).await?;
        }
        Ok(())
    }

    /// Removes `id` from every filter, or every subscriber whose id starts
    /// with `id` when `is_prefix` is set.
    ///
    /// Every emptied filter is unsubscribed at the network level. Failures do
    /// not stop the remaining unsubscribes; the first one is returned.
    pub async fn unsubscribe_all(&self, id: &str, is_prefix: bool) -> Result<(), ClientError> {
        let _guard = self.subscription_lock.lock().await;
        let affected = self
            .dispatcher
            .registry()
            .remove_all_for_subscriber(id, is_prefix);
        debug!(subscriber_id = id, prefix = is_prefix, filters = affected.len(), "Subscriber removed from all filters");

        let mut first_error = None;
        for filter in affected {
            if !self.dispatcher.registry().is_empty(filter.as_str()) {
                continue;
            }
            if let Err(e) = self.unsubscribe_network(filter.as_str()).await {
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn unsubscribe_network(&self, filter: &str) -> Result<(), ClientError> {
        if !self.state().is_connected() {
            return Ok(());
        }

        match self.transport.unsubscribe(filter).await {
            Ok(()) => {
                NETWORK_SUBSCRIPTIONS.dec();
                Ok(())
            }
            Err(e) => {
                warn!(filter = filter, error = %e, "Network unsubscribe failed");
                Err(e.into())
            }
        }
    }

    fn ensure_connected(&self) -> Result<(), ConnectionError> {
        let state = self.state();
        if state.is_connected() {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected { state })
        }
    }

    /// Moves to `to` if the current state is one of `from`. Returns the state
    /// that was left.
    fn transition(
        &self,
        from: &[ConnectionState],
        to: ConnectionState,
    ) -> Result<ConnectionState, ConnectionError> {
        let mut state = self.state.write();
        if !from.contains(&state) {
            return Err(ConnectionError::InvalidTransition { from: *state, to });
        }
        let previous = *state;
        *state = to;
        Ok(previous)
    }
}

impl<T: Transport> std::fmt::Debug for RelayClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("registry", self.dispatcher.registry())
            .finish_non_exhaustive()
    }
}
