//! # Signed Flows
//!
//! Signed envelopes between clients that share a secret, and the ways a
//! signed message is refused.
//!
//! ## Flows Tested:
//!
//! 1. **Sign → verify**: `publish_signed` reaches a signing-required subscriber
//! 2. **Access control**: unsigned traffic never reaches signing-required subscribers
//! 3. **Rejection**: wrong secret, expired token and tampered token are dropped
//! 4. **Reply**: a request asking for a signed reply gets one

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use relay_bus::security::current_timestamp;
    use relay_bus::{
        ClientConfig, InMemoryBroker, InboundMessage, Payload, QoS, RelayClient, SecureEnvelope,
    };
    use serde_json::json;

    const SECRET: &[u8] = b"plant-floor-secret";

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    async fn client_with_secret(
        broker: &Arc<InMemoryBroker>,
        client_id: &str,
        secret: &[u8],
    ) -> RelayClient<InMemoryBroker> {
        let config = ClientConfig::new(client_id).with_secret(secret.to_vec());
        let client = RelayClient::new(broker.clone(), config).unwrap();
        client.connect().await.unwrap();
        client
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Payload>) -> Payload {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for callback")
            .expect("callback channel closed")
    }

    /// Fails if anything else reaches `rx` within a short grace period.
    async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Payload>) {
        if let Ok(Some(payload)) = timeout(Duration::from_millis(200), rx.recv()).await {
            panic!("unexpected delivery on {}: {:?}", payload.topic, payload.fields);
        }
    }

    fn forward(tx: &mpsc::UnboundedSender<Payload>) -> impl Fn(Payload) + Send + Sync + 'static {
        let tx = tx.clone();
        move |payload| {
            let _ = tx.send(payload);
        }
    }

    /// Publishes a plain sentinel and waits for it, so anything dispatched
    /// before it has been scheduled too.
    async fn sentinel(
        client: &RelayClient<InMemoryBroker>,
        topic: &str,
        rx: &mut mpsc::UnboundedReceiver<Payload>,
    ) -> Payload {
        client
            .publish(topic, QoS::AtMostOnce, false, "sentinel")
            .await
            .unwrap();
        next(rx).await
    }

    // =============================================================================
    // SIGN → VERIFY
    // =============================================================================

    #[tokio::test]
    async fn test_signed_publish_reaches_signed_subscriber() {
        let broker = Arc::new(InMemoryBroker::new());
        let sender = client_with_secret(&broker, "blower-1", SECRET).await;
        let receiver = client_with_secret(&broker, "controller", SECRET).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        receiver
            .subscribe("ctl", "+/setpoint", QoS::AtMostOnce, true, forward(&tx))
            .await
            .unwrap();

        let wire = sender
            .publish_signed("blower-1/setpoint", QoS::AtMostOnce, false, json!({"rpm": 900}))
            .await
            .unwrap();
        assert!(wire.starts_with(b"jwt:"));

        let payload = next(&mut rx).await;
        assert!(payload.validated);
        assert_eq!(payload.value("v"), Some(&json!({"rpm": 900})));
        assert_eq!(payload.element(0), Some("blower-1"));
        assert!(payload.decode_error.is_none());
    }

    // =============================================================================
    // ACCESS CONTROL
    // =============================================================================

    #[tokio::test]
    async fn test_unsigned_traffic_never_reaches_signed_subscriber() {
        let broker = Arc::new(InMemoryBroker::new());
        let client = client_with_secret(&broker, "hub", SECRET).await;
        let (signed_tx, mut signed_rx) = mpsc::unbounded_channel();
        let (open_tx, mut open_rx) = mpsc::unbounded_channel();

        client
            .subscribe("secure", "cmd/#", QoS::AtMostOnce, true, forward(&signed_tx))
            .await
            .unwrap();
        client
            .subscribe("open", "cmd/#", QoS::AtMostOnce, false, forward(&open_tx))
            .await
            .unwrap();

        for i in 0..10 {
            client
                .publish("cmd/reboot", QoS::AtMostOnce, false, json!({"n": i}))
                .await
                .unwrap();
        }
        for _ in 0..10 {
            assert!(!next(&mut open_rx).await.validated);
        }

        assert_quiet(&mut signed_rx).await;
    }

    // =============================================================================
    // REJECTION
    // =============================================================================

    #[tokio::test]
    async fn test_wrong_secret_dropped_before_matching() {
        let broker = Arc::new(InMemoryBroker::new());
        let intruder = client_with_secret(&broker, "intruder", b"guessed").await;
        let receiver = client_with_secret(&broker, "controller", SECRET).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        receiver
            .subscribe("open", "cmd", QoS::AtMostOnce, false, forward(&tx))
            .await
            .unwrap();

        intruder
            .publish_signed("cmd", QoS::AtMostOnce, false, "shutdown")
            .await
            .unwrap();

        let payload = sentinel(&intruder, "cmd", &mut rx).await;
        assert_eq!(payload.value("v"), Some(&json!("sentinel")));
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn test_expired_token_dropped() {
        let broker = Arc::new(InMemoryBroker::new());
        let receiver = client_with_secret(&broker, "controller", SECRET).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        receiver
            .subscribe("open", "cmd", QoS::AtMostOnce, false, forward(&tx))
            .await
            .unwrap();

        let envelope = SecureEnvelope::new(
            Some(SECRET.to_vec()),
            "blower-1",
            Duration::from_secs(5),
            "jwt:",
        );
        let stale = envelope
            .sign_at(&json!("start"), current_timestamp() - 60)
            .unwrap();
        broker.deliver(InboundMessage::new("cmd", stale)).await;

        let payload = sentinel(&receiver, "cmd", &mut rx).await;
        assert_eq!(payload.value("v"), Some(&json!("sentinel")));
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn test_tampered_token_dropped() {
        let broker = Arc::new(InMemoryBroker::new());
        let receiver = client_with_secret(&broker, "controller", SECRET).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        receiver
            .subscribe("open", "cmd", QoS::AtMostOnce, false, forward(&tx))
            .await
            .unwrap();

        let envelope = SecureEnvelope::new(
            Some(SECRET.to_vec()),
            "blower-1",
            Duration::from_secs(5),
            "jwt:",
        );
        let token = envelope.sign(&json!("start")).unwrap();
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let forged = envelope.sign(&json!("stop")).unwrap();
        parts[1] = forged.split('.').nth(1).unwrap().to_string();
        broker
            .deliver(InboundMessage::new("cmd", parts.join(".")))
            .await;

        let payload = sentinel(&receiver, "cmd", &mut rx).await;
        assert_eq!(payload.value("v"), Some(&json!("sentinel")));
        assert_quiet(&mut rx).await;
    }

    // =============================================================================
    // REPLY
    // =============================================================================

    #[tokio::test]
    async fn test_signed_reply_between_clients() {
        let broker = Arc::new(InMemoryBroker::new());
        let device = Arc::new(client_with_secret(&broker, "blower-1", SECRET).await);
        let controller = client_with_secret(&broker, "controller", SECRET).await;

        let (request_tx, mut request_rx) = mpsc::unbounded_channel();
        device
            .subscribe("device", "blower-1/cmd/+", QoS::AtMostOnce, false, forward(&request_tx))
            .await
            .unwrap();

        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
        controller
            .subscribe("ctl", "controller/replies", QoS::AtMostOnce, true, forward(&reply_tx))
            .await
            .unwrap();

        controller
            .publish(
                "blower-1/cmd/mode",
                QoS::AtMostOnce,
                false,
                json!({"mode": "eco", "$reply": "controller/replies", "$signed": true}),
            )
            .await
            .unwrap();

        let request = next(&mut request_rx).await;
        assert_eq!(request.element(0), Some("mode"));
        assert_eq!(request.reply_topic.as_deref(), Some("controller/replies"));
        assert_eq!(request.value("mode"), Some(&json!("eco")));

        device
            .reply(&request, QoS::AtMostOnce, false, json!({"mode": "eco", "ok": true}))
            .await
            .unwrap();

        let reply = next(&mut reply_rx).await;
        assert!(reply.validated);
        assert_eq!(reply.value("v"), Some(&json!({"mode": "eco", "ok": true})));
    }
}
