//! # Dispatch Flows
//!
//! Plain (unsigned) traffic from `RelayClient::publish` through the loopback
//! broker to subscriber callbacks.
//!
//! ## Flows Tested:
//!
//! 1. **Overlapping filters**: every matching subscriber gets its own copy
//! 2. **Network subscription sharing**: one network subscribe per filter
//! 3. **Non-blocking dispatch**: a stuck callback does not hold up others
//! 4. **Client to client**: two clients on one broker

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use relay_bus::{ClientConfig, InMemoryBroker, InboundMessage, Payload, QoS, RelayClient};
    use serde_json::json;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    async fn connected_client(
        broker: &Arc<InMemoryBroker>,
        client_id: &str,
    ) -> RelayClient<InMemoryBroker> {
        let client = RelayClient::new(broker.clone(), ClientConfig::new(client_id)).unwrap();
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

    // =============================================================================
    // OVERLAPPING FILTERS
    // =============================================================================

    #[tokio::test]
    async fn test_overlapping_subscribers_get_independent_copies() {
        let broker = Arc::new(InMemoryBroker::new());
        let client = connected_client(&broker, "hub").await;
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, Payload)>();

        for (id, filter) in [
            ("exact", "site/dev1/temp"),
            ("single", "site/+/temp"),
            ("multi", "site/#"),
        ] {
            let tx = tx.clone();
            client
                .subscribe(id, filter, QoS::AtMostOnce, false, move |mut payload| {
                    // Each callback scribbles on its own copy.
                    payload.fields.insert("seen_by".to_string(), json!(id));
                    payload.wildcard_elements.push(id.to_string());
                    let _ = tx.send((id.to_string(), payload));
                })
                .await
                .unwrap();
        }

        client
            .publish("site/dev1/temp", QoS::AtMostOnce, false, 21.5)
            .await
            .unwrap();

        let mut deliveries = Vec::new();
        for _ in 0..3 {
            let delivery = timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            deliveries.push(delivery);
        }
        deliveries.sort_by(|a, b| a.0.cmp(&b.0));

        let ids: Vec<&str> = deliveries.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "multi", "single"]);

        for (id, payload) in &deliveries {
            assert_eq!(payload.value("v"), Some(&json!(21.5)));
            assert_eq!(payload.value("seen_by"), Some(&json!(id)));
            assert_eq!(payload.fields.len(), 2);
            assert_eq!(payload.wildcard_elements.last(), Some(id));
        }

        let (_, exact) = &deliveries[0];
        assert_eq!(exact.matched_filter, "site/dev1/temp");
        assert_eq!(exact.wildcard_elements, vec!["exact"]);

        let (_, multi) = &deliveries[1];
        assert_eq!(multi.matched_filter, "site/#");
        assert_eq!(multi.wildcard_elements, vec!["dev1/temp", "multi"]);

        let (_, single) = &deliveries[2];
        assert_eq!(single.matched_filter, "site/+/temp");
        assert_eq!(single.wildcard_elements, vec!["dev1", "single"]);
    }

    // =============================================================================
    // NETWORK SUBSCRIPTION SHARING
    // =============================================================================

    #[tokio::test]
    async fn test_shared_filter_network_lifecycle() {
        let broker = Arc::new(InMemoryBroker::new());
        let client = connected_client(&broker, "hub").await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        client
            .subscribe("ui", "+/keep_alive", QoS::AtMostOnce, false, forward(&tx))
            .await
            .unwrap();
        client
            .subscribe("watchdog", "+/keep_alive", QoS::AtMostOnce, false, forward(&tx))
            .await
            .unwrap();
        assert_eq!(broker.subscribe_calls(), 1);
        assert_eq!(broker.network_filters(), vec!["+/keep_alive".to_string()]);

        client.unsubscribe("ui", "+/keep_alive").await.unwrap();
        assert_eq!(broker.unsubscribe_calls(), 0);

        // The remaining subscriber still receives traffic.
        client
            .publish("dev9/keep_alive", QoS::AtMostOnce, false, "ok")
            .await
            .unwrap();
        let payload = next(&mut rx).await;
        assert_eq!(payload.element(0), Some("dev9"));

        client.unsubscribe("watchdog", "+/keep_alive").await.unwrap();
        assert_eq!(broker.unsubscribe_calls(), 1);
        assert!(broker.network_filters().is_empty());
        assert_eq!(client.registry().filter_count(), 0);
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_callback() {
        let broker = Arc::new(InMemoryBroker::new());
        let client = connected_client(&broker, "hub").await;
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();

        client
            .subscribe("svc", "jobs", QoS::AtMostOnce, false, forward(&old_tx))
            .await
            .unwrap();
        client
            .subscribe("svc", "jobs", QoS::AtLeastOnce, false, forward(&new_tx))
            .await
            .unwrap();
        assert_eq!(broker.subscribe_calls(), 1);

        client.publish("jobs", QoS::AtMostOnce, false, 1).await.unwrap();
        next(&mut new_rx).await;
        assert_quiet(&mut old_rx).await;
    }

    // =============================================================================
    // NON-BLOCKING DISPATCH
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocked_callback_does_not_stall_others() {
        let broker = Arc::new(InMemoryBroker::new());
        let client = connected_client(&broker, "hub").await;

        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = parking_lot::Mutex::new(release_rx);
        client
            .subscribe("stuck", "events", QoS::AtMostOnce, false, move |_| {
                let _ = release_rx.lock().recv();
            })
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        client
            .subscribe("fast", "events", QoS::AtMostOnce, false, forward(&tx))
            .await
            .unwrap();

        for i in 0..3 {
            client.publish("events", QoS::AtMostOnce, false, i).await.unwrap();
        }

        // All three arrive while the first "stuck" callback is still blocked.
        let mut values = Vec::new();
        for _ in 0..3 {
            values.push(next(&mut rx).await.fields["v"].as_i64().unwrap());
        }
        values.sort_unstable();
        assert_eq!(values, vec![0, 1, 2]);

        for _ in 0..3 {
            let _ = release_tx.send(());
        }
    }

    // =============================================================================
    // DECODING AT THE EDGE
    // =============================================================================

    #[tokio::test]
    async fn test_undecodable_body_still_delivered() {
        let broker = Arc::new(InMemoryBroker::new());
        let client = connected_client(&broker, "hub").await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        client
            .subscribe("raw", "legacy/#", QoS::AtMostOnce, false, forward(&tx))
            .await
            .unwrap();

        broker
            .deliver(InboundMessage::new("legacy/sensor", "{\"temp\": "))
            .await;

        let payload = next(&mut rx).await;
        assert!(payload.decode_error.is_some());
        assert_eq!(payload.value("v"), Some(&json!("{\"temp\": ")));
    }

    // =============================================================================
    // CLIENT TO CLIENT
    // =============================================================================

    #[tokio::test]
    async fn test_two_clients_share_broker() {
        let broker = Arc::new(InMemoryBroker::new());
        let device = connected_client(&broker, "device").await;
        let controller = connected_client(&broker, "controller").await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        controller
            .subscribe("monitor", "+/status", QoS::AtLeastOnce, false, forward(&tx))
            .await
            .unwrap();

        device
            .publish("blower1/status", QoS::AtLeastOnce, true, json!({"rpm": 1200}))
            .await
            .unwrap();

        let payload = next(&mut rx).await;
        assert_eq!(payload.topic, "blower1/status");
        assert_eq!(payload.value("rpm"), Some(&json!(1200)));
        assert_eq!(payload.qos, QoS::AtLeastOnce);
        assert!(payload.retain);
    }

    #[tokio::test]
    async fn test_concurrent_subscribers_and_publishers() {
        let broker = Arc::new(InMemoryBroker::new());
        let client = Arc::new(connected_client(&broker, "hub").await);

        let mut tasks = Vec::new();
        for i in 0..8 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                let id = format!("worker-{i}");
                for round in 0..20 {
                    client
                        .subscribe(&id, "load/+", QoS::AtMostOnce, false, |_| {})
                        .await
                        .unwrap();
                    client
                        .publish(&format!("load/{round}"), QoS::AtMostOnce, false, round)
                        .await
                        .unwrap();
                    client.unsubscribe(&id, "load/+").await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(client.registry().filter_count(), 0);
        assert!(broker.network_filters().is_empty());
        assert_eq!(broker.subscribe_calls(), broker.unsubscribe_calls());
    }

    #[tokio::test]
    async fn test_close_stops_delivery() {
        let broker = Arc::new(InMemoryBroker::new());
        let client = connected_client(&broker, "hub").await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        client
            .subscribe("a", "x/#", QoS::AtMostOnce, false, forward(&tx))
            .await
            .unwrap();
        client.close().await.unwrap();

        assert!(broker.network_filters().is_empty());
        assert!(!broker.is_connected());
        assert_eq!(broker.deliver(InboundMessage::new("x/y", "1")).await, 0);
        assert_quiet(&mut rx).await;
    }
}
