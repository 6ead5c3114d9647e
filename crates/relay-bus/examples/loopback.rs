//! Loopback demo: a controller and a device share one in-memory broker.
//!
//! ```text
//! cargo run -p relay-bus --example loopback
//! RELAY_LOG_LEVEL=relay_bus=debug cargo run -p relay-bus --example loopback
//! ```

use relay_bus::{ClientConfig, InMemoryBroker, QoS, RelayClient};
use relay_telemetry::{gather_metrics, init_telemetry, TelemetryConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _telemetry = init_telemetry(TelemetryConfig::from_env())?;

    let broker = Arc::new(InMemoryBroker::new());
    let config = ClientConfig::from_env()
        .with_secret(b"loopback-secret".to_vec())
        .with_token_expiry(Duration::from_secs(10));
    let client = Arc::new(RelayClient::new(broker, config)?);
    client.connect().await?;

    let (tx, mut rx) = mpsc::unbounded_channel();

    // Device side: answers mode commands on the requested reply topic.
    client
        .subscribe("device", "+/cmd/mode", QoS::AtMostOnce, false, move |payload| {
            let _ = tx.send(payload);
        })
        .await?;

    // Controller side: only trusts signed status reports.
    client
        .subscribe("controller", "+/status", QoS::AtMostOnce, true, |payload| {
            println!(
                "status from {}: {} (validated: {})",
                payload.element(0).unwrap_or("?"),
                payload.value("v").cloned().unwrap_or_default(),
                payload.validated
            );
        })
        .await?;

    client
        .publish(
            "blower1/cmd/mode",
            QoS::AtMostOnce,
            false,
            json!({"mode": "auto", "$reply": "blower1/status", "$signed": true}),
        )
        .await?;

    if let Some(request) = rx.recv().await {
        let mode = request.value("mode").cloned().unwrap_or_default();
        let wire = client.reply(&request, QoS::AtMostOnce, false, mode).await?;
        println!("replied with {} bytes", wire.len());
    }

    // Unsigned status is ignored by the controller.
    client
        .publish("blower1/status", QoS::AtMostOnce, false, "spoofed")
        .await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    client.close().await?;

    println!("{}", gather_metrics()?);
    Ok(())
}
