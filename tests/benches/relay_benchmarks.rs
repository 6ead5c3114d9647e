//! # Topic-Relay Benchmarks
//!
//! | Component | Operation | Target |
//! |-----------|-----------|--------|
//! | Topic matcher | `match_topic`, 6-segment topic | < 1µs |
//! | Envelope codec | `decode` bare scalar / object | < 5µs |
//! | Secure envelope | `sign` + `verify` | < 50µs |
//! | Registry | `snapshot_matching` over 1000 filters | < 500µs |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relay_bus::{
    decode, match_topic, QoS, SecureEnvelope, Subscription, SubscriptionRegistry, TopicFilter,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Topic matcher
// ============================================================================

fn bench_match_topic(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_topic");
    let topic = "site1/hall/blower7/telemetry/rpm/current";

    for filter in [
        "site1/hall/blower7/telemetry/rpm/current",
        "site1/+/+/telemetry/+/current",
        "site1/#",
        "site2/hall/blower7/telemetry/rpm/current",
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(filter), filter, |b, filter| {
            b.iter(|| match_topic(black_box(filter), black_box(topic)));
        });
    }

    group.finish();
}

// ============================================================================
// Envelope codec
// ============================================================================

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let bodies: [(&str, &[u8]); 3] = [
        ("bare_word", b"ok"),
        ("number", b"1234.5"),
        ("object", br#"{"mode":"auto","rpm":1200,"$reply":"ctl/replies","$signed":true}"#),
    ];

    for (name, body) in bodies {
        group.throughput(Throughput::Bytes(body.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), body, |b, body| {
            b.iter(|| decode(black_box(body), "v"));
        });
    }

    group.finish();
}

// ============================================================================
// Secure envelope
// ============================================================================

fn bench_sign_verify(c: &mut Criterion) {
    let envelope = SecureEnvelope::new(
        Some(b"bench-secret".to_vec()),
        "bench",
        Duration::from_secs(5),
        "jwt:",
    );
    let value = json!({"mode": "auto", "rpm": 1200});

    c.bench_function("sign", |b| {
        b.iter(|| envelope.sign(black_box(&value)));
    });

    let Ok(token) = envelope.sign(&value) else {
        return;
    };
    c.bench_function("verify", |b| {
        b.iter(|| envelope.verify(black_box(&token), "v"));
    });
}

// ============================================================================
// Subscription registry
// ============================================================================

fn bench_snapshot_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_matching");

    for filters in [10usize, 100, 1000] {
        let registry = SubscriptionRegistry::new();
        for i in 0..filters {
            let Ok(filter) = TopicFilter::new(format!("site1/blower{i}/+")) else {
                continue;
            };
            registry.upsert(
                "bench",
                Subscription::new(filter, QoS::AtMostOnce, false, Arc::new(|_| {})),
            );
        }

        group.throughput(Throughput::Elements(filters as u64));
        group.bench_with_input(BenchmarkId::from_parameter(filters), &registry, |b, registry| {
            b.iter(|| registry.snapshot_matching(black_box("site1/blower7/rpm")));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_match_topic,
    bench_decode,
    bench_sign_verify,
    bench_snapshot_matching
);
criterion_main!(benches);
