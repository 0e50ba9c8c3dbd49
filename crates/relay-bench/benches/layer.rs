//! In-memory channel layer benchmarks for Relay.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relay_protocol::Message;
use tenvis_relay_core::{ChannelLayer, InMemoryChannelLayer, InMemoryConfig};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn layer() -> InMemoryChannelLayer {
    InMemoryChannelLayer::with_config(InMemoryConfig {
        capacity: 1_000_000,
        ..Default::default()
    })
}

/// Benchmark a send followed by a non-blocking receive.
fn bench_send_receive(c: &mut Criterion) {
    let rt = runtime();
    let layer = layer();
    let channels = vec!["bench".to_string()];
    let message = Message::new()
        .with("path", "/api/items")
        .with("body", "x".repeat(64));

    let mut group = c.benchmark_group("send_receive");
    group.throughput(Throughput::Elements(1));
    group.bench_function("single_channel", |b| {
        b.iter(|| {
            rt.block_on(async {
                layer.send("bench", black_box(message.clone())).await.unwrap();
                layer.receive(&channels, false).await.unwrap()
            })
        })
    });
    group.finish();
}

/// Benchmark receive when only the last of many channels has a message.
fn bench_receive_many_channels(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("receive_many_channels");

    for count in [1usize, 16, 128] {
        let layer = layer();
        let channels: Vec<String> = (0..count).map(|i| format!("bench{i}")).collect();
        let target = channels[count - 1].clone();

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    layer.send(&target, Message::new()).await.unwrap();
                    layer.receive(black_box(&channels), false).await.unwrap()
                })
            })
        });
    }

    group.finish();
}

/// Benchmark fan-out to a group, including draining the members' queues.
fn bench_group_send(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("group_send");

    for members in [1usize, 10, 100] {
        let layer = layer();
        let channels: Vec<String> = (0..members).map(|i| format!("member{i}")).collect();
        rt.block_on(async {
            for channel in &channels {
                layer.group_add("room", channel).await.unwrap();
            }
        });

        group.throughput(Throughput::Elements(members as u64));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let report = layer.group_send("room", Message::new()).await.unwrap();
                    while layer.receive(&channels, false).await.unwrap().is_some() {}
                    report
                })
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_send_receive,
    bench_receive_many_channels,
    bench_group_send
);
criterion_main!(benches);
