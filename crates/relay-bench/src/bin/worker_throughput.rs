//! End-to-end worker throughput benchmark for Relay.
//!
//! Producers fill the in-memory layer while a worker group drains it.
//!
//! Usage: `worker_throughput [workers] [producers]`

use relay_protocol::Message;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tenvis_relay_core::{
    consumer_fn, shutdown, ChannelLayer, ConsumerError, InMemoryChannelLayer, InMemoryConfig,
    LayerError, Router, WorkerGroup,
};

const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;
const CHANNEL: &str = "bench.jobs";

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let workers = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(4);
    let producers = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(2);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         Relay Worker Throughput Benchmark                    ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    if let Err(e) = run_benchmark(workers, producers).await {
        eprintln!("Benchmark failed: {}", e);
    }
}

async fn run_benchmark(
    workers: usize,
    producers: usize,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    println!("📊 {} workers, {} producers", workers, producers);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let layer = Arc::new(InMemoryChannelLayer::with_config(InMemoryConfig {
        capacity: 10_000,
        ..Default::default()
    }));

    let processed = Arc::new(AtomicU64::new(0));
    let counter = processed.clone();
    let mut router = Router::new();
    router.register(
        CHANNEL,
        Arc::new(consumer_fn("count", move |_channel, _message| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok::<(), ConsumerError>(())
            }
        })),
    )?;

    let mut group = WorkerGroup::new(layer.clone(), Arc::new(router), workers)?;
    group.ready()?;

    let (trigger, signal) = shutdown::channel();
    let run = tokio::spawn(async move { group.run(signal).await });

    let mut handles = Vec::new();
    for _ in 0..producers {
        let layer = layer.clone();
        handles.push(tokio::spawn(async move { produce(layer).await }));
    }

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    processed.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total = processed.load(Ordering::SeqCst);

    for handle in handles {
        handle.abort();
    }
    trigger.trigger();
    let stats = run.await??;

    let per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Workers:              {:>10}                           ║", workers);
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!("║  Messages:             {:>10}                           ║", total);
    println!("║  Throughput:           {:>10.0} msg/s                    ║", per_sec);
    println!(
        "║  Per-Worker:           {:>10.0} msg/s                    ║",
        per_sec / workers as f64
    );
    println!(
        "║  Consumer errors:      {:>10}                           ║",
        stats.consumer_errors
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    Ok(())
}

/// Send as fast as the layer accepts, backing off while the channel is full.
async fn produce(layer: Arc<InMemoryChannelLayer>) {
    let message = Message::new().with("body", "x".repeat(64));
    loop {
        match layer.send(CHANNEL, message.clone()).await {
            Ok(()) => tokio::task::yield_now().await,
            Err(LayerError::CapacityExceeded { .. }) => {
                tokio::time::sleep(Duration::from_micros(50)).await;
            }
            Err(e) => {
                eprintln!("Producer error: {}", e);
                return;
            }
        }
    }
}
