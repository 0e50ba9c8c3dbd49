//! Metrics collection and export for Relay workers.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tenvis_relay_core::{CallbackError, DispatchError, Message, WorkerObserver};
use tracing::info;

/// Metric names.
pub mod names {
    pub const MESSAGES_TOTAL: &str = "relay_messages_total";
    pub const CONSUMER_ERRORS_TOTAL: &str = "relay_consumer_errors_total";
    pub const ROUTING_ERRORS_TOTAL: &str = "relay_routing_errors_total";
    pub const DISPATCH_SECONDS: &str = "relay_dispatch_seconds";
    pub const WORKERS_READY: &str = "relay_workers_ready";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages dispatched");
    metrics::describe_counter!(
        names::CONSUMER_ERRORS_TOTAL,
        "Total number of messages whose consumer failed"
    );
    metrics::describe_counter!(
        names::ROUTING_ERRORS_TOTAL,
        "Total number of messages discarded for lack of a route"
    );
    metrics::describe_histogram!(
        names::DISPATCH_SECONDS,
        "Consumer execution time in seconds"
    );
    metrics::describe_gauge!(names::WORKERS_READY, "Number of workers that became ready");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Records worker activity as metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl WorkerObserver for MetricsObserver {
    fn worker_ready(&self, _worker_id: usize, _channels: &[String]) {
        gauge!(names::WORKERS_READY).increment(1.0);
    }

    fn consumer_called(&self, channel: &str, _message: &Message) -> Result<(), CallbackError> {
        counter!(names::MESSAGES_TOTAL, "channel" => channel.to_string()).increment(1);
        Ok(())
    }

    fn consumer_finished(
        &self,
        channel: &str,
        elapsed: Duration,
        error: Option<&DispatchError>,
    ) -> Result<(), CallbackError> {
        match error {
            None => {
                histogram!(names::DISPATCH_SECONDS, "channel" => channel.to_string())
                    .record(elapsed.as_secs_f64());
            }
            Some(DispatchError::Routing(_)) => {
                counter!(names::ROUTING_ERRORS_TOTAL, "channel" => channel.to_string())
                    .increment(1);
            }
            Some(DispatchError::Consumer { .. }) => {
                histogram!(names::DISPATCH_SECONDS, "channel" => channel.to_string())
                    .record(elapsed.as_secs_f64());
                counter!(names::CONSUMER_ERRORS_TOTAL, "channel" => channel.to_string())
                    .increment(1);
            }
        }
        Ok(())
    }
}
