//! Prometheus metrics for the gateway.
//!
//! All recording functions are cheap no-ops until a recorder is installed by
//! [`start_metrics_server`], so tests and metrics-disabled deployments pay
//! nothing.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Initialize metrics descriptions.
pub fn init_metrics() {
    describe_counter!(
        "gateway_requests_rejected_total",
        "Chat requests rejected before a stream was opened"
    );

    describe_gauge!("gateway_active_streams", "Number of open SSE streams");
    describe_counter!("gateway_streams_started_total", "Streams opened");
    describe_counter!(
        "gateway_streams_finished_total",
        "Streams ended, by terminal state"
    );
    describe_histogram!(
        "gateway_stream_duration_seconds",
        "Time from backend open to terminal state"
    );

    describe_counter!("gateway_events_sent_total", "SSE events written, by kind");
    describe_counter!("gateway_bytes_sent_total", "SSE bytes written");

    describe_counter!("gateway_backend_errors_total", "Backend failures mid-stream");
    describe_histogram!(
        "gateway_backend_ttfb_seconds",
        "Time from backend open to first fragment"
    );
}

/// Install the Prometheus recorder and its HTTP listener.
pub async fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    // 10ms .. ~160s
    let duration_buckets: [f64; 15] = [
        0.01, 0.02, 0.04, 0.08, 0.16, 0.32, 0.64, 1.28, 2.56, 5.12, 10.24, 20.48, 40.96, 81.92,
        163.84,
    ];
    // 1ms .. ~16s
    let ttfb_buckets: [f64; 15] = [
        0.001, 0.002, 0.004, 0.008, 0.016, 0.032, 0.064, 0.128, 0.256, 0.512, 1.024, 2.048, 4.096,
        8.192, 16.384,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("gateway_stream_duration_seconds".to_string()),
            &duration_buckets,
        )?
        .set_buckets_for_metric(
            Matcher::Full("gateway_backend_ttfb_seconds".to_string()),
            &ttfb_buckets,
        )?
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics server: {}", e))?;

    tracing::info!(%addr, "Metrics server started");
    Ok(())
}

/// Record a request rejected before streaming (validation, capacity, backend open).
pub fn record_request_rejected(reason: &'static str) {
    counter!("gateway_requests_rejected_total", "reason" => reason).increment(1);
}

pub fn set_active_streams(count: u64) {
    gauge!("gateway_active_streams").set(count as f64);
}

pub fn record_stream_started(backend: &'static str) {
    counter!("gateway_streams_started_total", "backend" => backend).increment(1);
}

pub fn record_stream_finished(backend: &'static str, state: &'static str) {
    counter!("gateway_streams_finished_total", "backend" => backend, "state" => state)
        .increment(1);
}

pub fn record_stream_duration(duration: Duration) {
    histogram!("gateway_stream_duration_seconds").record(duration.as_secs_f64());
}

/// Record one SSE event written to a client.
pub fn record_event_sent(kind: &'static str, bytes: usize) {
    counter!("gateway_events_sent_total", "kind" => kind).increment(1);
    counter!("gateway_bytes_sent_total").increment(bytes as u64);
}

pub fn record_backend_error(backend: &'static str) {
    counter!("gateway_backend_errors_total", "backend" => backend).increment(1);
}

pub fn record_backend_ttfb(backend: &'static str, duration: Duration) {
    histogram!("gateway_backend_ttfb_seconds", "backend" => backend)
        .record(duration.as_secs_f64());
}

/// Timer for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
