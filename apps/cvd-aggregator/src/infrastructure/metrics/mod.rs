//! Prometheus Metrics Module
//!
//! Exposes aggregator metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Ingest**: trades received per shard, frames rejected by reason
//! - **Aggregation**: buckets flushed, late events, lost buckets, tracked symbols
//! - **Persistence**: buckets persisted, persist failures, persist latency
//! - **Connections**: connected shards, reconnect attempts
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder was already installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Ingest
    describe_counter!(
        "cvd_trades_received_total",
        "Validated trades received from the venue, by shard"
    );
    describe_counter!(
        "cvd_trades_rejected_total",
        "Stream frames rejected at the codec boundary, by reason"
    );

    // Aggregation
    describe_counter!(
        "cvd_buckets_flushed_total",
        "Minute buckets finalized and handed to the flush queue"
    );
    describe_counter!(
        "cvd_late_events_total",
        "Trades for an already closed minute, excluded from buckets"
    );
    describe_counter!(
        "cvd_buckets_lost_total",
        "Finalized buckets dropped because the flush queue was closed"
    );
    describe_gauge!("cvd_symbols_tracked", "Symbols with aggregator state");

    // Persistence
    describe_counter!("cvd_buckets_persisted_total", "Buckets durably stored");
    describe_counter!(
        "cvd_persist_failures_total",
        "Buckets abandoned after exhausting persist attempts"
    );
    describe_histogram!(
        "cvd_persist_duration_seconds",
        "Time to persist one bucket, including retries"
    );

    // Connections
    describe_gauge!("cvd_connected_shards", "Stream connections currently up");
    describe_counter!(
        "cvd_reconnects_total",
        "Stream reconnection attempts, by shard"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one validated trade on `shard`.
pub fn record_trade_received(shard: usize) {
    counter!("cvd_trades_received_total", "shard" => shard.to_string()).increment(1);
}

/// Record one frame rejected by the codec.
pub fn record_trade_rejected(reason: &'static str) {
    counter!("cvd_trades_rejected_total", "reason" => reason).increment(1);
}

/// Record buckets handed to the flush queue.
pub fn record_buckets_flushed(count: u64) {
    counter!("cvd_buckets_flushed_total").increment(count);
}

/// Record late trades.
pub fn record_late_events(count: u64) {
    counter!("cvd_late_events_total").increment(count);
}

/// Record buckets that could not be enqueued.
pub fn record_buckets_lost(count: u64) {
    counter!("cvd_buckets_lost_total").increment(count);
}

/// Update the tracked symbol count.
pub fn set_symbols_tracked(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("cvd_symbols_tracked").set(count as f64);
}

/// Record one successful persist and how long it took.
pub fn record_bucket_persisted(duration: Duration) {
    counter!("cvd_buckets_persisted_total").increment(1);
    histogram!("cvd_persist_duration_seconds").record(duration.as_secs_f64());
}

/// Record one bucket abandoned after retries.
pub fn record_persist_failure() {
    counter!("cvd_persist_failures_total").increment(1);
}

/// Update the connected shard count.
pub fn set_connected_shards(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("cvd_connected_shards").set(count as f64);
}

/// Record a reconnection attempt on `shard`.
pub fn record_reconnect(shard: usize) {
    counter!("cvd_reconnects_total", "shard" => shard.to_string()).increment(1);
}

// =============================================================================
// Tests
// =============================================================================
