//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Change notifications received (local feed and bus)
//! - Replication decisions and their outcomes
//! - Store and bus operation latency
//! - Malformed input drops
//! - Service state
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `region_sync_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! No recorder is installed by this crate; the embedding application picks one.
//!
//! # Usage
//!
//! ```rust,no_run
//! use region_sync::metrics;
//! use std::time::Duration;
//!
//! metrics::record_notification("local");
//! metrics::record_publish("published", Duration::from_millis(3));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a notification entering the service (`local` feed or `remote` bus).
pub fn record_notification(source: &str) {
    counter!("region_sync_notifications_total", "source" => source.to_string()).increment(1);
}

/// Record a replication decision for a local change.
pub fn record_decision(kind: &str, replicate: bool) {
    let decision = if replicate { "replicate" } else { "suppress" };
    counter!(
        "region_sync_decisions_total",
        "kind" => kind.to_string(),
        "decision" => decision
    )
    .increment(1);
}

/// Record the outcome of publishing one local change.
pub fn record_publish(outcome: &str, duration: Duration) {
    counter!("region_sync_publish_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("region_sync_publish_duration_seconds").record(duration.as_secs_f64());
}

/// Record the outcome of applying one remote change.
pub fn record_apply(source_region: &str, outcome: &str, duration: Duration) {
    counter!(
        "region_sync_apply_total",
        "source_region" => source_region.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("region_sync_apply_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
}

/// Record malformed input that was dropped.
pub fn record_dropped(path: &str, reason: &str) {
    counter!(
        "region_sync_dropped_total",
        "path" => path.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a store operation and its latency.
pub fn record_store_operation(operation: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "region_sync_store_operations_total",
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!(
        "region_sync_store_operation_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record store SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn record_store_retry(operation: &str) {
    counter!("region_sync_store_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Record a bus read (XREAD or in-memory poll).
pub fn record_bus_read(messages: usize, duration: Duration) {
    counter!("region_sync_bus_reads_total").increment(1);
    if messages > 0 {
        counter!("region_sync_bus_messages_read_total").increment(messages as u64);
    }
    histogram!("region_sync_bus_read_duration_seconds").record(duration.as_secs_f64());
}

/// Record a compressed payload.
pub fn record_compression(raw_bytes: usize, compressed_bytes: usize) {
    counter!("region_sync_payloads_compressed_total").increment(1);
    histogram!("region_sync_payload_raw_bytes").record(raw_bytes as f64);
    histogram!("region_sync_payload_compressed_bytes").record(compressed_bytes as f64);
}

/// Record errors by type.
pub fn record_error(path: &str, error_type: &str) {
    counter!(
        "region_sync_errors_total",
        "path" => path.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Gauge for service state.
pub fn set_service_state(state: &str) {
    // Numeric encoding for alerting.
    let value = match state {
        "Running" => 1.0,
        "ShuttingDown" => 2.0,
        "Stopped" => 3.0,
        "Misconfigured" => 4.0,
        _ => -1.0,
    };
    gauge!("region_sync_service_state").set(value);
}

/// Gauge for running bus subscribers.
pub fn set_active_subscribers(count: usize) {
    gauge!("region_sync_active_subscribers").set(count as f64);
}
