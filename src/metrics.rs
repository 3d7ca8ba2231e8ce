//! Metrics instrumentation.
//!
//! Uses the `metrics` crate for backend-agnostic collection; the embedding
//! process chooses the exporter (Prometheus, OTEL, ...).
//!
//! # Metric Naming Convention
//! - `summadb_` prefix for all metrics
//! - `_total` suffix for counters
//!
//! # Labels
//! - `operation`: save_value, save_tree, replace_tree, delete, bulk_docs, ...
//! - `status`: ok, not_found, conflict, bad_request, invalid_value, error

use metrics::{counter, gauge, histogram};

/// Record a completed store operation.
pub fn record_operation(operation: &'static str, status: &'static str) {
    counter!(
        "summadb_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

/// Record how many KV entries one committed batch touched.
pub fn record_batch_entries(operation: &'static str, entries: usize) {
    histogram!(
        "summadb_batch_entries",
        "operation" => operation
    )
    .record(entries as f64);
}

/// Track the global update sequence.
pub fn set_update_seq(seq: u64) {
    gauge!("summadb_update_seq").set(seq as f64);
}

/// Record the size of a served change feed response.
pub fn record_changes_served(count: usize) {
    histogram!("summadb_changes_served").record(count as f64);
}
