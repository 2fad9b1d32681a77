//! Prometheus exporter for the `metrics` facade.
//!
//! The pool and cache managers emit through the `metrics` macros; this module
//! installs the recorder those macros write to and describes every series.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use thiserror::Error;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to install metrics exporter: {0}")]
    Installation(String),
}

/// Installs the global Prometheus recorder once and returns its handle.
/// Later calls return the same handle.
pub fn init_metrics() -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("db_query_duration".to_string()),
            &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0],
        )
        .map_err(|e| MetricsError::Installation(e.to_string()))?
        .set_buckets_for_metric(
            Matcher::Prefix("db_pool_wait".to_string()),
            &[0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0],
        )
        .map_err(|e| MetricsError::Installation(e.to_string()))?
        .install_recorder()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    let handle = PROMETHEUS_HANDLE.get_or_init(|| handle).clone();
    register_metric_descriptions();
    Ok(handle)
}

fn register_metric_descriptions() {
    // Connection pools
    describe_gauge!(
        "db_pool_connections",
        Unit::Count,
        "Open connections across primary and replica, by state"
    );
    describe_gauge!(
        "db_pool_waiting_requests",
        Unit::Count,
        "Callers currently waiting for a pooled connection"
    );
    describe_histogram!(
        "db_pool_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for a pooled connection"
    );
    describe_counter!(
        "db_connection_errors_total",
        Unit::Count,
        "Failed connection checkouts"
    );
    describe_counter!(
        "db_queries_total",
        Unit::Count,
        "Recorded queries by outcome"
    );
    describe_histogram!(
        "db_query_duration_seconds",
        Unit::Seconds,
        "Recorded query duration"
    );

    // Cache tiers
    describe_counter!(
        "cache_requests_total",
        Unit::Count,
        "Cache lookups by result"
    );
    describe_counter!(
        "cache_errors_total",
        Unit::Count,
        "Internal cache failures by operation"
    );
    describe_counter!(
        "cache_coalesced_requests_total",
        Unit::Count,
        "Misses that waited on another caller's origin query"
    );
    describe_gauge!(
        "cache_memory_entries",
        Unit::Count,
        "Entries held by the memory tier"
    );
    describe_gauge!(
        "cache_hit_rate",
        Unit::Percent,
        "Hit rate over the last collection interval"
    );

    describe_counter!(
        "data_layer_alerts_total",
        Unit::Count,
        "Threshold breaches by kind"
    );
}
