//! Metric snapshots published by the pool and cache managers.
//!
//! Snapshots are recomputed on a timer and replace the previous snapshot
//! wholesale; nothing here is merged across intervals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection pool snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub total_connections: u32,
    pub active_connections: u32,
    pub idle_connections: u32,
    pub waiting_requests: u64,
    /// Average connection checkout wait over the last interval, in milliseconds.
    pub average_wait_time_ms: f64,
    /// Failed over recorded queries since start (0.0 - 1.0).
    pub error_rate: f64,
    /// Recorded queries per second since start.
    pub query_throughput: f64,
    pub timestamp: DateTime<Utc>,
}

impl PoolMetrics {
    pub fn empty() -> Self {
        Self {
            total_connections: 0,
            active_connections: 0,
            idle_connections: 0,
            waiting_requests: 0,
            average_wait_time_ms: 0.0,
            error_rate: 0.0,
            query_throughput: 0.0,
            timestamp: Utc::now(),
        }
    }

    /// Active over total connections; 0 for an empty pool.
    pub fn connection_usage(&self) -> f64 {
        if self.total_connections == 0 {
            0.0
        } else {
            self.active_connections as f64 / self.total_connections as f64
        }
    }
}

/// Running aggregate for one truncated query signature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStatEntry {
    pub count: u64,
    /// Running mean duration in milliseconds.
    pub avg_time_ms: f64,
    pub errors: u64,
}

impl QueryStatEntry {
    /// Folds one observation into the aggregate in O(1).
    pub fn record(&mut self, duration_ms: f64, success: bool) {
        self.count += 1;
        self.avg_time_ms += (duration_ms - self.avg_time_ms) / self.count as f64;
        if !success {
            self.errors += 1;
        }
    }
}

/// Cache snapshot describing only the most recent collection interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    /// Percentage of requests served from any tier.
    pub hit_rate: f64,
    pub miss_rate: f64,
    /// Capacity evictions per hundred requests.
    pub eviction_rate: f64,
    /// Entries currently held by the memory tier.
    pub memory_usage: usize,
    pub total_requests: u64,
    /// Internal errors over requests (0.0 - 1.0).
    pub error_rate: f64,
    pub timestamp: DateTime<Utc>,
}

/// Raw counters accumulated during one collection interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheWindow {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub errors: u64,
}

impl CacheMetrics {
    pub fn empty() -> Self {
        Self::from_window(CacheWindow::default(), 0)
    }

    pub fn from_window(window: CacheWindow, memory_usage: usize) -> Self {
        let total = window.hits + window.misses;
        let percent = |n: u64| {
            if total == 0 {
                0.0
            } else {
                n as f64 / total as f64 * 100.0
            }
        };

        Self {
            hit_rate: percent(window.hits),
            miss_rate: percent(window.misses),
            eviction_rate: percent(window.evictions),
            memory_usage,
            total_requests: total,
            error_rate: if total == 0 {
                0.0
            } else {
                window.errors as f64 / total as f64
            },
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_query_stat_running_mean() {
        let mut entry = QueryStatEntry::default();
        entry.record(10.0, true);
        entry.record(20.0, true);
        entry.record(30.0, false);

        assert_eq!(entry.count, 3);
        assert_eq!(entry.errors, 1);
        assert!((entry.avg_time_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_cache_metrics_from_window() {
        let window = CacheWindow {
            hits: 700,
            misses: 300,
            evictions: 10,
            errors: 5,
        };
        let metrics = CacheMetrics::from_window(window, 42);

        assert!((metrics.hit_rate - 70.0).abs() < 1e-9);
        assert!((metrics.miss_rate - 30.0).abs() < 1e-9);
        assert!((metrics.eviction_rate - 1.0).abs() < 1e-9);
        assert!((metrics.error_rate - 0.005).abs() < 1e-9);
        assert_eq!(metrics.total_requests, 1000);
        assert_eq!(metrics.memory_usage, 42);
    }

    #[test]
    fn test_cache_metrics_empty_window() {
        let metrics = CacheMetrics::empty();
        assert_eq!(metrics.hit_rate, 0.0);
        assert_eq!(metrics.miss_rate, 0.0);
        assert_eq!(metrics.total_requests, 0);
    }

    #[test]
    fn test_connection_usage() {
        let mut metrics = PoolMetrics::empty();
        assert_eq!(metrics.connection_usage(), 0.0);

        metrics.total_connections = 10;
        metrics.active_connections = 8;
        assert!((metrics.connection_usage() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_serializes_snake_case() {
        let json = serde_json::to_value(PoolMetrics::empty()).unwrap();
        assert!(json.get("average_wait_time_ms").is_some());
        assert!(json.get("query_throughput").is_some());
    }
}
