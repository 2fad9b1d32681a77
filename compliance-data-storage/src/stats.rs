//! Per-signature query statistics.
//!
//! Entries are keyed by the first [`MAX_SIGNATURE_LEN`] characters of the
//! query signature and live for the lifetime of the process.

use compliance_data_core::QueryStatEntry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub const MAX_SIGNATURE_LEN: usize = 100;

/// Truncates on a char boundary so multi-byte signatures never split.
pub fn truncate_signature(signature: &str) -> &str {
    match signature.char_indices().nth(MAX_SIGNATURE_LEN) {
        Some((idx, _)) => &signature[..idx],
        None => signature,
    }
}

#[derive(Debug, Default)]
pub struct QueryStats {
    entries: DashMap<String, QueryStatEntry>,
    total: AtomicU64,
    errors: AtomicU64,
}

impl QueryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, signature: &str, duration_ms: f64, success: bool) {
        let key = truncate_signature(signature);
        match self.entries.get_mut(key) {
            Some(mut entry) => entry.record(duration_ms, success),
            None => self
                .entries
                .entry(key.to_string())
                .or_default()
                .record(duration_ms, success),
        }

        self.total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Monotonic count of recorded queries.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn error_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.errors() as f64 / total as f64
        }
    }

    pub fn get(&self, signature: &str) -> Option<QueryStatEntry> {
        self.entries
            .get(truncate_signature(signature))
            .map(|entry| entry.value().clone())
    }

    pub fn snapshot(&self) -> HashMap<String, QueryStatEntry> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Signatures ranked by mean duration, slowest first.
    pub fn slowest(&self, limit: usize) -> Vec<(String, QueryStatEntry)> {
        let mut all: Vec<_> = self.snapshot().into_iter().collect();
        all.sort_by(|a, b| b.1.avg_time_ms.total_cmp(&a.1.avg_time_ms));
        all.truncate(limit);
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_truncate_signature() {
        let long = "x".repeat(250);
        assert_eq!(truncate_signature(&long).len(), MAX_SIGNATURE_LEN);
        assert_eq!(truncate_signature("report:7"), "report:7");

        let multibyte = "é".repeat(150);
        assert_eq!(truncate_signature(&multibyte).chars().count(), MAX_SIGNATURE_LEN);
    }

    #[test]
    fn test_record_groups_by_truncated_signature() {
        let stats = QueryStats::new();
        let prefix = "SELECT ".repeat(20);
        stats.record(&format!("{prefix} WHERE id = 1"), 10.0, true);
        stats.record(&format!("{prefix} WHERE id = 2"), 30.0, false);

        assert_eq!(stats.len(), 1);
        let entry = stats.get(&prefix).unwrap();
        assert_eq!(entry.count, 2);
        assert_eq!(entry.errors, 1);
        assert!((entry.avg_time_ms - 20.0).abs() < 1e-9);
        assert_eq!(stats.total(), 2);
        assert!((stats.error_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_slowest_orders_by_mean() {
        let stats = QueryStats::new();
        stats.record("fast", 1.0, true);
        stats.record("slow", 90.0, true);
        stats.record("medium", 20.0, true);

        let ranked: Vec<String> = stats.slowest(2).into_iter().map(|(k, _)| k).collect();
        assert_eq!(ranked, vec!["slow".to_string(), "medium".to_string()]);
    }

    #[test]
    fn test_error_rate_empty() {
        assert_eq!(QueryStats::new().error_rate(), 0.0);
    }
}
