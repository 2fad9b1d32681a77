//! In-process memory tier backed by DashMap.
//!
//! Entries are replaced, never mutated in place. Expired entries are removed
//! lazily on read and in bulk by [`MemoryTier::sweep_expired`]. When a
//! capacity is configured and reached, expired entries are swept first and
//! then the oldest inserted entry is evicted.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<Value>,
    expires_at: Instant,
    sequence: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of a memory-tier read.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Hit(Arc<Value>),
    /// The entry existed but had expired; it has been removed.
    Expired,
    Miss,
}

#[derive(Debug)]
pub struct MemoryTier {
    entries: DashMap<String, CacheEntry>,
    max_size: Option<usize>,
    sequence: AtomicU64,
}

impl MemoryTier {
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            entries: DashMap::new(),
            max_size,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Lookup {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Lookup::Hit(entry.value.clone()),
            Some(_) => {}
            None => return Lookup::Miss,
        }

        // A concurrent set may have replaced the entry since the read above.
        self.entries
            .remove_if(key, |_, entry| entry.is_expired(now));
        Lookup::Expired
    }

    /// Stores a value and returns how many entries were evicted for room.
    pub fn insert(&self, key: String, value: Value, ttl: Duration) -> usize {
        let mut evicted = 0;
        if let Some(max) = self.max_size {
            if self.entries.len() >= max && !self.entries.contains_key(&key) {
                self.sweep_expired();
                while self.entries.len() >= max {
                    if !self.evict_oldest() {
                        break;
                    }
                    evicted += 1;
                }
            }
        }

        let entry = CacheEntry {
            value: Arc::new(value),
            expires_at: Instant::now() + ttl,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        self.entries.insert(key, entry);
        evicted
    }

    /// Remaining lifetime of an unexpired entry.
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.expires_at - now)
    }

    /// Removes every expired entry; returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn evict_oldest(&self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().sequence)
            .map(|entry| entry.key().clone());

        match oldest {
            Some(key) => self.entries.remove(&key).is_some(),
            None => false,
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
