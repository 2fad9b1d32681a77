//! In-process stand-in for the distributed tier.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::distributed::DistributedTier;
use crate::error::{CacheError, CacheResult};

/// Behaves like a shared key/value server with TTLs; can be switched into a
/// failing mode to simulate an outage.
#[derive(Debug, Default)]
pub struct FakeDistributedTier {
    entries: DashMap<String, (String, Instant)>,
    failing: AtomicBool,
    gets: AtomicU64,
    sets: AtomicU64,
}

impl FakeDistributedTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Writes directly, as another process sharing the tier would.
    pub fn seed(&self, key: &str, payload: &str, ttl: Duration) {
        self.entries
            .insert(key.to_string(), (payload.to_string(), Instant::now() + ttl));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.1 > Instant::now())
    }

    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::SeqCst)
    }

    fn check(&self) -> CacheResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Timeout("fake outage"));
        }
        Ok(())
    }
}

#[async_trait]
impl DistributedTier for FakeDistributedTier {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.1 > Instant::now())
            .map(|entry| entry.0.clone()))
    }

    async fn set(&self, key: &str, payload: &str, ttl: Duration) -> CacheResult<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.seed(key, payload, ttl);
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        self.check()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self, prefix: Option<&str>) -> CacheResult<()> {
        self.check()?;
        match prefix {
            Some(prefix) => self.entries.retain(|key, _| !key.starts_with(prefix)),
            None => self.entries.clear(),
        }
        Ok(())
    }

    async fn remaining_ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        self.check()?;
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.1 > now)
            .map(|entry| entry.1 - now))
    }

    async fn ping(&self) -> CacheResult<()> {
        self.check()
    }
}
