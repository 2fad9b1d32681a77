//! Two-level cache-aside store.
//!
//! Reads go memory tier, then distributed tier; a distributed hit is promoted
//! into memory. Writes go to both tiers, the distributed write being best
//! effort. The manager never calls an origin itself, and no cache-internal
//! failure (serialization, network, timeout) ever reaches the caller: it is
//! logged, counted and treated as a miss or a no-op.
//!
//! ```no_run
//! use compliance_data_cache::CacheTierManager;
//! use compliance_data_core::CacheConfiguration;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), compliance_data_cache::CacheError> {
//! let cache = CacheTierManager::new(CacheConfiguration::default())?;
//! cache.initialize().await;
//!
//! cache.set("dashboard:42", &serde_json::json!({"score": 87}), Some(Duration::from_secs(60))).await;
//! let cached: Option<serde_json::Value> = cache.get("dashboard:42").await;
//! # Ok(())
//! # }
//! ```

use compliance_data_core::{
    CacheAlertThresholds, CacheConfiguration, CacheMetrics, CacheWindow, PromotionTtl, TierConfig,
};
use metrics::{counter, gauge};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::distributed::{self, DistributedTier};
use crate::error::{CacheError, CacheResult};
use crate::memory::{Lookup, MemoryTier};

/// Every this many writes the memory tier is swept for expired entries.
const SWEEP_EVERY: u64 = 64;

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
    writes: AtomicU64,
}

impl Counters {
    fn drain(&self) -> CacheWindow {
        CacheWindow {
            hits: self.hits.swap(0, Ordering::Relaxed),
            misses: self.misses.swap(0, Ordering::Relaxed),
            evictions: self.evictions.swap(0, Ordering::Relaxed),
            errors: self.errors.swap(0, Ordering::Relaxed),
        }
    }
}

/// Threshold breach detected during metrics collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheAlert {
    LowHitRate { hit_rate: f64, threshold: f64 },
    HighMemoryUsage { entries: usize, threshold: usize },
    HighErrorRate { rate: f64, threshold: f64 },
}

impl CacheAlert {
    fn kind(&self) -> &'static str {
        match self {
            CacheAlert::LowHitRate { .. } => "cache_hit_rate",
            CacheAlert::HighMemoryUsage { .. } => "cache_memory_usage",
            CacheAlert::HighErrorRate { .. } => "cache_error_rate",
        }
    }
}

impl fmt::Display for CacheAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheAlert::LowHitRate { hit_rate, threshold } => {
                write!(f, "hit rate {hit_rate:.1}% below {threshold:.1}%")
            }
            CacheAlert::HighMemoryUsage { entries, threshold } => {
                write!(f, "memory tier holds {entries} entries, limit {threshold}")
            }
            CacheAlert::HighErrorRate { rate, threshold } => write!(
                f,
                "error rate {:.2}% above {:.2}%",
                rate * 100.0,
                threshold * 100.0
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheHealth {
    pub healthy: bool,
    pub distributed_connected: bool,
    pub memory_entries: usize,
    pub metrics: CacheMetrics,
}

struct Inner {
    config: CacheConfiguration,
    memory_tier: TierConfig,
    distributed_tier: Option<TierConfig>,
    memory: MemoryTier,
    distributed: RwLock<Option<Arc<dyn DistributedTier>>>,
    counters: Counters,
    latest: RwLock<CacheMetrics>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

pub struct CacheTierManager {
    inner: Arc<Inner>,
}

impl CacheTierManager {
    /// Validates the tier layout. Nothing connects until [`initialize`](Self::initialize).
    pub fn new(config: CacheConfiguration) -> CacheResult<Self> {
        config.validate()?;
        let memory_tier = config
            .memory_tier()
            .cloned()
            .ok_or_else(|| compliance_data_core::ConfigError::Missing("cache.tiers.memory"))?;
        let distributed_tier = config.distributed_tier().cloned();

        Ok(Self {
            inner: Arc::new(Inner {
                memory: MemoryTier::new(memory_tier.max_size),
                memory_tier,
                distributed_tier,
                distributed: RwLock::new(None),
                counters: Counters::default(),
                latest: RwLock::new(CacheMetrics::empty()),
                monitor: Mutex::new(None),
                config,
            }),
        })
    }

    /// Uses an already connected distributed tier instead of connecting.
    pub async fn with_distributed_tier(
        config: CacheConfiguration,
        tier: Arc<dyn DistributedTier>,
    ) -> CacheResult<Self> {
        let manager = Self::new(config)?;
        if manager.inner.distributed_tier.is_some() {
            *manager.inner.distributed.write().await = Some(tier);
        } else {
            warn!("No distributed tier configured, ignoring the supplied connection");
        }
        manager.start_monitor().await;
        Ok(manager)
    }

    pub fn config(&self) -> &CacheConfiguration {
        &self.inner.config
    }

    /// Connects the distributed tier if one is configured. Failure is not
    /// fatal: the manager keeps serving from memory alone.
    pub async fn initialize(&self) {
        if self.inner.distributed_tier.is_some() && self.inner.distributed.read().await.is_none() {
            match distributed::connect(&self.inner.config.distributed).await {
                Ok(tier) => *self.inner.distributed.write().await = Some(tier),
                Err(e) => warn!(
                    error = %e,
                    "Distributed cache tier unavailable, continuing with the memory tier only"
                ),
            }
        }
        self.start_monitor().await;
        info!(
            distributed = self.distributed_connected().await,
            "Cache tier manager initialized"
        );
    }

    async fn start_monitor(&self) {
        let monitoring = &self.inner.config.monitoring;
        if !monitoring.enabled {
            return;
        }
        let mut slot = self.inner.monitor.lock().await;
        if slot.is_none() {
            *slot = Some(spawn_monitor(
                Arc::downgrade(&self.inner),
                monitoring.collect_interval,
            ));
        }
    }

    /// Whether a distributed tier connection is held (no round-trip).
    pub async fn distributed_connected(&self) -> bool {
        self.inner.distributed.read().await.is_some()
    }

    pub fn memory_len(&self) -> usize {
        self.inner.memory.len()
    }

    /// Looks a key up in memory, then in the distributed tier. Absent and
    /// failed lookups both come back as `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let counters = &self.inner.counters;
        let decoded = match self.inner.lookup(key).await {
            Ok(Some(value)) => T::deserialize(value.as_ref()).map(Some).map_err(CacheError::from),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };

        match decoded {
            Ok(Some(value)) => {
                counters.hits.fetch_add(1, Ordering::Relaxed);
                counter!("cache_requests_total", "result" => "hit").increment(1);
                Some(value)
            }
            Ok(None) => {
                self.inner.record_miss();
                None
            }
            Err(e) => {
                self.inner.record_error("get", key, &e);
                self.inner.record_miss();
                None
            }
        }
    }

    /// Same lookup as [`get`](Self::get), but outside the hit/miss window.
    /// For internal re-reads that belong to a request already counted.
    pub async fn peek<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.inner.lookup(key).await {
            Ok(Some(value)) => T::deserialize(value.as_ref()).ok(),
            Ok(None) => None,
            Err(e) => {
                debug!(key, error = %e, "Cache peek failed");
                None
            }
        }
    }

    /// Writes both tiers. `ttl` overrides each tier's default; the
    /// distributed write is best effort.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let inner = &self.inner;
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                inner.record_error("set", key, &CacheError::from(e));
                return;
            }
        };

        let payload = inner.distributed_tier.as_ref().map(|_| value.to_string());
        inner.store_in_memory(key, value, ttl.unwrap_or(inner.memory_tier.ttl));

        let writes = inner.counters.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY == 0 {
            let swept = inner.memory.sweep_expired();
            if swept > 0 {
                debug!(swept, "Swept expired memory-tier entries");
            }
        }

        if let (Some(tier_config), Some(payload), Some(tier)) =
            (&inner.distributed_tier, payload, inner.tier().await)
        {
            let ttl = ttl.unwrap_or(tier_config.ttl);
            if let Err(e) = tier.set(&tier_config.tier_key(key), &payload, ttl).await {
                inner.record_error("set", key, &e);
            }
        }
    }

    /// Removes a key from both tiers.
    pub async fn del(&self, key: &str) {
        let inner = &self.inner;
        inner.memory.remove(&inner.memory_tier.tier_key(key));

        if let (Some(tier_config), Some(tier)) = (&inner.distributed_tier, inner.tier().await) {
            if let Err(e) = tier.del(&tier_config.tier_key(key)).await {
                inner.record_error("del", key, &e);
            }
        }
    }

    /// Empties both tiers.
    pub async fn clear(&self) {
        let inner = &self.inner;
        inner.memory.clear();

        if let (Some(tier_config), Some(tier)) = (&inner.distributed_tier, inner.tier().await) {
            if let Err(e) = tier.clear(tier_config.key_prefix.as_deref()).await {
                inner.record_error("clear", "*", &e);
            }
        }
    }

    /// Turns the counters accumulated since the previous call into a
    /// snapshot, resets them and runs threshold checks.
    pub async fn collect_metrics(&self) -> CacheMetrics {
        self.inner.collect_metrics().await
    }

    pub async fn metrics(&self) -> CacheMetrics {
        self.inner.latest.read().await.clone()
    }

    pub fn check_alert_thresholds(&self, metrics: &CacheMetrics) -> Vec<CacheAlert> {
        check_alert_thresholds(&self.inner.config.monitoring.alert_thresholds, metrics)
    }

    /// Healthy when the distributed tier answers a ping or the memory tier
    /// holds entries. A memory-only configuration is always healthy.
    pub async fn health_check(&self) -> CacheHealth {
        let inner = &self.inner;
        let distributed_connected = match inner.tier().await {
            Some(tier) => match tier.ping().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Distributed cache tier health check failed");
                    false
                }
            },
            None => false,
        };

        let memory_entries = inner.memory.len();
        let healthy =
            distributed_connected || memory_entries > 0 || inner.distributed_tier.is_none();

        CacheHealth {
            healthy,
            distributed_connected,
            memory_entries,
            metrics: self.metrics().await,
        }
    }

    /// Stops the timer, disconnects the distributed tier and empties memory.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.monitor.lock().await.take() {
            handle.abort();
        }
        if let Some(tier) = self.inner.distributed.write().await.take() {
            tier.close().await;
        }
        self.inner.memory.clear();
        info!("Cache tier manager shut down");
    }
}

impl Inner {
    async fn tier(&self) -> Option<Arc<dyn DistributedTier>> {
        self.distributed.read().await.clone()
    }

    async fn lookup(&self, key: &str) -> CacheResult<Option<Arc<Value>>> {
        let memory_key = self.memory_tier.tier_key(key);
        match self.memory.get(&memory_key) {
            Lookup::Hit(value) => return Ok(Some(value)),
            Lookup::Expired => debug!(key, "Memory-tier entry expired"),
            Lookup::Miss => {}
        }

        let (Some(tier_config), Some(tier)) = (&self.distributed_tier, self.tier().await) else {
            return Ok(None);
        };

        let distributed_key = tier_config.tier_key(key);
        let Some(payload) = tier.get(&distributed_key).await? else {
            return Ok(None);
        };
        let value: Value = serde_json::from_str(&payload)?;

        let ttl = self.promotion_ttl(tier.as_ref(), &distributed_key).await;
        let value = Arc::new(value);
        self.store_in_memory(key, value.as_ref().clone(), ttl);
        debug!(key, ttl_ms = ttl.as_millis() as u64, "Promoted distributed-tier entry");
        Ok(Some(value))
    }

    async fn promotion_ttl(&self, tier: &dyn DistributedTier, distributed_key: &str) -> Duration {
        let memory_ttl = self.memory_tier.ttl;
        match self.config.promotion_ttl {
            PromotionTtl::MemoryTier => memory_ttl,
            PromotionTtl::CappedToRemaining => match tier.remaining_ttl(distributed_key).await {
                Ok(Some(remaining)) => remaining.min(memory_ttl),
                Ok(None) => memory_ttl,
                Err(e) => {
                    debug!(error = %e, "Could not read remaining TTL, using memory-tier TTL");
                    memory_ttl
                }
            },
        }
    }

    fn store_in_memory(&self, key: &str, value: Value, ttl: Duration) {
        let evicted = self
            .memory
            .insert(self.memory_tier.tier_key(key), value, ttl);
        if evicted > 0 {
            self.counters
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    fn record_miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        counter!("cache_requests_total", "result" => "miss").increment(1);
    }

    fn record_error(&self, op: &'static str, key: &str, error: &CacheError) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        counter!("cache_errors_total", "op" => op).increment(1);
        warn!(op, key, error = %error, "Cache operation failed");
    }

    async fn collect_metrics(&self) -> CacheMetrics {
        let metrics = CacheMetrics::from_window(self.counters.drain(), self.memory.len());

        gauge!("cache_hit_rate").set(metrics.hit_rate);
        gauge!("cache_memory_entries").set(metrics.memory_usage as f64);

        *self.latest.write().await = metrics.clone();

        if self.config.monitoring.enabled {
            check_alert_thresholds(&self.config.monitoring.alert_thresholds, &metrics);
        }
        metrics
    }
}

fn check_alert_thresholds(thresholds: &CacheAlertThresholds, metrics: &CacheMetrics) -> Vec<CacheAlert> {
    let mut alerts = Vec::new();

    // An idle interval has no meaningful hit rate.
    if metrics.total_requests > 0 && metrics.hit_rate < thresholds.hit_rate {
        alerts.push(CacheAlert::LowHitRate {
            hit_rate: metrics.hit_rate,
            threshold: thresholds.hit_rate,
        });
    }

    if metrics.memory_usage > thresholds.memory_usage {
        alerts.push(CacheAlert::HighMemoryUsage {
            entries: metrics.memory_usage,
            threshold: thresholds.memory_usage,
        });
    }

    if metrics.error_rate > thresholds.error_rate {
        alerts.push(CacheAlert::HighErrorRate {
            rate: metrics.error_rate,
            threshold: thresholds.error_rate,
        });
    }

    for alert in &alerts {
        warn!(alert = alert.kind(), "Cache alert: {}", alert);
        counter!("data_layer_alerts_total", "kind" => alert.kind()).increment(1);
    }

    alerts
}

fn spawn_monitor(inner: Weak<Inner>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.collect_metrics().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDistributedTier;
    use compliance_data_core::CacheMonitoringConfig;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config() -> CacheConfiguration {
        CacheConfiguration {
            monitoring: CacheMonitoringConfig {
                enabled: false,
                ..CacheMonitoringConfig::default()
            },
            ..CacheConfiguration::default()
        }
    }

    async fn with_fake() -> (CacheTierManager, Arc<FakeDistributedTier>) {
        let fake = Arc::new(FakeDistributedTier::new());
        let manager = CacheTierManager::with_distributed_tier(config(), fake.clone())
            .await
            .unwrap();
        (manager, fake)
    }

    #[tokio::test]
    async fn test_set_writes_both_tiers_with_prefix() {
        let (cache, fake) = with_fake().await;
        cache.set("dashboard:42", &json!({"score": 87}), None).await;

        assert_eq!(cache.memory_len(), 1);
        assert!(fake.contains("compliance:dashboard:42"));
        assert_eq!(fake.sets(), 1);
    }

    #[tokio::test]
    async fn test_distributed_failure_on_set_is_swallowed() {
        let (cache, fake) = with_fake().await;
        fake.set_failing(true);

        cache.set("k", "v", None).await;
        assert_eq!(fake.sets(), 1);
        let value: Option<String> = cache.get("k").await;
        assert_eq!(value.as_deref(), Some("v"));

        let metrics = cache.collect_metrics().await;
        assert_eq!(metrics.total_requests, 1);
        assert!(metrics.error_rate > 0.0);
    }

    #[tokio::test]
    async fn test_distributed_failure_on_get_is_a_miss() {
        let (cache, fake) = with_fake().await;
        fake.set_failing(true);

        let value: Option<String> = cache.get("absent").await;
        assert!(value.is_none());

        let metrics = cache.collect_metrics().await;
        assert_eq!(metrics.miss_rate, 100.0);
        assert_eq!(metrics.error_rate, 1.0);
    }

    #[tokio::test]
    async fn test_peek_leaves_window_untouched() {
        let (cache, fake) = with_fake().await;
        cache.set("k", &7u32, None).await;
        fake.seed("compliance:remote", "9", Duration::from_secs(60));

        assert_eq!(cache.peek::<u32>("k").await, Some(7));
        assert_eq!(cache.peek::<u32>("remote").await, Some(9));
        assert_eq!(cache.peek::<u32>("absent").await, None);

        let metrics = cache.collect_metrics().await;
        assert_eq!(metrics.total_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_64th_set_sweeps_expired_entries() {
        let cache = CacheTierManager::new(CacheConfiguration {
            monitoring: CacheMonitoringConfig {
                enabled: false,
                ..CacheMonitoringConfig::default()
            },
            ..CacheConfiguration::memory_only(Duration::from_secs(300), 1000)
        })
        .unwrap();

        for i in 0..10 {
            cache
                .set(&format!("short:{i}"), &i, Some(Duration::from_secs(1)))
                .await;
        }
        tokio::time::advance(Duration::from_secs(2)).await;

        let remaining = SWEEP_EVERY - 10;
        for i in 0..remaining - 1 {
            cache.set(&format!("long:{i}"), &i, None).await;
        }
        assert_eq!(cache.memory_len() as u64, SWEEP_EVERY - 1);

        cache.set("long:last", &0, None).await;
        assert_eq!(cache.memory_len() as u64, remaining);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_a_miss() {
        let (cache, _fake) = with_fake().await;
        cache.set("k", &json!({"score": 87}), None).await;

        let value: Option<u64> = cache.get("k").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_promotion_uses_memory_ttl() {
        let (cache, fake) = with_fake().await;
        fake.seed("compliance:report:7", r#"{"rows":3}"#, Duration::from_secs(5));

        let value: Option<Value> = cache.get("report:7").await;
        assert_eq!(value, Some(json!({"rows": 3})));
        let ttl = cache.inner.memory.remaining_ttl("report:7").unwrap();
        assert!(ttl > Duration::from_secs(290) && ttl <= Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_promotion_capped_to_remaining() {
        let fake = Arc::new(FakeDistributedTier::new());
        let config = CacheConfiguration {
            promotion_ttl: PromotionTtl::CappedToRemaining,
            ..config()
        };
        let cache = CacheTierManager::with_distributed_tier(config, fake.clone())
            .await
            .unwrap();
        fake.seed("compliance:report:7", "1", Duration::from_secs(5));

        let value: Option<u32> = cache.get("report:7").await;
        assert_eq!(value, Some(1));
        let ttl = cache.inner.memory.remaining_ttl("report:7").unwrap();
        assert!(ttl <= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_del_and_clear_hit_both_tiers() {
        let (cache, fake) = with_fake().await;
        cache.set("a", &1, None).await;
        cache.set("b", &2, None).await;

        cache.del("a").await;
        assert!(!fake.contains("compliance:a"));
        assert_eq!(cache.get::<u32>("a").await, None);

        cache.clear().await;
        assert!(!fake.contains("compliance:b"));
        assert_eq!(cache.memory_len(), 0);
    }

    #[tokio::test]
    async fn test_health_degraded_but_functional() {
        let (cache, fake) = with_fake().await;
        fake.set_failing(true);

        let health = cache.health_check().await;
        assert!(!health.healthy);
        assert!(!health.distributed_connected);

        cache.set("k", "v", None).await;
        let health = cache.health_check().await;
        assert!(health.healthy);
        assert_eq!(health.memory_entries, 1);
    }

    #[tokio::test]
    async fn test_memory_only_is_healthy_when_empty() {
        let cache = CacheTierManager::new(CacheConfiguration::memory_only(
            Duration::from_secs(60),
            10,
        ))
        .unwrap();
        cache.initialize().await;

        let health = cache.health_check().await;
        assert!(health.healthy);
        assert!(!health.distributed_connected);
    }

    #[tokio::test]
    async fn test_eviction_rate_counted() {
        let cache = CacheTierManager::new(CacheConfiguration {
            monitoring: CacheMonitoringConfig {
                enabled: false,
                ..CacheMonitoringConfig::default()
            },
            ..CacheConfiguration::memory_only(Duration::from_secs(60), 2)
        })
        .unwrap();

        for key in ["a", "b", "c", "d"] {
            cache.set(key, &1, None).await;
        }
        for key in ["a", "b", "c", "d"] {
            let _: Option<u32> = cache.get(key).await;
        }

        let metrics = cache.collect_metrics().await;
        assert_eq!(metrics.total_requests, 4);
        assert_eq!(metrics.eviction_rate, 50.0);
        assert_eq!(metrics.hit_rate, 50.0);
    }

    #[test]
    fn test_alerts() {
        let thresholds = CacheAlertThresholds::default();
        let quiet = CacheMetrics::empty();
        assert!(check_alert_thresholds(&thresholds, &quiet).is_empty());

        let noisy = CacheMetrics {
            hit_rate: 40.0,
            miss_rate: 60.0,
            eviction_rate: 0.0,
            memory_usage: 950,
            total_requests: 10,
            error_rate: 0.1,
            timestamp: chrono::Utc::now(),
        };
        let alerts = check_alert_thresholds(&thresholds, &noisy);
        assert_eq!(alerts.len(), 3);
        assert_eq!(alerts[0].to_string(), "hit rate 40.0% below 70.0%");
    }

    #[tokio::test]
    async fn test_shutdown_clears_memory_and_disconnects() {
        let (cache, _fake) = with_fake().await;
        cache.set("k", "v", None).await;

        cache.shutdown().await;
        assert_eq!(cache.memory_len(), 0);
        assert!(!cache.distributed_connected().await);
    }
}
