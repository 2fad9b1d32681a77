//! Strongly typed configuration for the connection pools and the cache tiers.
//!
//! Both configurations are assembled once at process start (usually from the
//! environment) and are immutable afterwards. Builders resolve every default
//! up front and validate the result, so managers never see a partially
//! specified configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

// ===== Monitoring =====

/// Periodic metrics collection settings shared by both managers.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringConfig<T> {
    pub enabled: bool,
    pub collect_interval: Duration,
    pub alert_thresholds: T,
}

impl<T> MonitoringConfig<T> {
    fn validate(&self) -> ConfigResult<()> {
        if self.enabled && self.collect_interval.is_zero() {
            return Err(ConfigError::invalid(
                "monitoring.collect_interval",
                "must be greater than zero when monitoring is enabled",
            ));
        }
        Ok(())
    }
}

fn check_fraction(field: &'static str, value: f64) -> ConfigResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::invalid(
            field,
            format!("{value} is not a fraction between 0 and 1"),
        ));
    }
    Ok(())
}

// ===== Connection pools =====

/// Read-write primary store.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryStoreConfig {
    pub url: String,
    pub max_connections: u32,
    pub idle_timeout: Duration,
    pub statement_timeout: Duration,
    pub connection_timeout: Duration,
}

/// Optional read-only replica used to offload read traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaStoreConfig {
    pub url: String,
    pub max_connections: u32,
    pub idle_timeout: Duration,
}

/// Limits that turn pool metrics into alert signals.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolAlertThresholds {
    /// Fraction of active over total connections.
    pub connection_usage: f64,
    /// Queries slower than this are reported as slow.
    pub query_timeout: Duration,
    /// Fraction of failed over recorded queries.
    pub error_rate: f64,
}

impl Default for PoolAlertThresholds {
    fn default() -> Self {
        Self {
            connection_usage: 0.8,
            query_timeout: Duration::from_millis(5000),
            error_rate: 0.05,
        }
    }
}

pub type PoolMonitoringConfig = MonitoringConfig<PoolAlertThresholds>;

impl Default for PoolMonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            collect_interval: Duration::from_secs(30),
            alert_thresholds: PoolAlertThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfiguration {
    pub primary: PrimaryStoreConfig,
    pub replica: Option<ReplicaStoreConfig>,
    pub monitoring: PoolMonitoringConfig,
}

impl PoolConfiguration {
    pub fn builder(primary_url: impl Into<String>) -> PoolConfigurationBuilder {
        PoolConfigurationBuilder::new(primary_url)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.primary.url.trim().is_empty() {
            return Err(ConfigError::Missing("database.url"));
        }
        if self.primary.max_connections == 0 {
            return Err(ConfigError::invalid(
                "database.max_connections",
                "must be greater than 0",
            ));
        }
        if let Some(replica) = &self.replica {
            if replica.url.trim().is_empty() {
                return Err(ConfigError::invalid("database.replica_url", "must not be empty"));
            }
            if replica.max_connections == 0 {
                return Err(ConfigError::invalid(
                    "database.replica_max_connections",
                    "must be greater than 0",
                ));
            }
        }
        self.monitoring.validate()?;
        let thresholds = &self.monitoring.alert_thresholds;
        check_fraction("pool.alert.connection_usage", thresholds.connection_usage)?;
        check_fraction("pool.alert.error_rate", thresholds.error_rate)?;
        Ok(())
    }
}

/// Builder for [`PoolConfiguration`]; unspecified fields take the documented defaults.
#[derive(Debug)]
pub struct PoolConfigurationBuilder {
    primary_url: String,
    max_connections: Option<u32>,
    idle_timeout: Option<Duration>,
    statement_timeout: Option<Duration>,
    connection_timeout: Option<Duration>,
    replica: Option<ReplicaStoreConfig>,
    monitoring: Option<PoolMonitoringConfig>,
}

impl PoolConfigurationBuilder {
    pub fn new(primary_url: impl Into<String>) -> Self {
        Self {
            primary_url: primary_url.into(),
            max_connections: None,
            idle_timeout: None,
            statement_timeout: None,
            connection_timeout: None,
            replica: None,
            monitoring: None,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Adds a replica with default limits (10 connections, 30 s idle timeout).
    pub fn replica(self, url: impl Into<String>) -> Self {
        self.replica_config(ReplicaStoreConfig {
            url: url.into(),
            max_connections: 10,
            idle_timeout: Duration::from_secs(30),
        })
    }

    pub fn replica_config(mut self, replica: ReplicaStoreConfig) -> Self {
        self.replica = Some(replica);
        self
    }

    pub fn monitoring(mut self, monitoring: PoolMonitoringConfig) -> Self {
        self.monitoring = Some(monitoring);
        self
    }

    pub fn build(self) -> ConfigResult<PoolConfiguration> {
        let config = PoolConfiguration {
            primary: PrimaryStoreConfig {
                url: self.primary_url,
                max_connections: self.max_connections.unwrap_or(20),
                idle_timeout: self.idle_timeout.unwrap_or(Duration::from_secs(30)),
                statement_timeout: self.statement_timeout.unwrap_or(Duration::from_secs(30)),
                connection_timeout: self.connection_timeout.unwrap_or(Duration::from_secs(2)),
            },
            replica: self.replica,
            monitoring: self.monitoring.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }
}

// ===== Cache tiers =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    Memory,
    Distributed,
}

/// One level of the cache, ordered by expected latency.
#[derive(Debug, Clone, PartialEq)]
pub struct TierConfig {
    pub kind: TierKind,
    pub ttl: Duration,
    pub max_size: Option<usize>,
    pub key_prefix: Option<String>,
}

impl TierConfig {
    pub fn memory(ttl: Duration, max_size: usize) -> Self {
        Self {
            kind: TierKind::Memory,
            ttl,
            max_size: Some(max_size),
            key_prefix: None,
        }
    }

    pub fn distributed(ttl: Duration, key_prefix: impl Into<String>) -> Self {
        Self {
            kind: TierKind::Distributed,
            ttl,
            max_size: None,
            key_prefix: Some(key_prefix.into()),
        }
    }

    /// Applies the tier's key prefix, if any.
    pub fn tier_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{prefix}{key}"),
            None => key.to_string(),
        }
    }
}

/// Connection details for the distributed tier.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedConnectionConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    pub cluster: bool,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for DistributedConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
            cluster: false,
            connect_timeout: Duration::from_secs(2),
            command_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheAlertThresholds {
    /// Minimum acceptable hit rate, in percent.
    pub hit_rate: f64,
    /// Maximum memory-tier entry count before alerting.
    pub memory_usage: usize,
    /// Fraction of requests that hit an internal cache error.
    pub error_rate: f64,
}

impl Default for CacheAlertThresholds {
    fn default() -> Self {
        Self {
            hit_rate: 70.0,
            memory_usage: 900,
            error_rate: 0.05,
        }
    }
}

pub type CacheMonitoringConfig = MonitoringConfig<CacheAlertThresholds>;

impl Default for CacheMonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            collect_interval: Duration::from_secs(30),
            alert_thresholds: CacheAlertThresholds::default(),
        }
    }
}

/// TTL given to a value promoted from the distributed tier into memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionTtl {
    /// Always the memory tier's configured TTL.
    #[default]
    MemoryTier,
    /// The distributed entry's remaining lifetime, capped at the memory tier TTL.
    CappedToRemaining,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfiguration {
    pub distributed: DistributedConnectionConfig,
    pub tiers: Vec<TierConfig>,
    pub monitoring: CacheMonitoringConfig,
    pub promotion_ttl: PromotionTtl,
}

impl Default for CacheConfiguration {
    fn default() -> Self {
        Self {
            distributed: DistributedConnectionConfig::default(),
            tiers: vec![
                TierConfig::memory(Duration::from_secs(300), 1000),
                TierConfig::distributed(Duration::from_secs(3600), "compliance:"),
            ],
            monitoring: CacheMonitoringConfig::default(),
            promotion_ttl: PromotionTtl::default(),
        }
    }
}

impl CacheConfiguration {
    /// Memory-only configuration, mostly useful for tests and local tools.
    pub fn memory_only(ttl: Duration, max_size: usize) -> Self {
        Self {
            tiers: vec![TierConfig::memory(ttl, max_size)],
            ..Self::default()
        }
    }

    pub fn memory_tier(&self) -> Option<&TierConfig> {
        self.tiers.first().filter(|tier| tier.kind == TierKind::Memory)
    }

    pub fn distributed_tier(&self) -> Option<&TierConfig> {
        self.tiers
            .iter()
            .find(|tier| tier.kind == TierKind::Distributed)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        match self.tiers.first() {
            Some(tier) if tier.kind == TierKind::Memory => {}
            Some(_) => {
                return Err(ConfigError::TierLayout(
                    "the first tier must be the memory tier".to_string(),
                ))
            }
            None => {
                return Err(ConfigError::TierLayout(
                    "at least a memory tier is required".to_string(),
                ))
            }
        }

        for kind in [TierKind::Memory, TierKind::Distributed] {
            let count = self.tiers.iter().filter(|tier| tier.kind == kind).count();
            if count > 1 {
                return Err(ConfigError::TierLayout(format!(
                    "{kind:?} tier configured {count} times"
                )));
            }
        }

        for tier in &self.tiers {
            if tier.ttl.is_zero() {
                return Err(ConfigError::invalid("cache.tier.ttl", "must be greater than zero"));
            }
            if tier.max_size == Some(0) {
                return Err(ConfigError::invalid("cache.tier.max_size", "must be greater than 0"));
            }
        }

        self.monitoring.validate()?;
        let thresholds = &self.monitoring.alert_thresholds;
        if !(0.0..=100.0).contains(&thresholds.hit_rate) {
            return Err(ConfigError::invalid(
                "cache.alert.hit_rate",
                format!("{} is not a percentage", thresholds.hit_rate),
            ));
        }
        check_fraction("cache.alert.error_rate", thresholds.error_rate)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_pool_builder_defaults() {
        let config = PoolConfiguration::builder("postgres://localhost/compliance")
            .build()
            .unwrap();

        assert_eq!(config.primary.max_connections, 20);
        assert_eq!(config.primary.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.primary.statement_timeout, Duration::from_secs(30));
        assert_eq!(config.primary.connection_timeout, Duration::from_secs(2));
        assert!(config.replica.is_none());
        assert!(config.monitoring.enabled);
        assert_eq!(config.monitoring.alert_thresholds, PoolAlertThresholds::default());
    }

    #[test]
    fn test_pool_builder_with_replica() {
        let config = PoolConfiguration::builder("postgres://primary/db")
            .max_connections(50)
            .replica("postgres://replica/db")
            .build()
            .unwrap();

        let replica = config.replica.unwrap();
        assert_eq!(replica.url, "postgres://replica/db");
        assert_eq!(replica.max_connections, 10);
        assert_eq!(config.primary.max_connections, 50);
    }

    #[test]
    fn test_pool_builder_rejects_empty_url() {
        let result = PoolConfiguration::builder("  ").build();
        assert_eq!(result.unwrap_err(), ConfigError::Missing("database.url"));
    }

    #[test]
    fn test_pool_builder_rejects_zero_connections() {
        let result = PoolConfiguration::builder("postgres://localhost/db")
            .max_connections(0)
            .build();
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[rstest]
    #[case(1.5, 0.05)]
    #[case(0.8, -0.1)]
    fn test_pool_thresholds_must_be_fractions(#[case] usage: f64, #[case] error_rate: f64) {
        let monitoring = PoolMonitoringConfig {
            alert_thresholds: PoolAlertThresholds {
                connection_usage: usage,
                error_rate,
                ..PoolAlertThresholds::default()
            },
            ..PoolMonitoringConfig::default()
        };
        let result = PoolConfiguration::builder("postgres://localhost/db")
            .monitoring(monitoring)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_interval_only_rejected_when_enabled() {
        let mut monitoring = PoolMonitoringConfig {
            collect_interval: Duration::ZERO,
            ..PoolMonitoringConfig::default()
        };
        let builder = || PoolConfiguration::builder("postgres://localhost/db");
        assert!(builder().monitoring(monitoring.clone()).build().is_err());

        monitoring.enabled = false;
        assert!(builder().monitoring(monitoring).build().is_ok());
    }

    #[test]
    fn test_cache_default_layout() {
        let config = CacheConfiguration::default();
        config.validate().unwrap();

        let memory = config.memory_tier().unwrap();
        assert_eq!(memory.ttl, Duration::from_secs(300));
        assert_eq!(memory.max_size, Some(1000));

        let distributed = config.distributed_tier().unwrap();
        assert_eq!(distributed.ttl, Duration::from_secs(3600));
        assert_eq!(distributed.tier_key("report:7"), "compliance:report:7");
        assert_eq!(config.promotion_ttl, PromotionTtl::MemoryTier);
    }

    #[test]
    fn test_memory_only_has_no_distributed_tier() {
        let config = CacheConfiguration::memory_only(Duration::from_secs(60), 10);
        config.validate().unwrap();
        assert!(config.distributed_tier().is_none());
        assert_eq!(config.memory_tier().unwrap().tier_key("k"), "k");
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::distributed_first(vec![
        TierConfig::distributed(Duration::from_secs(60), "p:"),
        TierConfig::memory(Duration::from_secs(60), 10),
    ])]
    #[case::duplicate_memory(vec![
        TierConfig::memory(Duration::from_secs(60), 10),
        TierConfig::memory(Duration::from_secs(60), 10),
    ])]
    fn test_cache_tier_layout_rejected(#[case] tiers: Vec<TierConfig>) {
        let config = CacheConfiguration {
            tiers,
            ..CacheConfiguration::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::TierLayout(_))));
    }

    #[test]
    fn test_cache_rejects_zero_ttl_and_size() {
        let config = CacheConfiguration::memory_only(Duration::ZERO, 10);
        assert!(config.validate().is_err());

        let config = CacheConfiguration::memory_only(Duration::from_secs(1), 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_hit_rate_threshold_is_percentage() {
        let mut config = CacheConfiguration::default();
        config.monitoring.alert_thresholds.hit_rate = 120.0;
        assert!(config.validate().is_err());
    }
}
