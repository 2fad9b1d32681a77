//! Process settings, layered from optional files and the environment.
//!
//! Sources, later ones winning:
//! 1. `config/default.{toml,yaml,json}`
//! 2. `config/local.{toml,yaml,json}`
//! 3. `COMPLIANCE_DATA_*` environment variables, with `__` between nesting
//!    levels, e.g. `COMPLIANCE_DATA_DATABASE__URL` or
//!    `COMPLIANCE_DATA_REDIS__PORT`.
//!
//! Only `database.url` is required.

use compliance_data_core::{
    CacheAlertThresholds, CacheConfiguration, CacheMonitoringConfig, ConfigResult,
    DistributedConnectionConfig, PoolAlertThresholds, PoolConfiguration, PoolMonitoringConfig,
    PromotionTtl, ReplicaStoreConfig, TierConfig,
};
use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::data_layer::DataLayerConfig;
use crate::observability::logging::{LogConfig, LogFormat};
use crate::orchestrator::OrchestratorConfig;

pub const ENV_PREFIX: &str = "COMPLIANCE_DATA";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub log: LogSettings,
    pub database: DatabaseSettings,
    #[serde(default)]
    pub pool_monitoring: PoolMonitoringSettings,
    #[serde(default)]
    pub redis: RedisSettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: Option<String>,
    pub format: LogFormat,
    /// Per-module directives, e.g. `sqlx=warn,compliance_data_cache=debug`.
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
    #[serde(default)]
    pub replica_url: Option<String>,
    #[serde(default = "default_replica_max_connections")]
    pub replica_max_connections: u32,
    #[serde(default = "default_idle_timeout_ms")]
    pub replica_idle_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    20
}

fn default_replica_max_connections() -> u32 {
    10
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_connection_timeout_ms() -> u64 {
    2_000
}

fn default_statement_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolMonitoringSettings {
    pub enabled: bool,
    pub collect_interval_ms: u64,
    pub connection_usage_threshold: f64,
    pub query_timeout_ms: u64,
    pub error_rate_threshold: f64,
}

impl Default for PoolMonitoringSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            collect_interval_ms: 30_000,
            connection_usage_threshold: 0.8,
            query_timeout_ms: 5_000,
            error_rate_threshold: 0.05,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    /// `false` runs the cache with the memory tier only.
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    pub cluster: bool,
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
            cluster: false,
            connect_timeout_ms: 2_000,
            command_timeout_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub memory_ttl_secs: u64,
    pub memory_max_size: usize,
    pub memory_key_prefix: Option<String>,
    pub distributed_ttl_secs: u64,
    pub distributed_key_prefix: String,
    pub promotion_ttl: PromotionTtl,
    pub coalesce_misses: bool,
    pub monitoring_enabled: bool,
    pub collect_interval_ms: u64,
    pub hit_rate_threshold: f64,
    pub memory_usage_threshold: usize,
    pub error_rate_threshold: f64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory_ttl_secs: 300,
            memory_max_size: 1000,
            memory_key_prefix: None,
            distributed_ttl_secs: 3600,
            distributed_key_prefix: "compliance:".to_string(),
            promotion_ttl: PromotionTtl::default(),
            coalesce_misses: false,
            monitoring_enabled: true,
            collect_interval_ms: 30_000,
            hit_rate_threshold: 70.0,
            memory_usage_threshold: 900,
            error_rate_threshold: 0.05,
        }
    }
}

impl Settings {
    /// Loads settings from the config files and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
    }

    fn load_with(environment: Environment) -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(environment)
            .build()?;

        config.try_deserialize()
    }

    pub fn pool_configuration(&self) -> ConfigResult<PoolConfiguration> {
        let db = &self.database;
        let monitoring = &self.pool_monitoring;

        let mut builder = PoolConfiguration::builder(db.url.clone())
            .max_connections(db.max_connections)
            .idle_timeout(Duration::from_millis(db.idle_timeout_ms))
            .connection_timeout(Duration::from_millis(db.connection_timeout_ms))
            .statement_timeout(Duration::from_millis(db.statement_timeout_ms))
            .monitoring(PoolMonitoringConfig {
                enabled: monitoring.enabled,
                collect_interval: Duration::from_millis(monitoring.collect_interval_ms),
                alert_thresholds: PoolAlertThresholds {
                    connection_usage: monitoring.connection_usage_threshold,
                    query_timeout: Duration::from_millis(monitoring.query_timeout_ms),
                    error_rate: monitoring.error_rate_threshold,
                },
            });

        if let Some(url) = db.replica_url.as_ref().filter(|url| !url.trim().is_empty()) {
            builder = builder.replica_config(ReplicaStoreConfig {
                url: url.clone(),
                max_connections: db.replica_max_connections,
                idle_timeout: Duration::from_millis(db.replica_idle_timeout_ms),
            });
        }

        builder.build()
    }

    pub fn cache_configuration(&self) -> ConfigResult<CacheConfiguration> {
        let cache = &self.cache;
        let redis = &self.redis;

        let mut memory = TierConfig::memory(
            Duration::from_secs(cache.memory_ttl_secs),
            cache.memory_max_size,
        );
        memory.key_prefix = cache.memory_key_prefix.clone();

        let mut tiers = vec![memory];
        if redis.enabled {
            tiers.push(TierConfig::distributed(
                Duration::from_secs(cache.distributed_ttl_secs),
                cache.distributed_key_prefix.clone(),
            ));
        }

        let config = CacheConfiguration {
            distributed: DistributedConnectionConfig {
                host: redis.host.clone(),
                port: redis.port,
                password: redis.password.clone().filter(|p| !p.is_empty()),
                db: redis.db,
                cluster: redis.cluster,
                connect_timeout: Duration::from_millis(redis.connect_timeout_ms),
                command_timeout: Duration::from_millis(redis.command_timeout_ms),
            },
            tiers,
            monitoring: CacheMonitoringConfig {
                enabled: cache.monitoring_enabled,
                collect_interval: Duration::from_millis(cache.collect_interval_ms),
                alert_thresholds: CacheAlertThresholds {
                    hit_rate: cache.hit_rate_threshold,
                    memory_usage: cache.memory_usage_threshold,
                    error_rate: cache.error_rate_threshold,
                },
            },
            promotion_ttl: cache.promotion_ttl,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn data_layer_config(&self) -> ConfigResult<DataLayerConfig> {
        Ok(DataLayerConfig {
            pool: self.pool_configuration()?,
            cache: self.cache_configuration()?,
            orchestrator: OrchestratorConfig {
                coalesce_misses: self.cache.coalesce_misses,
            },
        })
    }

    pub fn log_config(&self) -> LogConfig {
        let mut config = LogConfig {
            format: self.log.format,
            filter: self.log.filter.clone(),
            ..LogConfig::default()
        };
        if let Some(level) = &self.log.level {
            config.level = level.clone();
        }
        config
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
