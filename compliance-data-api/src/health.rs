//! Aggregated health of the data layer.

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use compliance_data_cache::CacheHealth;
use compliance_data_core::{CacheMetrics, PoolMetrics};
use compliance_data_storage::PoolHealth;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, with reduced redundancy or latency guarantees.
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Returns true if the status is healthy or degraded
    pub fn is_available(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The worse of the two.
    pub fn combine(&self, other: &HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseHealth {
    pub primary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica: Option<bool>,
}

impl DatabaseHealth {
    fn status(&self) -> HealthStatus {
        match (self.primary, self.replica) {
            (false, _) => HealthStatus::Unhealthy,
            (true, Some(false)) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheSummary {
    pub healthy: bool,
    pub distributed_connected: bool,
    pub memory_entries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataLayerHealth {
    pub status: HealthStatus,
    pub database: DatabaseHealth,
    pub cache: CacheSummary,
    pub pool_metrics: PoolMetrics,
    pub cache_metrics: CacheMetrics,
    pub timestamp: DateTime<Utc>,
}

impl DataLayerHealth {
    /// `distributed_configured` tells a memory-only deployment apart from a
    /// lost distributed tier.
    pub fn from_parts(pool: PoolHealth, cache: CacheHealth, distributed_configured: bool) -> Self {
        let database = DatabaseHealth {
            primary: pool.primary,
            replica: pool.replica,
        };

        let cache_status = if !cache.healthy {
            HealthStatus::Unhealthy
        } else if distributed_configured && !cache.distributed_connected {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status: database.status().combine(&cache_status),
            database,
            cache: CacheSummary {
                healthy: cache.healthy,
                distributed_connected: cache.distributed_connected,
                memory_entries: cache.memory_entries,
            },
            pool_metrics: pool.metrics,
            cache_metrics: cache.metrics,
            timestamp: Utc::now(),
        }
    }
}
