//! The data-layer context.
//!
//! A [`DataLayer`] is built once at boot, shared behind an `Arc`, and shut
//! down once on exit. It replaces any notion of process-wide manager
//! singletons: whoever needs the pools or the cache receives the context.

use compliance_data_cache::CacheTierManager;
use compliance_data_core::{CacheConfiguration, PoolConfiguration};
use compliance_data_storage::{ConnectionPoolManager, PoolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::DataLayerError;
use crate::health::DataLayerHealth;
use crate::orchestrator::{CachedQueryOrchestrator, OrchestratorConfig, QueryOptions};

#[derive(Debug, Clone)]
pub struct DataLayerConfig {
    pub pool: PoolConfiguration,
    pub cache: CacheConfiguration,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Clone)]
pub struct DataLayer {
    pool: Arc<ConnectionPoolManager>,
    cache: Arc<CacheTierManager>,
    orchestrator: CachedQueryOrchestrator,
}

impl DataLayer {
    /// Validates both configurations, opens the pools and connects the
    /// cache.
    ///
    /// An unreachable primary store aborts initialization. An unreachable
    /// replica or distributed cache tier does not: reads fall back to the
    /// primary and the cache serves from memory.
    pub async fn initialize(config: DataLayerConfig) -> Result<Self, DataLayerError> {
        let pool = ConnectionPoolManager::new(config.pool)?;
        let cache = CacheTierManager::new(config.cache)?;

        if let Err(e) = pool.initialize().await {
            error!(error = %e, "Data layer initialization failed");
            return Err(e.into());
        }
        cache.initialize().await;

        info!("Data layer initialized");
        Ok(Self::from_parts(
            Arc::new(pool),
            Arc::new(cache),
            config.orchestrator,
        ))
    }

    /// Assembles a context from managers that were initialized elsewhere.
    pub fn from_parts(
        pool: Arc<ConnectionPoolManager>,
        cache: Arc<CacheTierManager>,
        orchestrator: OrchestratorConfig,
    ) -> Self {
        Self {
            orchestrator: CachedQueryOrchestrator::new(cache.clone(), pool.clone(), orchestrator),
            pool,
            cache,
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPoolManager> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<CacheTierManager> {
        &self.cache
    }

    pub fn orchestrator(&self) -> &CachedQueryOrchestrator {
        &self.orchestrator
    }

    /// Pool for writes and read-your-writes queries.
    pub async fn primary_connection(&self) -> PoolResult<PgPool> {
        self.pool.primary_connection().await
    }

    /// Replica pool when one is open, the primary otherwise.
    pub async fn read_connection(&self) -> PoolResult<PgPool> {
        self.pool.read_connection().await
    }

    /// Shorthand for [`CachedQueryOrchestrator::cached_query`].
    pub async fn cached_query<T, E, F, Fut>(
        &self,
        key: &str,
        query_fn: F,
        options: QueryOptions,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.orchestrator.cached_query(key, query_fn, options).await
    }

    /// Drops a key from both cache tiers, typically after a write.
    pub async fn invalidate(&self, key: &str) {
        self.cache.del(key).await;
    }

    pub async fn invalidate_all(&self) {
        self.cache.clear().await;
    }

    /// Checks the stores and the cache concurrently.
    pub async fn health_check(&self) -> DataLayerHealth {
        let (pool, cache) = tokio::join!(self.pool.health_check(), self.cache.health_check());
        DataLayerHealth::from_parts(
            pool,
            cache,
            self.cache.config().distributed_tier().is_some(),
        )
    }

    /// Shuts the pools and the cache down concurrently.
    pub async fn shutdown(&self) {
        tokio::join!(self.pool.shutdown(), self.cache.shutdown());
        info!("Data layer shut down");
    }
}
