//! Cache-aside orchestration for read paths.
//!
//! [`CachedQueryOrchestrator::cached_query`] serves a key from the cache
//! tiers when it can and otherwise runs the caller's origin query, times it,
//! records the timing with the pool manager and stores a successful result.
//! Origin errors reach the caller unchanged and are never cached.
//!
//! ```no_run
//! # use compliance_data_api::{CachedQueryOrchestrator, QueryOptions};
//! # async fn run(orchestrator: CachedQueryOrchestrator, pool: sqlx::PgPool) -> Result<(), sqlx::Error> {
//! let score: i64 = orchestrator
//!     .cached_query(
//!         "dashboard:42",
//!         || async {
//!             sqlx::query_scalar("SELECT score FROM dashboards WHERE id = 42")
//!                 .fetch_one(&pool)
//!                 .await
//!         },
//!         QueryOptions::default(),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

use compliance_data_cache::CacheTierManager;
use compliance_data_storage::ConnectionPoolManager;
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::singleflight::{SingleFlight, Slot};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Let concurrent misses for one key share a single origin call.
    #[serde(default)]
    pub coalesce_misses: bool,
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Overrides each tier's default TTL when the result is stored.
    pub ttl: Option<Duration>,
    /// Skip the cache read; the fresh result still replaces the cached one.
    pub force_refresh: bool,
}

impl QueryOptions {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    pub fn force_refresh() -> Self {
        Self {
            force_refresh: true,
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct CachedQueryOrchestrator {
    cache: Arc<CacheTierManager>,
    pool: Arc<ConnectionPoolManager>,
    flights: Option<Arc<SingleFlight>>,
}

impl CachedQueryOrchestrator {
    pub fn new(
        cache: Arc<CacheTierManager>,
        pool: Arc<ConnectionPoolManager>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            cache,
            pool,
            flights: config
                .coalesce_misses
                .then(|| Arc::new(SingleFlight::new())),
        }
    }

    pub fn cache(&self) -> &Arc<CacheTierManager> {
        &self.cache
    }

    pub fn pool(&self) -> &Arc<ConnectionPoolManager> {
        &self.pool
    }

    /// Returns the cached value for `key`, or runs `query_fn` and caches its
    /// result.
    ///
    /// The timing of `query_fn` is recorded under `key` as the query
    /// signature, whether it succeeds or fails. An error from `query_fn` is
    /// returned as is and leaves the cache untouched.
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
        if options.force_refresh {
            return self.run_origin(key, query_fn, options.ttl).await;
        }

        if let Some(value) = self.cache.get::<T>(key).await {
            return Ok(value);
        }

        let Some(flights) = &self.flights else {
            return self.run_origin(key, query_fn, options.ttl).await;
        };

        match flights.acquire(key) {
            Slot::Leader(guard) => {
                // The previous leader may have finished between our miss and acquire.
                if let Some(value) = self.cache.peek::<T>(key).await {
                    return Ok(value);
                }
                let result = self.run_origin(key, query_fn, options.ttl).await;
                drop(guard);
                result
            }
            Slot::Follower(mut done) => {
                counter!("cache_coalesced_requests_total").increment(1);
                // Closed or lagged both mean the leader is gone.
                let _ = done.recv().await;
                if let Some(value) = self.cache.peek::<T>(key).await {
                    return Ok(value);
                }
                debug!(key, "Coalesced miss found no cached value, querying origin");
                self.run_origin(key, query_fn, options.ttl).await
            }
        }
    }

    async fn run_origin<T, E, F, Fut>(
        &self,
        key: &str,
        query_fn: F,
        ttl: Option<Duration>,
    ) -> Result<T, E>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let result = query_fn().await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(value) => {
                self.pool.record_query(key, duration_ms, true);
                self.cache.set(key, &value, ttl).await;
                Ok(value)
            }
            Err(e) => {
                self.pool.record_query(key, duration_ms, false);
                Err(e)
            }
        }
    }
}
