//! Distributed (shared, cross-process) cache tier.
//!
//! The tier stores JSON payloads under already-prefixed keys. Every call is
//! bounded by the configured command timeout so a slow or partitioned server
//! degrades into a cache miss instead of a stalled request.

use async_trait::async_trait;
use compliance_data_core::{ConfigError, DistributedConnectionConfig};
use redis::aio::ConnectionLike;
use redis::RedisResult;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{CacheError, CacheResult};

const SCAN_BATCH: usize = 500;

#[async_trait]
pub trait DistributedTier: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, payload: &str, ttl: Duration) -> CacheResult<()>;

    async fn del(&self, key: &str) -> CacheResult<()>;

    /// Removes every key under `prefix`, or the whole logical database when
    /// no prefix is configured.
    async fn clear(&self, prefix: Option<&str>) -> CacheResult<()>;

    /// Remaining lifetime of a key; `None` if it is missing or has no expiry.
    async fn remaining_ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    async fn ping(&self) -> CacheResult<()>;

    async fn close(&self) {}
}

/// Redis-backed tier, generic over single-node and cluster connections.
#[derive(Clone)]
pub struct RedisTier<C> {
    conn: C,
    command_timeout: Duration,
    cluster: bool,
}

impl<C> RedisTier<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    pub fn new(conn: C, command_timeout: Duration, cluster: bool) -> Self {
        Self {
            conn,
            command_timeout,
            cluster,
        }
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = RedisResult<T>> + Send,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CacheError::Timeout(op)),
        }
    }
}

#[async_trait]
impl<C> DistributedTier for RedisTier<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        self.bounded("get", async move {
            let result: RedisResult<Option<String>> =
                redis::cmd("GET").arg(key).query_async(&mut conn).await;
            result
        })
        .await
    }

    async fn set(&self, key: &str, payload: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let millis = ttl.as_millis().max(1) as u64;
        self.bounded("set", async move {
            let result: RedisResult<()> = redis::cmd("SET")
                .arg(key)
                .arg(payload)
                .arg("PX")
                .arg(millis)
                .query_async(&mut conn)
                .await;
            result
        })
        .await
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        self.bounded("del", async move {
            let result: RedisResult<()> = redis::cmd("DEL").arg(key).query_async(&mut conn).await;
            result
        })
        .await
    }

    async fn clear(&self, prefix: Option<&str>) -> CacheResult<()> {
        let Some(prefix) = prefix else {
            let mut conn = self.conn.clone();
            return self
                .bounded("clear", async move {
                    let result: RedisResult<()> =
                        redis::cmd("FLUSHDB").query_async(&mut conn).await;
                    result
                })
                .await;
        };

        // SCAN only walks a single node of a cluster.
        if self.cluster {
            return Err(CacheError::Unsupported("prefix clear in cluster mode"));
        }

        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        loop {
            let mut conn = self.conn.clone();
            let pattern = pattern.as_str();
            let (next, keys) = self
                .bounded("clear", async move {
                    let result: RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await;
                    result
                })
                .await?;

            if !keys.is_empty() {
                let mut conn = self.conn.clone();
                self.bounded("clear", async move {
                    let result: RedisResult<()> =
                        redis::cmd("DEL").arg(&keys).query_async(&mut conn).await;
                    result
                })
                .await?;
            }

            cursor = next;
            if cursor == 0 {
                return Ok(());
            }
        }
    }

    async fn remaining_ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let mut conn = self.conn.clone();
        let millis = self
            .bounded("pttl", async move {
                let result: RedisResult<i64> = redis::cmd("PTTL").arg(key).query_async(&mut conn).await;
                result
            })
            .await?;

        // -2: missing, -1: no expiry
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        self.bounded("ping", async move {
            let result: RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
            result
        })
        .await?;
        Ok(())
    }
}

/// Builds the `redis://` URL, percent-encoding the password.
pub fn connection_url(config: &DistributedConnectionConfig) -> Result<String, ConfigError> {
    let raw = if config.cluster {
        format!("redis://{}:{}", config.host, config.port)
    } else {
        format!("redis://{}:{}/{}", config.host, config.port, config.db)
    };

    let mut url = url::Url::parse(&raw)
        .map_err(|e| ConfigError::invalid("redis.host", e.to_string()))?;
    if let Some(password) = &config.password {
        url.set_password(Some(password))
            .map_err(|_| ConfigError::invalid("redis.password", "cannot be set on this URL"))?;
    }
    Ok(url.to_string())
}

/// Connects to the distributed tier within the configured connect timeout
/// and verifies the connection with a ping.
pub async fn connect(config: &DistributedConnectionConfig) -> CacheResult<Arc<dyn DistributedTier>> {
    let url = connection_url(config)?;

    let connecting = async {
        let tier: Arc<dyn DistributedTier> = if config.cluster {
            let client = redis::cluster::ClusterClient::new(vec![url.as_str()])?;
            let conn = client.get_async_connection().await?;
            Arc::new(RedisTier::new(conn, config.command_timeout, true))
        } else {
            let client = redis::Client::open(url.as_str())?;
            let conn = client.get_connection_manager().await?;
            Arc::new(RedisTier::new(conn, config.command_timeout, false))
        };
        Ok::<_, CacheError>(tier)
    };

    let tier = tokio::time::timeout(config.connect_timeout, connecting)
        .await
        .map_err(|_| CacheError::Timeout("connect"))??;
    tier.ping().await?;

    info!(
        host = %config.host,
        port = config.port,
        cluster = config.cluster,
        "Distributed cache tier connected"
    );
    Ok(tier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_connection_url_single_node() {
        let config = DistributedConnectionConfig {
            db: 3,
            ..DistributedConnectionConfig::default()
        };
        assert_eq!(connection_url(&config).unwrap(), "redis://localhost:6379/3");
    }

    #[test]
    fn test_connection_url_encodes_password() {
        let config = DistributedConnectionConfig {
            password: Some("p@ss word".to_string()),
            ..DistributedConnectionConfig::default()
        };
        assert_eq!(
            connection_url(&config).unwrap(),
            "redis://:p%40ss%20word@localhost:6379/0"
        );
    }

    #[test]
    fn test_connection_url_cluster_omits_db() {
        let config = DistributedConnectionConfig {
            cluster: true,
            db: 5,
            ..DistributedConnectionConfig::default()
        };
        assert_eq!(connection_url(&config).unwrap(), "redis://localhost:6379");
    }

    #[tokio::test]
    async fn test_connect_unreachable_fails_within_timeout() {
        let config = DistributedConnectionConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout: Duration::from_millis(500),
            ..DistributedConnectionConfig::default()
        };
        let started = std::time::Instant::now();
        assert!(connect(&config).await.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
