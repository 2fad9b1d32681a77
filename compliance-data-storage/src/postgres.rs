use compliance_data_core::{PrimaryStoreConfig, ReplicaStoreConfig};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;
use std::time::Duration;

/// Open the read-write pool. Connects eagerly so a bad URL or an unreachable
/// server fails here rather than on the first query.
pub async fn connect_primary(config: &PrimaryStoreConfig) -> Result<PgPool, sqlx::Error> {
    let connect_options = PgConnectOptions::from_str(&config.url)?.options([(
        "statement_timeout",
        config.statement_timeout.as_millis().to_string(),
    )]);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .idle_timeout(Some(config.idle_timeout))
        .acquire_timeout(config.connection_timeout)
        .connect_with(connect_options)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        statement_timeout_ms = config.statement_timeout.as_millis() as u64,
        "Primary connection pool created"
    );

    Ok(pool)
}

/// Open the read-only replica pool. The replica inherits the primary's
/// connection timeout.
pub async fn connect_replica(
    config: &ReplicaStoreConfig,
    connection_timeout: Duration,
) -> Result<PgPool, sqlx::Error> {
    let connect_options = PgConnectOptions::from_str(&config.url)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .idle_timeout(Some(config.idle_timeout))
        .acquire_timeout(connection_timeout)
        .connect_with(connect_options)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        "Replica connection pool created"
    );

    Ok(pool)
}

/// Trivial round-trip used by health checks.
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Point-in-time occupancy of one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatus {
    pub size: u32,
    pub idle: u32,
    pub active: u32,
}

impl PoolStatus {
    pub fn of(pool: &PgPool) -> Self {
        let size = pool.size();
        let idle = pool.num_idle() as u32;
        Self {
            size,
            idle,
            active: size.saturating_sub(idle),
        }
    }
}

impl std::ops::Add for PoolStatus {
    type Output = PoolStatus;

    fn add(self, other: PoolStatus) -> PoolStatus {
        PoolStatus {
            size: self.size + other.size,
            idle: self.idle + other.idle,
            active: self.active + other.active,
        }
    }
}

impl std::fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool(size: {}, active: {}, idle: {})",
            self.size, self.active, self.idle
        )
    }
}
