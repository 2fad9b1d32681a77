use compliance_data_core::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which physical store a pool points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreRole {
    Primary,
    Replica,
}

impl fmt::Display for StoreRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreRole::Primary => write!(f, "primary"),
            StoreRole::Replica => write!(f, "replica"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Invalid pool configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to connect to {role} store: {source}")]
    Connect {
        role: StoreRole,
        #[source]
        source: sqlx::Error,
    },

    #[error("Connection pool manager is not initialized")]
    NotInitialized,

    #[error("Failed to acquire {role} connection: {source}")]
    Acquire {
        role: StoreRole,
        #[source]
        source: sqlx::Error,
    },
}

pub type PoolResult<T> = std::result::Result<T, PoolError>;
