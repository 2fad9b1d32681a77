use compliance_data_core::ConfigError;
use thiserror::Error;

/// Failures at the cache boundary.
///
/// Only configuration errors ever reach a caller; everything else is logged,
/// counted and turned into a miss or a no-op by the tier manager.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid cache configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Distributed tier error: {0}")]
    Distributed(#[from] redis::RedisError),

    #[error("Distributed tier timed out during {0}")]
    Timeout(&'static str),

    #[error("Operation not supported by the distributed tier: {0}")]
    Unsupported(&'static str),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;
