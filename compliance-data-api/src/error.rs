use compliance_data_cache::CacheError;
use compliance_data_core::ConfigError;
use compliance_data_storage::PoolError;
use thiserror::Error;

/// Boot-time failures. Anything here aborts startup.
#[derive(Error, Debug)]
pub enum DataLayerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to load settings: {0}")]
    Settings(#[from] config::ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}
