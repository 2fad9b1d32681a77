pub mod error;
pub mod manager;
pub mod postgres;
pub mod stats;

pub use error::{PoolError, PoolResult, StoreRole};
pub use manager::{ConnectionPoolManager, PoolAlert, PoolHealth};
pub use stats::{QueryStats, MAX_SIGNATURE_LEN};
