pub mod distributed;
pub mod error;
pub mod manager;
pub mod memory;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use distributed::{connect, DistributedTier, RedisTier};
pub use error::{CacheError, CacheResult};
pub use manager::{CacheAlert, CacheHealth, CacheTierManager};
pub use memory::{Lookup, MemoryTier};
