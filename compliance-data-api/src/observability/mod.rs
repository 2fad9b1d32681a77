//! Process-wide logging and metrics setup.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{init_metrics, MetricsError};
