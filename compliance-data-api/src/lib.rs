//! Data-access resilience layer for the compliance platform.
//!
//! - [`DataLayer`]: explicit context owning the connection pools and the
//!   cache tiers, created once at boot and passed to request handlers.
//! - [`CachedQueryOrchestrator`]: cache-aside entry point for read paths.
//! - [`Settings`]: environment-sourced configuration.
//! - [`http`]: liveness, readiness and Prometheus endpoints.

pub mod data_layer;
pub mod error;
pub mod health;
pub mod http;
pub mod observability;
pub mod orchestrator;
pub mod settings;
pub mod singleflight;

pub use data_layer::{DataLayer, DataLayerConfig};
pub use error::DataLayerError;
pub use health::{CacheSummary, DataLayerHealth, DatabaseHealth, HealthStatus};
pub use http::{router, AppState};
pub use orchestrator::{CachedQueryOrchestrator, OrchestratorConfig, QueryOptions};
pub use settings::Settings;
