//! Usage store for cloud-managed infrastructure
//!
//! This crate turns slow, rate-limited provider calls into a cheap,
//! repeatedly-pollable view of peak resource usage:
//! - Expiring caches for instance inventory and metric values
//! - Inventory refresh across database, cache and streaming families
//! - Memoized metric-statistics lookups with broker aggregation
//! - A fetchability latch that stops calls after authorization failures
//! - Prometheus exposition, health checks and a periodic scrape loop

pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod exporter;
pub mod health;
pub mod inventory;
pub mod memoizer;
pub mod models;
pub mod observability;
pub mod provider;
pub mod store;

#[cfg(test)]
mod testing;

pub use cache::ExpiringCache;
pub use config::UsageConfig;
pub use engine::{CombinationPolicy, Engine, EngineProfile};
pub use error::{ProviderError, UsageError};
pub use exporter::{LatestScrape, ScrapeLoop, ScrapeLoopBuilder, ScrapeLoopConfig, ScrapeSummary};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, UsageMetrics};
pub use provider::{InventorySource, MetricSource};
pub use store::{FetchLatch, ScrapeReport, StoreSettings, UsageStore};
