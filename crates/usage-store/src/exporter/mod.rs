//! Periodic usage export
//!
//! The scrape loop polls the [`UsageStore`](crate::store::UsageStore) on a
//! fixed tick, republishes the usage gauges and reports component health.
//! Provider traffic stays bounded by the store's caches, not by the tick.

mod r#loop;
mod snapshot;

pub use r#loop::{ScrapeLoop, ScrapeLoopBuilder, ScrapeLoopConfig};
pub use snapshot::{LatestScrape, ScrapeSummary};
