//! Scrape loop
//!
//! Runs one store scrape per tick, publishes the samples and keeps the
//! health registry in step with the outcome.

use super::LatestScrape;
use crate::health::{components, HealthRegistry};
use crate::observability::{StructuredLogger, UsageMetrics};
use crate::store::{ScrapeReport, UsageStore};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

const EXPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration for the scrape loop
#[derive(Debug, Clone)]
pub struct ScrapeLoopConfig {
    /// Time between scrapes (default: 120 seconds)
    pub tick_interval: Duration,
    /// Value of the `environment` label on published gauges
    pub environment: String,
}

impl Default for ScrapeLoopConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(120),
            environment: String::new(),
        }
    }
}

/// Periodically scrapes the usage store and exports the result
pub struct ScrapeLoop {
    store: Arc<UsageStore>,
    metrics: UsageMetrics,
    health: HealthRegistry,
    logger: StructuredLogger,
    latest: LatestScrape,
    config: ScrapeLoopConfig,
}

impl ScrapeLoop {
    pub fn new(
        store: Arc<UsageStore>,
        metrics: UsageMetrics,
        health: HealthRegistry,
        logger: StructuredLogger,
        latest: LatestScrape,
        config: ScrapeLoopConfig,
    ) -> Self {
        Self {
            store,
            metrics,
            health,
            logger,
            latest,
            config,
        }
    }

    /// Run until `shutdown` fires; the first scrape starts immediately
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        self.logger.log_startup(EXPORTER_VERSION);
        debug!(
            interval_secs = self.config.tick_interval.as_secs(),
            "Starting usage scrape loop"
        );

        for name in [
            components::INVENTORY,
            components::METRIC_SOURCE,
            components::FETCH_LATCH,
        ] {
            self.health.register(name).await;
        }

        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut scrape_count = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.scrape_once().await;
                    scrape_count += 1;
                    debug!(
                        scrape = scrape_count,
                        samples = report.samples.len(),
                        errors = report.errors,
                        fetch_disabled = report.fetch_disabled,
                        "Scrape cycle complete"
                    );
                }
                _ = shutdown.recv() => {
                    self.logger.log_shutdown("shutdown signal received");
                    break;
                }
            }
        }
    }

    /// Scrape the store once, then export and report health
    pub async fn scrape_once(&self) -> ScrapeReport {
        let report = self.store.scrape().await;
        self.export(&report);
        self.latest.record(&self.config.environment, &report).await;
        self.report_health(&report).await;
        report
    }

    fn export(&self, report: &ScrapeReport) {
        self.metrics
            .publish(&self.config.environment, &report.samples);
        self.metrics
            .observe_scrape_latency(report.elapsed.as_secs_f64());
        self.metrics
            .set_instances_tracked(i64::try_from(report.instances).unwrap_or(i64::MAX));
        self.metrics.inc_fetch_errors(report.errors as u64);
        self.metrics.set_fetch_disabled(report.fetch_disabled);
    }

    async fn report_health(&self, report: &ScrapeReport) {
        if report.fetch_disabled {
            self.health
                .set_unhealthy(
                    components::FETCH_LATCH,
                    "provider rejected credentials, restart required",
                )
                .await;
        } else {
            self.health.set_healthy(components::FETCH_LATCH).await;
        }

        match &report.inventory_error {
            Some(err) => {
                self.health
                    .set_degraded(components::INVENTORY, err.clone())
                    .await
            }
            None => self.health.set_healthy(components::INVENTORY).await,
        }

        let metric_errors = report
            .errors
            .saturating_sub(usize::from(report.inventory_error.is_some()));
        if metric_errors > 0 {
            self.health
                .set_degraded(
                    components::METRIC_SOURCE,
                    format!("{metric_errors} usage lookups failed"),
                )
                .await;
        } else {
            self.health.set_healthy(components::METRIC_SOURCE).await;
        }

        self.health.set_ready(true).await;
    }
}

/// Builder for the scrape loop
pub struct ScrapeLoopBuilder {
    store: Option<Arc<UsageStore>>,
    metrics: Option<UsageMetrics>,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
    latest: Option<LatestScrape>,
    config: ScrapeLoopConfig,
}

impl ScrapeLoopBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            metrics: None,
            health: None,
            logger: None,
            latest: None,
            config: ScrapeLoopConfig::default(),
        }
    }

    pub fn store(mut self, store: Arc<UsageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn metrics(mut self, metrics: UsageMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Share the latest scrape with the `/usage` endpoint
    pub fn latest(mut self, latest: LatestScrape) -> Self {
        self.latest = Some(latest);
        self
    }

    pub fn tick_interval(mut self, tick_interval: Duration) -> Self {
        self.config.tick_interval = tick_interval;
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.config.environment = environment.into();
        self
    }

    /// Build the loop; only the store is required
    pub fn build(self) -> Result<ScrapeLoop> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Usage store is required"))?;
        if self.config.tick_interval.is_zero() {
            anyhow::bail!("Tick interval must be greater than zero");
        }

        let logger = self
            .logger
            .unwrap_or_else(|| StructuredLogger::new(self.config.environment.clone()));

        Ok(ScrapeLoop::new(
            store,
            self.metrics.unwrap_or_default(),
            self.health.unwrap_or_default(),
            logger,
            self.latest.unwrap_or_default(),
            self.config,
        ))
    }
}

impl Default for ScrapeLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
