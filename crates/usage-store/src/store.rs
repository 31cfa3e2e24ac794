//! Usage orchestration
//!
//! `UsageStore` ties the inventory and the metric memoizer together and
//! owns the fetch latch: the first provider error that denotes rejected
//! credentials (401/403) stops every later provider call until the process
//! restarts.

use crate::error::UsageError;
use crate::inventory::{InventoryFilter, InventoryStore};
use crate::memoizer::MetricMemoizer;
use crate::models::{InstanceInfo, MetricKind, ResourceTags, UsageSample};
use crate::observability::StructuredLogger;
use crate::provider::{InventorySource, MetricSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Settings the store is built with
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// TTL of inventory rows and metric figures
    pub scrape_interval: Duration,
    /// Length of the metric window ending at an instance's collection time
    pub lookback: Duration,
    /// Tags a relational resource must carry
    pub expected_tags: ResourceTags,
    /// Substring required in identifiers of untagged resources
    pub environment_name: String,
}

/// One-way latch set by an authorization failure
#[derive(Debug, Default)]
pub struct FetchLatch {
    stopped: AtomicBool,
}

impl FetchLatch {
    pub fn is_set(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Set the latch if `err` is an auth failure; true only on the first trip
    pub fn trip_on(&self, err: &UsageError) -> bool {
        err.is_auth_failure() && !self.stopped.swap(true, Ordering::SeqCst)
    }
}

/// Outcome of one scrape
#[derive(Debug, Clone, Default)]
pub struct ScrapeReport {
    /// Instances listed by the inventory
    pub instances: usize,
    pub samples: Vec<UsageSample>,
    /// Failed lookups, partial broker aggregations included
    pub errors: usize,
    /// Set when the inventory could not be listed
    pub inventory_error: Option<String>,
    pub fetch_disabled: bool,
    pub elapsed: Duration,
}

/// Cached view of peak usage per instance
pub struct UsageStore {
    inventory: InventoryStore,
    memoizer: MetricMemoizer,
    latch: FetchLatch,
    logger: StructuredLogger,
}

impl UsageStore {
    pub fn new(
        settings: StoreSettings,
        inventory_source: Arc<dyn InventorySource>,
        metric_source: Arc<dyn MetricSource>,
        logger: StructuredLogger,
    ) -> Self {
        let filter = InventoryFilter::new(settings.expected_tags, settings.environment_name);
        Self {
            inventory: InventoryStore::new(inventory_source, filter, settings.scrape_interval),
            memoizer: MetricMemoizer::new(
                metric_source,
                settings.scrape_interval,
                settings.lookback,
            ),
            latch: FetchLatch::default(),
            logger,
        }
    }

    pub fn is_fetch_disabled(&self) -> bool {
        self.latch.is_set()
    }

    /// Current instance list, refreshing the inventory when stale
    pub async fn get_instances(&self) -> Result<Vec<InstanceInfo>, UsageError> {
        self.ensure_fetchable()?;
        let stale = self.inventory.needs_refresh();
        let instances = self
            .inventory
            .instances()
            .await
            .map_err(|err| self.observe(err))?;
        if stale {
            self.logger.log_inventory_refreshed(instances.len());
        }
        Ok(instances)
    }

    /// Peak CPU of `instance`, cached under `key`
    pub async fn get_max_cpu_usage(
        &self,
        key: &str,
        instance: &InstanceInfo,
    ) -> Result<f64, UsageError> {
        self.ensure_fetchable()?;
        self.memoizer
            .max_cpu_usage(key, instance)
            .await
            .map_err(|err| self.observe(err))
    }

    /// Peak memory of `instance`, cached under `key`
    pub async fn get_max_memory_usage(
        &self,
        key: &str,
        instance: &InstanceInfo,
    ) -> Result<f64, UsageError> {
        self.ensure_fetchable()?;
        self.memoizer
            .max_memory_usage(key, instance)
            .await
            .map_err(|err| self.observe(err))
    }

    /// Collect CPU (and, where reported, memory) samples for every instance
    ///
    /// Lookup failures are logged and skipped; a CPU failure also skips the
    /// memory lookup of that instance. A streaming cluster with failed
    /// brokers is reported from the brokers that answered.
    pub async fn scrape(&self) -> ScrapeReport {
        let start = Instant::now();
        let mut report = ScrapeReport::default();

        let instances = match self.get_instances().await {
            Ok(instances) => instances,
            Err(err) => {
                if !matches!(err, UsageError::FetchDisabled) {
                    self.logger.log_inventory_failure(&err);
                    report.errors += 1;
                    report.inventory_error = Some(err.to_string());
                }
                report.fetch_disabled = self.is_fetch_disabled();
                report.elapsed = start.elapsed();
                return report;
            }
        };
        report.instances = instances.len();

        for instance in &instances {
            if self.is_fetch_disabled() {
                break;
            }
            let key = instance.usage_key();

            let cpu = self.get_max_cpu_usage(&key, instance).await;
            if !self.record(&mut report, instance, &key, MetricKind::Cpu, cpu) {
                continue;
            }

            if instance.engine.reports_memory() {
                let memory = self.get_max_memory_usage(&key, instance).await;
                self.record(&mut report, instance, &key, MetricKind::Memory, memory);
            }
        }

        report.fetch_disabled = self.is_fetch_disabled();
        report.elapsed = start.elapsed();
        self.logger.log_scrape(
            report.instances,
            report.samples.len(),
            report.errors,
            report.elapsed.as_millis(),
        );
        report
    }

    /// Push a sample for `result` if it carries a value; false on failure
    fn record(
        &self,
        report: &mut ScrapeReport,
        instance: &InstanceInfo,
        key: &str,
        kind: MetricKind,
        result: Result<f64, UsageError>,
    ) -> bool {
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                report.errors += 1;
                match err.partial_value() {
                    Some(value) => {
                        self.logger.log_partial_brokers(instance, value, &err);
                        value
                    }
                    None => {
                        if !matches!(err, UsageError::FetchDisabled) {
                            self.logger.log_metric_failure(instance, kind, &err);
                        }
                        return false;
                    }
                }
            }
        };

        report.samples.push(UsageSample {
            identifier: key.to_string(),
            kind,
            value,
            instance: instance.clone(),
        });
        true
    }

    fn ensure_fetchable(&self) -> Result<(), UsageError> {
        if self.latch.is_set() {
            self.logger.log_fetch_disabled();
            return Err(UsageError::FetchDisabled);
        }
        Ok(())
    }

    fn observe(&self, err: UsageError) -> UsageError {
        if self.latch.trip_on(&err) {
            self.logger.log_fetch_latched(&err);
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::models::{CacheClusterRow, DbInstanceRow, Level, StreamingClusterRow};
    use crate::testing::{maxima, tags, MockInventory, MockMetrics};

    const ENV: &str = "acme-justice-dev";

    fn expected_tags() -> ResourceTags {
        tags(&[
            ("customer_name", "acme"),
            ("project", "justice"),
            ("environment_name", "dev"),
        ])
    }

    fn settings() -> StoreSettings {
        StoreSettings {
            scrape_interval: Duration::from_secs(600),
            lookback: Duration::from_secs(3600),
            expected_tags: expected_tags(),
            environment_name: ENV.to_string(),
        }
    }

    fn inventory() -> MockInventory {
        let mut source = MockInventory::default();
        source.db_instances = vec![DbInstanceRow {
            identifier: "acme-orders".to_string(),
            instance_class: "db.r6g.large".to_string(),
            engine: "postgres".to_string(),
            tags: expected_tags(),
        }];
        source.cache_clusters = vec![CacheClusterRow {
            identifier: format!("{ENV}-redis-001"),
            node_type: "cache.t4g.small".to_string(),
            engine: "redis".to_string(),
        }];
        source.streaming_clusters = vec![StreamingClusterRow {
            name: format!("{ENV}-msk"),
            instance_type: "kafka.m5.large".to_string(),
            broker_count: 2,
        }];
        source
    }

    fn build(
        inventory: MockInventory,
    ) -> (UsageStore, Arc<MockInventory>, Arc<MockMetrics>) {
        let inventory = Arc::new(inventory);
        let metrics = Arc::new(MockMetrics::default());
        let store = UsageStore::new(
            settings(),
            inventory.clone(),
            metrics.clone(),
            StructuredLogger::new(ENV),
        );
        (store, inventory, metrics)
    }

    fn value_of(report: &ScrapeReport, identifier: &str, kind: MetricKind) -> Option<f64> {
        report
            .samples
            .iter()
            .find(|s| s.identifier == identifier && s.kind == kind)
            .map(|s| s.value)
    }

    #[tokio::test(start_paused = true)]
    async fn test_scrape_collects_cpu_and_cache_memory() {
        let (store, _, metrics) = build(inventory());
        metrics.respond("CPUUtilization/acme-orders", Ok(maxima(&[35.0])));
        metrics.respond(&format!("CPUUtilization/{ENV}-redis-001"), Ok(maxima(&[9.0])));
        metrics.respond(
            &format!("DatabaseMemoryUsagePercentage/{ENV}-redis-001"),
            Ok(maxima(&[72.0])),
        );
        for (id, system, user) in [(1, 10.0, 5.0), (2, 30.0, 12.0)] {
            metrics.respond(&format!("CpuSystem/{ENV}-msk/{id}"), Ok(maxima(&[system])));
            metrics.respond(&format!("CpuUser/{ENV}-msk/{id}"), Ok(maxima(&[user])));
        }

        let report = store.scrape().await;

        assert_eq!(report.instances, 5);
        assert_eq!(report.errors, 0);
        assert!(!report.fetch_disabled);
        assert_eq!(report.samples.len(), 6);
        assert_eq!(value_of(&report, "acme-orders", MetricKind::Cpu), Some(35.0));
        assert_eq!(value_of(&report, "acme-orders", MetricKind::Memory), None);
        assert_eq!(value_of(&report, &format!("{ENV}-redis-001"), MetricKind::Memory), Some(72.0));
        assert_eq!(value_of(&report, &format!("{ENV}-msk"), MetricKind::Cpu), Some(42.0));
        assert_eq!(value_of(&report, &format!("{ENV}-msk-1"), MetricKind::Cpu), Some(15.0));

        let broker = report
            .samples
            .iter()
            .find(|s| s.identifier == format!("{ENV}-msk-2"))
            .unwrap();
        assert_eq!(broker.instance.level, Level::Broker);
        assert_eq!(broker.instance.identifier, format!("{ENV}-msk"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_scrape_is_served_from_cache() {
        let (store, inventory, metrics) = build(inventory());

        store.scrape().await;
        let inventory_calls = inventory.total_calls();
        let metric_calls = metrics.calls();

        let report = store.scrape().await;

        assert_eq!(report.samples.len(), 6);
        assert_eq!(inventory.total_calls(), inventory_calls);
        assert_eq!(metrics.calls(), metric_calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metric_failure_skips_instance() {
        let (store, _, metrics) = build(inventory());
        metrics.respond(
            &format!("CPUUtilization/{ENV}-redis-001"),
            Err(ProviderError::with_status(500, "internal")),
        );

        let report = store.scrape().await;

        assert_eq!(report.errors, 1);
        assert_eq!(value_of(&report, &format!("{ENV}-redis-001"), MetricKind::Cpu), None);
        // Memory is not looked up after the CPU failure
        assert_eq!(value_of(&report, &format!("{ENV}-redis-001"), MetricKind::Memory), None);
        assert_eq!(value_of(&report, "acme-orders", MetricKind::Cpu), Some(0.0));
        assert!(!store.is_fetch_disabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_broker_failure_still_reported() {
        let (store, _, metrics) = build(inventory());
        metrics.respond(&format!("CpuSystem/{ENV}-msk/1"), Ok(maxima(&[11.0])));
        metrics.respond(
            &format!("CpuSystem/{ENV}-msk/2"),
            Err(ProviderError::with_status(503, "unavailable")),
        );

        let report = store.scrape().await;

        assert_eq!(value_of(&report, &format!("{ENV}-msk"), MetricKind::Cpu), Some(11.0));
        assert_eq!(value_of(&report, &format!("{ENV}-msk-1"), MetricKind::Cpu), Some(11.0));
        assert_eq!(value_of(&report, &format!("{ENV}-msk-2"), MetricKind::Cpu), None);
        // Cluster aggregation plus the broker-2 row itself
        assert_eq!(report.errors, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metric_auth_failure_trips_latch() {
        let (store, inventory, metrics) = build(inventory());
        metrics.respond(
            "CPUUtilization/acme-orders",
            Err(ProviderError::new(
                "https response error StatusCode: 403, RequestID: 1f2e, api error AccessDenied",
            )),
        );

        let report = store.scrape().await;
        assert!(report.fetch_disabled);
        assert!(store.is_fetch_disabled());

        let inventory_calls = inventory.total_calls();
        let metric_calls = metrics.calls();
        let instance = report_instance(&store);

        assert!(matches!(
            store.get_instances().await,
            Err(UsageError::FetchDisabled)
        ));
        assert!(matches!(
            store.get_max_cpu_usage("acme-orders", &instance).await,
            Err(UsageError::FetchDisabled)
        ));
        assert!(matches!(
            store.get_max_memory_usage("acme-orders", &instance).await,
            Err(UsageError::FetchDisabled)
        ));
        assert!(store.scrape().await.samples.is_empty());

        assert_eq!(inventory.total_calls(), inventory_calls);
        assert_eq!(metrics.calls(), metric_calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inventory_auth_failure_trips_latch() {
        let source = inventory();
        source.fail(
            "describe_db_instances",
            ProviderError::with_status(401, "ExpiredToken"),
        );
        let (store, inventory, metrics) = build(source);

        let err = store.get_instances().await.unwrap_err();
        assert!(err.is_auth_failure());
        assert!(store.is_fetch_disabled());

        let report = store.scrape().await;
        assert!(report.fetch_disabled);
        assert!(report.samples.is_empty());
        assert_eq!(inventory.total_calls(), 1);
        assert_eq!(metrics.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inventory_failure_without_auth_keeps_fetching() {
        let source = inventory();
        source.fail(
            "describe_db_instances",
            ProviderError::with_status(500, "internal"),
        );
        let (store, inventory, _) = build(source);

        let report = store.scrape().await;
        assert_eq!(report.errors, 1);
        assert!(report.inventory_error.is_some());
        assert!(report.samples.is_empty());
        assert!(!store.is_fetch_disabled());

        store.scrape().await;
        assert_eq!(inventory.calls("describe_db_instances"), 2);
    }

    #[test]
    fn test_latch_trips_once() {
        let latch = FetchLatch::default();
        let denied = UsageError::Metric {
            key: "k".to_string(),
            metric: "CPUUtilization".to_string(),
            source: ProviderError::with_status(403, "denied"),
        };
        let internal = UsageError::Metric {
            key: "k".to_string(),
            metric: "CPUUtilization".to_string(),
            source: ProviderError::with_status(500, "internal"),
        };

        assert!(!latch.trip_on(&internal));
        assert!(!latch.is_set());
        assert!(latch.trip_on(&denied));
        assert!(!latch.trip_on(&denied));
        assert!(latch.is_set());
    }

    fn report_instance(store: &UsageStore) -> InstanceInfo {
        store
            .inventory
            .snapshot()
            .into_iter()
            .find(|i| i.identifier == "acme-orders")
            .unwrap()
    }
}
