//! Fake provider clients for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use usage_store::{
    CacheClusterRow, Datapoint, DbClusterRow, DbInstanceRow, InventorySource, MetricQuery,
    MetricSource, ProviderError, ResourceTags, StoreSettings, StreamingClusterRow,
    StructuredLogger, UsageStore,
};

pub const ENVIRONMENT: &str = "acme-justice-dev";

pub fn expected_tags() -> ResourceTags {
    [
        ("customer_name", "acme"),
        ("project", "justice"),
        ("environment_name", "dev"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub fn settings() -> StoreSettings {
    StoreSettings {
        scrape_interval: Duration::from_secs(600),
        lookback: Duration::from_secs(14 * 24 * 3600),
        expected_tags: expected_tags(),
        environment_name: ENVIRONMENT.to_string(),
    }
}

pub fn maxima(values: &[f64]) -> Vec<Datapoint> {
    values
        .iter()
        .map(|v| Datapoint {
            timestamp: Utc::now(),
            maximum: Some(*v),
        })
        .collect()
}

/// One tagged postgres instance, one redis cache and a two-broker kafka cluster
#[derive(Default)]
pub struct FakeInventory {
    pub failure: Option<ProviderError>,
    calls: AtomicUsize,
}

impl FakeInventory {
    pub fn failing(err: ProviderError) -> Self {
        Self {
            failure: Some(err),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn rows<T>(&self, rows: Vec<T>) -> Result<Vec<T>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(rows),
        }
    }
}

#[async_trait]
impl InventorySource for FakeInventory {
    async fn describe_db_instances(&self) -> Result<Vec<DbInstanceRow>, ProviderError> {
        self.rows(vec![
            DbInstanceRow {
                identifier: "acme-orders".to_string(),
                instance_class: "db.r6g.large".to_string(),
                engine: "postgres".to_string(),
                tags: expected_tags(),
            },
            DbInstanceRow {
                identifier: "other-team-db".to_string(),
                instance_class: "db.t3.micro".to_string(),
                engine: "postgres".to_string(),
                tags: ResourceTags::new(),
            },
        ])
    }

    async fn describe_db_clusters(&self) -> Result<Vec<DbClusterRow>, ProviderError> {
        self.rows(Vec::new())
    }

    async fn describe_docdb_instances(&self) -> Result<Vec<DbInstanceRow>, ProviderError> {
        self.rows(Vec::new())
    }

    async fn describe_docdb_clusters(&self) -> Result<Vec<DbClusterRow>, ProviderError> {
        self.rows(Vec::new())
    }

    async fn describe_cache_clusters(&self) -> Result<Vec<CacheClusterRow>, ProviderError> {
        self.rows(vec![CacheClusterRow {
            identifier: "acme-justice-dev-redis".to_string(),
            node_type: "cache.t4g.small".to_string(),
            engine: "redis".to_string(),
        }])
    }

    async fn list_streaming_clusters(&self) -> Result<Vec<StreamingClusterRow>, ProviderError> {
        self.rows(vec![StreamingClusterRow {
            name: "acme-justice-dev-events".to_string(),
            instance_type: "kafka.m5.large".to_string(),
            broker_count: 2,
        }])
    }
}

/// Answers per series, `<metric>/<dimension values...>`; unknown series are empty
#[derive(Default)]
pub struct FakeMetrics {
    series: Mutex<HashMap<String, Result<Vec<Datapoint>, ProviderError>>>,
    calls: AtomicUsize,
}

impl FakeMetrics {
    /// Datapoints for every instance of [`FakeInventory`]
    pub fn populated() -> Self {
        let metrics = Self::default();
        metrics.respond("CPUUtilization/acme-orders", Ok(maxima(&[41.0, 63.5, 12.0])));
        metrics.respond("CPUUtilization/acme-justice-dev-redis", Ok(maxima(&[30.0, 45.0])));
        metrics.respond(
            "DatabaseMemoryUsagePercentage/acme-justice-dev-redis",
            Ok(maxima(&[71.0])),
        );
        metrics.respond("CpuSystem/acme-justice-dev-events/1", Ok(maxima(&[10.0])));
        metrics.respond("CpuUser/acme-justice-dev-events/1", Ok(maxima(&[5.0])));
        metrics.respond("CpuSystem/acme-justice-dev-events/2", Ok(maxima(&[20.0])));
        metrics.respond("CpuUser/acme-justice-dev-events/2", Ok(maxima(&[2.0])));
        metrics
    }

    pub fn respond(&self, series: &str, response: Result<Vec<Datapoint>, ProviderError>) {
        self.series
            .lock()
            .unwrap()
            .insert(series.to_string(), response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricSource for FakeMetrics {
    async fn get_metric_statistics(
        &self,
        query: &MetricQuery,
    ) -> Result<Vec<Datapoint>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut parts = vec![query.metric_name.clone()];
        parts.extend(query.dimensions.iter().map(|d| d.value.clone()));
        self.series
            .lock()
            .unwrap()
            .get(&parts.join("/"))
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub fn store(inventory: Arc<FakeInventory>, metrics: Arc<FakeMetrics>) -> Arc<UsageStore> {
    Arc::new(UsageStore::new(
        settings(),
        inventory,
        metrics,
        StructuredLogger::new(ENVIRONMENT),
    ))
}
