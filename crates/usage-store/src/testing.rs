//! Mock provider clients shared by the unit tests

use crate::error::ProviderError;
use crate::models::{
    CacheClusterRow, Datapoint, DbClusterRow, DbInstanceRow, MetricQuery, ResourceTags,
    StreamingClusterRow,
};
use crate::provider::{InventorySource, MetricSource};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

pub(crate) fn tags(pairs: &[(&str, &str)]) -> ResourceTags {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub(crate) fn maxima(values: &[f64]) -> Vec<Datapoint> {
    values
        .iter()
        .map(|v| Datapoint {
            timestamp: Utc::now(),
            maximum: Some(*v),
        })
        .collect()
}

/// Inventory source serving fixed rows and counting calls per method
#[derive(Default)]
pub(crate) struct MockInventory {
    pub db_instances: Vec<DbInstanceRow>,
    pub db_clusters: Vec<DbClusterRow>,
    pub docdb_instances: Vec<DbInstanceRow>,
    pub docdb_clusters: Vec<DbClusterRow>,
    pub cache_clusters: Vec<CacheClusterRow>,
    pub streaming_clusters: Vec<StreamingClusterRow>,
    failures: Mutex<HashMap<&'static str, ProviderError>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl MockInventory {
    /// Make `method` fail with `err` until `heal` is called
    pub fn fail(&self, method: &'static str, err: ProviderError) {
        self.failures.lock().unwrap().insert(method, err);
    }

    pub fn heal(&self) {
        self.failures.lock().unwrap().clear();
    }

    fn respond<T: Clone>(
        &self,
        method: &'static str,
        rows: &[T],
    ) -> Result<Vec<T>, ProviderError> {
        *self.calls.lock().unwrap().entry(method).or_default() += 1;
        match self.failures.lock().unwrap().get(method) {
            Some(err) => Err(err.clone()),
            None => Ok(rows.to_vec()),
        }
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl InventorySource for MockInventory {
    async fn describe_db_instances(&self) -> Result<Vec<DbInstanceRow>, ProviderError> {
        self.respond("describe_db_instances", &self.db_instances)
    }

    async fn describe_db_clusters(&self) -> Result<Vec<DbClusterRow>, ProviderError> {
        self.respond("describe_db_clusters", &self.db_clusters)
    }

    async fn describe_docdb_instances(&self) -> Result<Vec<DbInstanceRow>, ProviderError> {
        self.respond("describe_docdb_instances", &self.docdb_instances)
    }

    async fn describe_docdb_clusters(&self) -> Result<Vec<DbClusterRow>, ProviderError> {
        self.respond("describe_docdb_clusters", &self.docdb_clusters)
    }

    async fn describe_cache_clusters(&self) -> Result<Vec<CacheClusterRow>, ProviderError> {
        self.respond("describe_cache_clusters", &self.cache_clusters)
    }

    async fn list_streaming_clusters(&self) -> Result<Vec<StreamingClusterRow>, ProviderError> {
        self.respond("list_streaming_clusters", &self.streaming_clusters)
    }
}

/// Metric source answering per series, `<metric>/<dimension values...>`
///
/// Unknown series return no datapoints.
#[derive(Default)]
pub(crate) struct MockMetrics {
    responses: Mutex<HashMap<String, Result<Vec<Datapoint>, ProviderError>>>,
    queries: Mutex<Vec<MetricQuery>>,
}

impl MockMetrics {
    pub fn series(query: &MetricQuery) -> String {
        let mut parts = vec![query.metric_name.clone()];
        parts.extend(query.dimensions.iter().map(|d| d.value.clone()));
        parts.join("/")
    }

    pub fn respond(&self, series: &str, response: Result<Vec<Datapoint>, ProviderError>) {
        self.responses
            .lock()
            .unwrap()
            .insert(series.to_string(), response);
    }

    pub fn calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    pub fn queries(&self) -> Vec<MetricQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricSource for MockMetrics {
    async fn get_metric_statistics(
        &self,
        query: &MetricQuery,
    ) -> Result<Vec<Datapoint>, ProviderError> {
        self.queries.lock().unwrap().push(query.clone());
        self.responses
            .lock()
            .unwrap()
            .get(&Self::series(query))
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
