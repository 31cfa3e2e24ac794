//! Memoized metric-statistics lookups
//!
//! Each lookup either returns the cached figure for its key or runs a fetch
//! plan (one metric-statistics call per raw metric, each reduced to its
//! maximum datapoint, summed) and caches the result for the scrape interval.
//! Streaming clusters fan out to one lookup per broker and report the
//! largest broker figure.

use crate::cache::ExpiringCache;
use crate::engine::{CombinationPolicy, EngineProfile, BROKER_ID_DIMENSION};
use crate::error::UsageError;
use crate::models::{
    broker_key, Dimension, InstanceInfo, Level, MetricKey, MetricKind, MetricQuery, Statistic,
};
use crate::provider::MetricSource;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Granularity requested from the metric-statistics call
pub const STATISTICS_PERIOD: Duration = Duration::from_secs(3600);

/// Provider calls whose maxima add up to one figure
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPlan {
    pub queries: Vec<MetricQuery>,
}

/// Outcome of checking the metric cache, decided once per lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    CachedValue(f64),
    FetchAndCache(FetchPlan),
}

/// Cached peak-usage lookups over a metric-statistics source
pub struct MetricMemoizer {
    source: Arc<dyn MetricSource>,
    cache: ExpiringCache<MetricKey, f64>,
    ttl: Duration,
    lookback: Duration,
}

impl MetricMemoizer {
    pub fn new(source: Arc<dyn MetricSource>, ttl: Duration, lookback: Duration) -> Self {
        Self {
            source,
            cache: ExpiringCache::new(),
            ttl,
            lookback,
        }
    }

    /// Peak CPU of `instance`, cached under `key`
    ///
    /// For a streaming cluster the result is the maximum over its brokers,
    /// each cached under its own broker key. When some brokers fail the
    /// error is `UsageError::PartialBrokers`, which carries the maximum of
    /// the brokers that succeeded.
    pub async fn max_cpu_usage(
        &self,
        key: &str,
        instance: &InstanceInfo,
    ) -> Result<f64, UsageError> {
        let profile = instance.engine.profile();

        match (profile.combination, instance.level) {
            (CombinationPolicy::BrokerSum, Level::Cluster) => {
                self.cluster_max_cpu(instance, &profile).await
            }
            (CombinationPolicy::BrokerSum, _) => {
                let broker = instance
                    .broker_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| broker_suffix(key).to_string());
                self.broker_cpu(key, instance, &profile, &broker).await
            }
            (CombinationPolicy::Single, _) => {
                let key = MetricKey::new(MetricKind::Cpu, key);
                let lookup = self.select(&key, || FetchPlan {
                    queries: profile
                        .cpu_metrics
                        .iter()
                        .map(|metric| self.query(instance, profile.namespace, metric, None))
                        .collect(),
                });
                self.resolve(key, lookup).await
            }
        }
    }

    /// Peak memory percentage of `instance`, cached under `key`
    ///
    /// Only engines with a memory metric are supported; any other engine
    /// fails without a provider call.
    pub async fn max_memory_usage(
        &self,
        key: &str,
        instance: &InstanceInfo,
    ) -> Result<f64, UsageError> {
        let profile = instance.engine.profile();
        let metric = profile
            .memory_metric
            .ok_or_else(|| UsageError::unsupported(MetricKind::Memory, instance.engine.as_str()))?;

        let key = MetricKey::new(MetricKind::Memory, key);
        let lookup = self.select(&key, || FetchPlan {
            queries: vec![self.query(instance, profile.namespace, metric, None)],
        });
        self.resolve(key, lookup).await
    }

    /// Number of cached metric figures
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn select(&self, key: &MetricKey, plan: impl FnOnce() -> FetchPlan) -> Lookup {
        match self.cache.get(key) {
            Some(value) => Lookup::CachedValue(value),
            None => Lookup::FetchAndCache(plan()),
        }
    }

    async fn resolve(&self, key: MetricKey, lookup: Lookup) -> Result<f64, UsageError> {
        let plan = match lookup {
            Lookup::CachedValue(value) => return Ok(value),
            Lookup::FetchAndCache(plan) => plan,
        };

        let mut total = 0.0;
        for query in &plan.queries {
            total += self.fetch_max(&key, query).await?;
        }

        self.cache.set(key, total, self.ttl);
        Ok(total)
    }

    async fn broker_cpu(
        &self,
        key: &str,
        instance: &InstanceInfo,
        profile: &EngineProfile,
        broker: &str,
    ) -> Result<f64, UsageError> {
        let key = MetricKey::new(MetricKind::Cpu, key);
        let lookup = self.select(&key, || FetchPlan {
            queries: profile
                .cpu_metrics
                .iter()
                .map(|metric| self.query(instance, profile.namespace, metric, Some(broker)))
                .collect(),
        });
        self.resolve(key, lookup).await
    }

    async fn cluster_max_cpu(
        &self,
        instance: &InstanceInfo,
        profile: &EngineProfile,
    ) -> Result<f64, UsageError> {
        let mut max = 0.0_f64;
        let mut failures = Vec::new();

        for id in 1..=instance.broker_count {
            let key = broker_key(&instance.identifier, id);
            match self
                .broker_cpu(&key, instance, profile, &id.to_string())
                .await
            {
                Ok(value) => max = max.max(value),
                Err(err) => failures.push(err),
            }
        }

        if failures.is_empty() {
            Ok(max)
        } else {
            Err(UsageError::PartialBrokers {
                cluster: instance.identifier.clone(),
                broker_count: instance.broker_count,
                max,
                failures,
            })
        }
    }

    fn query(
        &self,
        instance: &InstanceInfo,
        namespace: &str,
        metric_name: &str,
        broker: Option<&str>,
    ) -> MetricQuery {
        let mut dimensions = vec![Dimension::new(
            instance.identifier_field_name.as_str(),
            instance.identifier.as_str(),
        )];
        if let Some(broker) = broker {
            dimensions.push(Dimension::new(BROKER_ID_DIMENSION, broker));
        }

        let end = instance.collected_time;
        MetricQuery {
            namespace: namespace.to_string(),
            metric_name: metric_name.to_string(),
            dimensions,
            start: window_start(end, self.lookback),
            end,
            period: STATISTICS_PERIOD,
            statistic: Statistic::Maximum,
        }
    }

    async fn fetch_max(&self, key: &MetricKey, query: &MetricQuery) -> Result<f64, UsageError> {
        let datapoints = self
            .source
            .get_metric_statistics(query)
            .await
            .map_err(|source| UsageError::Metric {
                key: key.key.clone(),
                metric: query.metric_name.clone(),
                source,
            })?;

        debug!(
            key = %key,
            metric = %query.metric_name,
            datapoints = datapoints.len(),
            "Fetched metric statistics"
        );

        Ok(datapoints
            .iter()
            .filter_map(|point| point.maximum)
            .fold(0.0, f64::max))
    }
}

fn window_start(end: DateTime<Utc>, lookback: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lookback)
        .ok()
        .and_then(|lookback| end.checked_sub_signed(lookback))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Broker id taken from a `<cluster>-<id>` key
fn broker_suffix(key: &str) -> &str {
    key.rsplit('-').next().unwrap_or(key)
}
