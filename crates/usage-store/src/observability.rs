//! Observability infrastructure for the usage store
//!
//! Provides:
//! - Prometheus gauges for peak CPU/memory per instance, plus scrape
//!   latency, tracked instances, fetch errors and the fetch-disabled flag
//! - Structured JSON logging with tracing

use crate::error::UsageError;
use crate::models::{InstanceInfo, MetricKind, UsageSample};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_gauge, GaugeVec,
    Histogram, IntCounter, IntGauge,
};
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock, PoisonError};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Histogram buckets for scrape latency (in seconds); cold scrapes hit the
/// provider for every instance, warm ones are served from cache
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Labels of the usage gauges
const USAGE_LABELS: &[&str] = &[
    "identifier",
    "instance_class",
    "engine",
    "level",
    "collected_time",
    "environment",
];

static GLOBAL_METRICS: OnceLock<UsageMetricsInner> = OnceLock::new();

/// Gauge and label values of one published usage series
type SeriesKey = (MetricKind, Vec<String>);

struct UsageMetricsInner {
    cpu_max: GaugeVec,
    memory_max: GaugeVec,
    scrape_latency_seconds: Histogram,
    instances_tracked: IntGauge,
    fetch_errors: IntCounter,
    fetch_disabled: IntGauge,
    /// Usage series set by the last publish
    published: Mutex<HashSet<SeriesKey>>,
}

impl UsageMetricsInner {
    fn new() -> Self {
        Self {
            cpu_max: register_gauge_vec!(
                "aws_resource_usage_cpu_max",
                "Resource peak CPU Usage",
                USAGE_LABELS
            )
            .expect("Failed to register aws_resource_usage_cpu_max"),

            memory_max: register_gauge_vec!(
                "aws_resource_usage_memory_max",
                "Resource peak memory Usage",
                USAGE_LABELS
            )
            .expect("Failed to register aws_resource_usage_memory_max"),

            scrape_latency_seconds: register_histogram!(
                "usage_store_scrape_latency_seconds",
                "Time spent producing one round of usage samples",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register scrape_latency_seconds"),

            instances_tracked: register_int_gauge!(
                "usage_store_instances_tracked",
                "Number of instances returned by the last inventory listing"
            )
            .expect("Failed to register instances_tracked"),

            fetch_errors: register_int_counter!(
                "usage_store_fetch_errors_total",
                "Total number of failed inventory or metric lookups"
            )
            .expect("Failed to register fetch_errors"),

            fetch_disabled: register_int_gauge!(
                "usage_store_fetch_disabled",
                "1 once provider calls are stopped after an authorization failure"
            )
            .expect("Failed to register fetch_disabled"),

            published: Mutex::new(HashSet::new()),
        }
    }

    fn usage_gauge(&self, kind: MetricKind) -> &GaugeVec {
        match kind {
            MetricKind::Cpu => &self.cpu_max,
            MetricKind::Memory => &self.memory_max,
        }
    }
}

/// Usage metrics for Prometheus exposition
///
/// Lightweight handle to the process-wide metrics; clones share them.
#[derive(Clone)]
pub struct UsageMetrics {
    _private: (),
}

impl Default for UsageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageMetrics {
    /// Create a new metrics handle (registers the metrics on first call)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(UsageMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &UsageMetricsInner {
        GLOBAL_METRICS.get_or_init(UsageMetricsInner::new)
    }

    /// Replace the usage gauges with `samples`
    ///
    /// New values are set before series absent from `samples` are removed,
    /// so a concurrent gather never sees the gauges emptied.
    pub fn publish(&self, environment: &str, samples: &[UsageSample]) {
        let inner = self.inner();
        let mut published = inner
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut current = HashSet::with_capacity(samples.len());
        for sample in samples {
            let labels = vec![
                sample.identifier.clone(),
                sample.instance.instance_class.clone(),
                sample.instance.engine.to_string(),
                sample.instance.level.to_string(),
                sample.instance.collected_time.to_rfc3339(),
                environment.to_string(),
            ];
            inner
                .usage_gauge(sample.kind)
                .with_label_values(&label_refs(&labels))
                .set(sample.value);
            current.insert((sample.kind, labels));
        }

        for (kind, labels) in published.difference(&current) {
            if let Err(err) = inner
                .usage_gauge(*kind)
                .remove_label_values(&label_refs(labels))
            {
                debug!(error = %err, "Usage series already removed");
            }
        }
        *published = current;
    }

    pub fn observe_scrape_latency(&self, duration_secs: f64) {
        self.inner().scrape_latency_seconds.observe(duration_secs);
    }

    pub fn set_instances_tracked(&self, count: i64) {
        self.inner().instances_tracked.set(count);
    }

    pub fn inc_fetch_errors(&self, count: u64) {
        self.inner().fetch_errors.inc_by(count);
    }

    pub fn set_fetch_disabled(&self, disabled: bool) {
        self.inner().fetch_disabled.set(i64::from(disabled));
    }
}

fn label_refs(labels: &[String]) -> Vec<&str> {
    labels.iter().map(String::as_str).collect()
}

/// Install the JSON tracing subscriber, filtered by `RUST_LOG` or `default_filter`
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(fmt::layer().json())
        .try_init()?;
    Ok(())
}

/// Structured logger for usage store events
///
/// Passed explicitly into the store so every event carries the environment
/// it was produced for.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    environment: String,
}

impl StructuredLogger {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn log_inventory_refreshed(&self, instances: usize) {
        info!(
            event = "inventory_refreshed",
            environment = %self.environment,
            instances = instances,
            "Instance inventory refreshed"
        );
    }

    /// Log an inventory listing failure
    pub fn log_inventory_failure(&self, err: &UsageError) {
        error!(
            event = "inventory_refresh_failed",
            environment = %self.environment,
            error = %err,
            "Failed to refresh instance inventory"
        );
    }

    /// Log a failed usage lookup for one instance
    pub fn log_metric_failure(&self, instance: &InstanceInfo, kind: MetricKind, err: &UsageError) {
        error!(
            event = "usage_fetch_failed",
            environment = %self.environment,
            metric = kind.as_str(),
            identifier = %instance.identifier,
            engine = %instance.engine,
            level = %instance.level,
            identifier_field_name = %instance.identifier_field_name,
            instance_class = %instance.instance_class,
            error = %err,
            "Failed to get resource usage"
        );
    }

    /// Log a streaming cluster reported from a subset of its brokers
    pub fn log_partial_brokers(&self, instance: &InstanceInfo, value: f64, err: &UsageError) {
        warn!(
            event = "usage_partial_brokers",
            environment = %self.environment,
            identifier = %instance.identifier,
            broker_count = instance.broker_count,
            value = value,
            error = %err,
            "Reporting cluster usage from the reachable brokers only"
        );
    }

    /// Log the fetch latch tripping
    pub fn log_fetch_latched(&self, err: &UsageError) {
        error!(
            event = "fetch_disabled",
            environment = %self.environment,
            error = %err,
            "Authorization failure, provider calls stopped until restart"
        );
    }

    /// Log a call refused because fetching is disabled
    pub fn log_fetch_disabled(&self) {
        error!(
            event = "fetch_skipped",
            environment = %self.environment,
            "configuration error, invalid provider credentials"
        );
    }

    /// Log a finished scrape
    pub fn log_scrape(&self, instances: usize, samples: usize, errors: usize, elapsed_ms: u128) {
        info!(
            event = "scrape_complete",
            environment = %self.environment,
            instances = instances,
            samples = samples,
            errors = errors,
            elapsed_ms = elapsed_ms,
            "Usage scrape complete"
        );
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "exporter_started",
            environment = %self.environment,
            version = %version,
            "Usage exporter started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "exporter_shutdown",
            environment = %self.environment,
            reason = %reason,
            "Usage exporter shutting down"
        );
    }
}
