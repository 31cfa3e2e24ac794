//! Core data models for the usage store

use crate::engine::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Granularity of an inventory row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    Instance,
    Cluster,
    Broker,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Instance => "Instance",
            Level::Cluster => "Cluster",
            Level::Broker => "Broker",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive metadata for one provisioned resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub identifier: String,
    pub instance_class: String,
    pub engine: Engine,
    pub level: Level,
    /// Metric dimension name the identifier is published under
    pub identifier_field_name: String,
    /// Set only on `Level::Broker` rows
    pub broker_id: Option<u32>,
    /// Number of brokers in the owning streaming cluster, 0 elsewhere
    pub broker_count: u32,
    pub collected_time: DateTime<Utc>,
}

impl InstanceInfo {
    /// Key under which this instance's usage is cached and labelled
    ///
    /// Brokers share the cluster identifier, so their key carries the broker
    /// id as a `-<id>` suffix. The same shape is used for the inventory key.
    pub fn usage_key(&self) -> String {
        match (self.level, self.broker_id) {
            (Level::Broker, Some(id)) => broker_key(&self.identifier, id),
            _ => self.identifier.clone(),
        }
    }
}

/// Cache key of broker `id` inside cluster `cluster`
pub fn broker_key(cluster: &str, id: u32) -> String {
    format!("{}-{}", cluster, id)
}

/// Which usage figure a metric cache entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Memory,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
        }
    }
}

/// Metric cache key, namespaced by kind so CPU and memory never collide
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub kind: MetricKind,
    pub key: String,
}

impl MetricKey {
    pub fn new(kind: MetricKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.key)
    }
}

/// One name/value dimension of a metric query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Aggregation requested from the metric-statistics call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statistic {
    Maximum,
}

/// Parameters of a single metric-statistics call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<Dimension>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub period: Duration,
    pub statistic: Statistic,
}

impl MetricQuery {
    /// Value of the dimension called `name`, if present
    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.value.as_str())
    }
}

/// A timestamped datapoint returned by the metric-statistics call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub timestamp: DateTime<Utc>,
    pub maximum: Option<f64>,
}

/// Resource tags as returned by a describe call
pub type ResourceTags = HashMap<String, String>;

/// Row of a database-instance describe call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbInstanceRow {
    pub identifier: String,
    pub instance_class: String,
    pub engine: String,
    #[serde(default)]
    pub tags: ResourceTags,
}

/// Row of a database-cluster describe call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbClusterRow {
    pub identifier: String,
    /// Not reported by every family
    pub instance_class: Option<String>,
    pub engine: String,
    #[serde(default)]
    pub tags: ResourceTags,
}

/// Row of a cache-cluster describe call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheClusterRow {
    pub identifier: String,
    pub node_type: String,
    pub engine: String,
}

/// Row of a streaming-cluster listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamingClusterRow {
    pub name: String,
    pub instance_type: String,
    pub broker_count: u32,
}

/// A usage figure produced by one scrape
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSample {
    /// Label identifier, `InstanceInfo::usage_key` of the instance
    pub identifier: String,
    pub kind: MetricKind,
    pub value: f64,
    pub instance: InstanceInfo,
}
