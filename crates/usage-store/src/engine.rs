//! Engine dispatch table
//!
//! Maps each provider engine to the metric namespace, the raw CPU metrics
//! to query, how they combine, and the optional memory metric.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Metric dimension that carries a streaming broker id
pub const BROKER_ID_DIMENSION: &str = "Broker ID";

/// Database/cache engine as reported by the describe calls
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Engine {
    Postgres,
    AuroraPostgresql,
    DocDb,
    Redis,
    Valkey,
    Kafka,
    Other(String),
}

impl Engine {
    pub fn as_str(&self) -> &str {
        match self {
            Engine::Postgres => "postgres",
            Engine::AuroraPostgresql => "aurora-postgresql",
            Engine::DocDb => "docdb",
            Engine::Redis => "redis",
            Engine::Valkey => "valkey",
            Engine::Kafka => "kafka",
            Engine::Other(name) => name,
        }
    }

    pub fn profile(&self) -> EngineProfile {
        match self {
            Engine::Postgres | Engine::AuroraPostgresql => RELATIONAL,
            Engine::DocDb => DOCUMENT,
            Engine::Redis | Engine::Valkey => KEY_VALUE,
            Engine::Kafka => STREAMING,
            Engine::Other(_) => UNKNOWN,
        }
    }

    /// Whether a peak-memory figure is published for this engine
    pub fn reports_memory(&self) -> bool {
        self.profile().memory_metric.is_some()
    }
}

impl From<&str> for Engine {
    fn from(name: &str) -> Self {
        match name {
            "postgres" => Engine::Postgres,
            "aurora-postgresql" => Engine::AuroraPostgresql,
            "docdb" => Engine::DocDb,
            "redis" => Engine::Redis,
            "valkey" => Engine::Valkey,
            "kafka" => Engine::Kafka,
            other => Engine::Other(other.to_string()),
        }
    }
}

impl From<String> for Engine {
    fn from(name: String) -> Self {
        Engine::from(name.as_str())
    }
}

impl From<Engine> for String {
    fn from(engine: Engine) -> Self {
        engine.as_str().to_string()
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the raw CPU metrics of an engine turn into one figure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinationPolicy {
    /// One metric, one figure
    Single,
    /// Per broker: sum of the raw metrics. Per cluster: max over brokers.
    BrokerSum,
}

/// Static metric settings of an engine family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineProfile {
    pub namespace: &'static str,
    pub cpu_metrics: &'static [&'static str],
    pub combination: CombinationPolicy,
    pub memory_metric: Option<&'static str>,
}

const RELATIONAL: EngineProfile = EngineProfile {
    namespace: "AWS/RDS",
    cpu_metrics: &["CPUUtilization"],
    combination: CombinationPolicy::Single,
    memory_metric: None,
};

const DOCUMENT: EngineProfile = EngineProfile {
    namespace: "AWS/DocDB",
    cpu_metrics: &["CPUUtilization"],
    combination: CombinationPolicy::Single,
    memory_metric: None,
};

const KEY_VALUE: EngineProfile = EngineProfile {
    namespace: "AWS/ElastiCache",
    cpu_metrics: &["CPUUtilization"],
    combination: CombinationPolicy::Single,
    memory_metric: Some("DatabaseMemoryUsagePercentage"),
};

const STREAMING: EngineProfile = EngineProfile {
    namespace: "AWS/Kafka",
    cpu_metrics: &["CpuSystem", "CpuUser"],
    combination: CombinationPolicy::BrokerSum,
    memory_metric: None,
};

// Best effort: the empty namespace usually yields no datapoints
const UNKNOWN: EngineProfile = EngineProfile {
    namespace: "",
    cpu_metrics: &["CPUUtilization"],
    combination: CombinationPolicy::Single,
    memory_metric: None,
};
