//! Error types for provider calls and usage lookups

use crate::inventory::ResourceFamily;
use crate::models::MetricKind;
use std::fmt;
use thiserror::Error;

const UNAUTHORIZED_MARKERS: [&str; 2] = ["StatusCode: 401", "StatusCode: 403"];

/// Failure reported by a provider client
///
/// The rendered message follows the `StatusCode: <code>, <message>` shape of
/// HTTP-level provider errors so that text-only errors and structured ones
/// classify the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ProviderError {
    pub status_code: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status_code: None,
            message: message.into(),
        }
    }

    pub fn with_status(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            message: message.into(),
        }
    }

    /// Whether this error denotes rejected credentials (401/403)
    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status_code, Some(401 | 403))
            || UNAUTHORIZED_MARKERS
                .iter()
                .any(|marker| self.message.contains(marker))
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "StatusCode: {}, {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Errors surfaced by the usage store
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("failed to scrape {family} inventory: {source}")]
    Inventory {
        family: ResourceFamily,
        #[source]
        source: ProviderError,
    },

    #[error("failed to fetch {metric} for {key}: {source}")]
    Metric {
        key: String,
        metric: String,
        #[source]
        source: ProviderError,
    },

    /// Some brokers of a streaming cluster failed; `max` covers the others
    #[error("{} of {} brokers failed for {cluster}: {}", .failures.len(), .broker_count, join_errors(.failures))]
    PartialBrokers {
        cluster: String,
        broker_count: u32,
        max: f64,
        failures: Vec<UsageError>,
    },

    #[error("{kind} usage is not reported for engine {engine}")]
    UnsupportedMetric { kind: &'static str, engine: String },

    #[error("fetching disabled after an authorization failure, restart required")]
    FetchDisabled,
}

impl UsageError {
    /// Whether this error, or any error joined into it, is an auth failure
    pub fn is_auth_failure(&self) -> bool {
        match self {
            UsageError::Inventory { source, .. } | UsageError::Metric { source, .. } => {
                source.is_unauthorized()
            }
            UsageError::PartialBrokers { failures, .. } => {
                failures.iter().any(UsageError::is_auth_failure)
            }
            UsageError::UnsupportedMetric { .. } | UsageError::FetchDisabled => false,
        }
    }

    /// Partial maximum carried by a broker aggregation error
    pub fn partial_value(&self) -> Option<f64> {
        match self {
            UsageError::PartialBrokers { max, .. } => Some(*max),
            _ => None,
        }
    }

    pub(crate) fn unsupported(kind: MetricKind, engine: &str) -> Self {
        UsageError::UnsupportedMetric {
            kind: kind.as_str(),
            engine: engine.to_string(),
        }
    }
}

fn join_errors(errors: &[UsageError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
