//! Exporter configuration

use crate::models::ResourceTags;
use crate::store::StoreSettings;
use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

/// Usage exporter configuration, read from `USAGE_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct UsageConfig {
    #[serde(default)]
    pub customer_name: String,

    #[serde(default)]
    pub project_name: String,

    #[serde(default)]
    pub environment_name: String,

    /// TTL of cached inventory and metric figures, in seconds
    #[serde(default = "default_scrape_interval")]
    pub scrape_interval_secs: u64,

    /// Metric window ending at each instance's collection time, in seconds
    #[serde(default = "default_lookback")]
    pub lookback_secs: u64,

    /// Period of the scrape loop, in seconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_scrape_interval() -> u64 {
    24 * 3600
}

fn default_lookback() -> u64 {
    14 * 24 * 3600
}

fn default_tick_interval() -> u64 {
    120
}

fn default_api_port() -> u16 {
    8080
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            customer_name: String::new(),
            project_name: String::new(),
            environment_name: String::new(),
            scrape_interval_secs: default_scrape_interval(),
            lookback_secs: default_lookback(),
            tick_interval_secs: default_tick_interval(),
            api_port: default_api_port(),
        }
    }
}

impl UsageConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("USAGE"))
            .build()?;
        Self::from_config(config)
    }

    /// Deserialize an already-built configuration
    pub fn from_config(config: config::Config) -> Result<Self> {
        let usage: UsageConfig = config.try_deserialize()?;
        if usage.scrape_interval_secs == 0 {
            anyhow::bail!("scrape_interval_secs must be greater than zero");
        }
        if usage.tick_interval_secs == 0 {
            anyhow::bail!("tick_interval_secs must be greater than zero");
        }
        Ok(usage)
    }

    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval_secs)
    }

    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// `<customer>-<project>-<environment>`, also the untagged-resource filter
    pub fn environment_label(&self) -> String {
        format!(
            "{}-{}-{}",
            self.customer_name, self.project_name, self.environment_name
        )
    }

    /// Tags every relational resource of this environment carries
    pub fn expected_tags(&self) -> ResourceTags {
        ResourceTags::from([
            ("customer_name".to_string(), self.customer_name.clone()),
            ("project".to_string(), self.project_name.clone()),
            ("environment_name".to_string(), self.environment_name.clone()),
        ])
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            scrape_interval: self.scrape_interval(),
            lookback: self.lookback(),
            expected_tags: self.expected_tags(),
            environment_name: self.environment_label(),
        }
    }
}
