//! Latest scrape outcome, shared between the scrape loop and the API

use crate::models::UsageSample;
use crate::store::ScrapeReport;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Body of `/usage`
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeSummary {
    pub environment: String,
    /// Unset until the first scrape completes
    pub completed_at: Option<DateTime<Utc>>,
    pub instances: usize,
    pub errors: usize,
    pub fetch_disabled: bool,
    pub samples: Vec<UsageSample>,
}

/// Shared handle to the most recent [`ScrapeSummary`]
#[derive(Debug, Clone, Default)]
pub struct LatestScrape {
    summary: Arc<RwLock<ScrapeSummary>>,
}

impl LatestScrape {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, environment: &str, report: &ScrapeReport) {
        *self.summary.write().await = ScrapeSummary {
            environment: environment.to_string(),
            completed_at: Some(Utc::now()),
            instances: report.instances,
            errors: report.errors,
            fetch_disabled: report.fetch_disabled,
            samples: report.samples.clone(),
        };
    }

    pub async fn summary(&self) -> ScrapeSummary {
        self.summary.read().await.clone()
    }
}
