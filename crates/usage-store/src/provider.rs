//! Provider client seams
//!
//! The store never talks to a cloud SDK directly. Describe and
//! metric-statistics calls go through these traits so the embedding binary
//! can plug in its SDK clients and tests can plug in mocks.

use crate::error::ProviderError;
use crate::models::{
    CacheClusterRow, Datapoint, DbClusterRow, DbInstanceRow, MetricQuery, StreamingClusterRow,
};
use async_trait::async_trait;

/// Describe calls for every resource family the inventory covers
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Relational database instances
    async fn describe_db_instances(&self) -> Result<Vec<DbInstanceRow>, ProviderError>;

    /// Relational database clusters
    async fn describe_db_clusters(&self) -> Result<Vec<DbClusterRow>, ProviderError>;

    /// Document-store instances
    async fn describe_docdb_instances(&self) -> Result<Vec<DbInstanceRow>, ProviderError>;

    /// Document-store clusters
    async fn describe_docdb_clusters(&self) -> Result<Vec<DbClusterRow>, ProviderError>;

    /// Key-value cache clusters
    async fn describe_cache_clusters(&self) -> Result<Vec<CacheClusterRow>, ProviderError>;

    /// Provisioned streaming clusters
    async fn list_streaming_clusters(&self) -> Result<Vec<StreamingClusterRow>, ProviderError>;
}

/// Metric-statistics call
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn get_metric_statistics(
        &self,
        query: &MetricQuery,
    ) -> Result<Vec<Datapoint>, ProviderError>;
}
