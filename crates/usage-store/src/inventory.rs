//! Instance inventory
//!
//! Keeps an expiring map of resource identifier to `InstanceInfo`, refilled
//! from the provider describe calls whenever the map is empty or its global
//! expiry has passed. A refresh walks the resource families in a fixed
//! order and stops at the first failing call; rows already written stay in
//! place and nothing is cleared. An aborted refresh is retried on the next
//! `instances` call even though the rows it did write moved the global
//! expiry forward.

use crate::cache::ExpiringCache;
use crate::engine::Engine;
use crate::error::{ProviderError, UsageError};
use crate::models::{broker_key, InstanceInfo, Level, ResourceTags};
use crate::provider::InventorySource;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Number of expected tags a tag-filtered row is checked against
pub const EXPECTED_TAG_COUNT: usize = 3;

/// Instance class reported for document-store clusters
pub const UNKNOWN_INSTANCE_CLASS: &str = "N/A";

/// Resource families scraped during a refresh, in refresh order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResourceFamily {
    RelationalInstance,
    RelationalCluster,
    DocumentInstance,
    DocumentCluster,
    KeyValueCache,
    Streaming,
}

impl ResourceFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceFamily::RelationalInstance => "rds instance",
            ResourceFamily::RelationalCluster => "rds cluster",
            ResourceFamily::DocumentInstance => "docdb instance",
            ResourceFamily::DocumentCluster => "docdb cluster",
            ResourceFamily::KeyValueCache => "elasticache cluster",
            ResourceFamily::Streaming => "kafka cluster",
        }
    }
}

impl fmt::Display for ResourceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row selection applied during a refresh
#[derive(Debug, Clone, Default)]
pub struct InventoryFilter {
    /// Tags every relational row must carry
    pub expected_tags: ResourceTags,
    /// Substring required in identifiers of untagged families
    pub environment_name: String,
}

impl InventoryFilter {
    pub fn new(expected_tags: ResourceTags, environment_name: impl Into<String>) -> Self {
        Self {
            expected_tags,
            environment_name: environment_name.into(),
        }
    }

    fn matches_environment(&self, identifier: &str) -> bool {
        identifier.contains(&self.environment_name)
    }
}

/// Whether a tagged resource belongs to this deployment
///
/// Every expected tag must be present with the same value, and exactly
/// `EXPECTED_TAG_COUNT` expected tags must have been evaluated. Nothing is
/// evaluated for a resource without tags.
pub fn tags_match(expected: &ResourceTags, target: &ResourceTags) -> bool {
    if target.is_empty() || expected.len() != EXPECTED_TAG_COUNT {
        return false;
    }
    expected
        .iter()
        .all(|(key, value)| target.get(key) == Some(value))
}

/// Expiring inventory of provider resources
pub struct InventoryStore {
    source: Arc<dyn InventorySource>,
    cache: ExpiringCache<String, InstanceInfo>,
    filter: InventoryFilter,
    ttl: Duration,
    /// Set while the last refresh stopped at a failing family
    incomplete: AtomicBool,
}

impl InventoryStore {
    pub fn new(source: Arc<dyn InventorySource>, filter: InventoryFilter, ttl: Duration) -> Self {
        Self {
            source,
            cache: ExpiringCache::new(),
            filter,
            ttl,
            incomplete: AtomicBool::new(false),
        }
    }

    /// True when the next `instances` call will hit the describe APIs
    pub fn needs_refresh(&self) -> bool {
        self.cache.is_empty()
            || self.cache.is_expired()
            || self.incomplete.load(Ordering::SeqCst)
    }

    /// Current instances, refreshing first if the inventory is stale
    pub async fn instances(&self) -> Result<Vec<InstanceInfo>, UsageError> {
        if self.needs_refresh() {
            debug!(
                len = self.cache.len(),
                expired = self.cache.is_expired(),
                "Inventory stale, refreshing"
            );
            self.refresh().await?;
        }
        Ok(self.snapshot())
    }

    /// Live entries in key order; keys evicted since the snapshot are skipped
    pub fn snapshot(&self) -> Vec<InstanceInfo> {
        let mut keys = self.cache.keys();
        keys.sort();
        keys.iter().filter_map(|key| self.cache.get(key)).collect()
    }

    /// Number of stored rows, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Scrape every family in order; the first failure aborts the rest
    ///
    /// Returns the number of rows written.
    pub async fn refresh(&self) -> Result<usize, UsageError> {
        let result = self.scrape_all().await;
        self.incomplete.store(result.is_err(), Ordering::SeqCst);
        let written = result?;
        debug!(rows = written, "Inventory refreshed");
        Ok(written)
    }

    async fn scrape_all(&self) -> Result<usize, UsageError> {
        let mut written = 0;
        written += self.scrape_relational().await?;
        written += self.scrape_document().await?;
        written += self.scrape_key_value().await?;
        written += self.scrape_streaming().await?;
        Ok(written)
    }

    fn insert(&self, key: String, info: InstanceInfo) {
        self.cache.set(key, info, self.ttl);
    }

    async fn scrape_relational(&self) -> Result<usize, UsageError> {
        let instances = self.source.describe_db_instances().await;
        let collected_time = Utc::now();
        let instances = instances.map_err(family_error(ResourceFamily::RelationalInstance))?;

        let mut written = 0;
        for row in instances {
            if !tags_match(&self.filter.expected_tags, &row.tags) {
                continue;
            }
            self.insert(
                row.identifier.clone(),
                InstanceInfo {
                    identifier: row.identifier,
                    instance_class: row.instance_class,
                    engine: Engine::from(row.engine),
                    level: Level::Instance,
                    identifier_field_name: "DBInstanceIdentifier".to_string(),
                    broker_id: None,
                    broker_count: 0,
                    collected_time,
                },
            );
            written += 1;
        }

        let clusters = self
            .source
            .describe_db_clusters()
            .await
            .map_err(family_error(ResourceFamily::RelationalCluster))?;

        for row in clusters {
            if !tags_match(&self.filter.expected_tags, &row.tags) {
                continue;
            }
            self.insert(
                row.identifier.clone(),
                InstanceInfo {
                    identifier: row.identifier,
                    instance_class: row.instance_class.unwrap_or_default(),
                    engine: Engine::from(row.engine),
                    level: Level::Cluster,
                    identifier_field_name: "DBClusterIdentifier".to_string(),
                    broker_id: None,
                    broker_count: 0,
                    collected_time,
                },
            );
            written += 1;
        }

        Ok(written)
    }

    async fn scrape_document(&self) -> Result<usize, UsageError> {
        let instances = self.source.describe_docdb_instances().await;
        let collected_time = Utc::now();
        let instances = instances.map_err(family_error(ResourceFamily::DocumentInstance))?;

        let mut written = 0;
        for row in instances {
            if !self.filter.matches_environment(&row.identifier) {
                continue;
            }
            self.insert(
                row.identifier.clone(),
                InstanceInfo {
                    identifier: row.identifier,
                    instance_class: row.instance_class,
                    engine: Engine::from(row.engine),
                    level: Level::Instance,
                    identifier_field_name: "DBInstanceIdentifier".to_string(),
                    broker_id: None,
                    broker_count: 0,
                    collected_time,
                },
            );
            written += 1;
        }

        let clusters = self
            .source
            .describe_docdb_clusters()
            .await
            .map_err(family_error(ResourceFamily::DocumentCluster))?;

        for row in clusters {
            if !self.filter.matches_environment(&row.identifier) {
                continue;
            }
            self.insert(
                row.identifier.clone(),
                InstanceInfo {
                    identifier: row.identifier,
                    instance_class: UNKNOWN_INSTANCE_CLASS.to_string(),
                    engine: Engine::from(row.engine),
                    level: Level::Cluster,
                    identifier_field_name: "DBClusterIdentifier".to_string(),
                    broker_id: None,
                    broker_count: 0,
                    collected_time,
                },
            );
            written += 1;
        }

        Ok(written)
    }

    async fn scrape_key_value(&self) -> Result<usize, UsageError> {
        let clusters = self.source.describe_cache_clusters().await;
        let collected_time = Utc::now();
        let clusters = clusters.map_err(family_error(ResourceFamily::KeyValueCache))?;

        let mut written = 0;
        for row in clusters {
            if !self.filter.matches_environment(&row.identifier) {
                continue;
            }
            self.insert(
                row.identifier.clone(),
                InstanceInfo {
                    identifier: row.identifier,
                    instance_class: row.node_type,
                    engine: Engine::from(row.engine),
                    level: Level::Cluster,
                    identifier_field_name: "CacheClusterId".to_string(),
                    broker_id: None,
                    broker_count: 0,
                    collected_time,
                },
            );
            written += 1;
        }

        Ok(written)
    }

    async fn scrape_streaming(&self) -> Result<usize, UsageError> {
        let clusters = self.source.list_streaming_clusters().await;
        let collected_time = Utc::now();
        let clusters = clusters.map_err(family_error(ResourceFamily::Streaming))?;

        let mut written = 0;
        for row in clusters {
            if !self.filter.matches_environment(&row.name) {
                continue;
            }
            written += self.insert_streaming_cluster(
                &row.name,
                &row.instance_type,
                row.broker_count,
                collected_time,
            );
        }

        Ok(written)
    }

    /// One `Cluster` row plus one `Broker` row per broker id `1..=broker_count`
    fn insert_streaming_cluster(
        &self,
        name: &str,
        instance_type: &str,
        broker_count: u32,
        collected_time: DateTime<Utc>,
    ) -> usize {
        let row = |level, broker_id| InstanceInfo {
            identifier: name.to_string(),
            instance_class: instance_type.to_string(),
            engine: Engine::Kafka,
            level,
            identifier_field_name: "Cluster Name".to_string(),
            broker_id,
            broker_count,
            collected_time,
        };

        self.insert(name.to_string(), row(Level::Cluster, None));
        for id in 1..=broker_count {
            self.insert(broker_key(name, id), row(Level::Broker, Some(id)));
        }

        1 + broker_count as usize
    }
}

fn family_error(family: ResourceFamily) -> impl FnOnce(ProviderError) -> UsageError {
    move |source| UsageError::Inventory { family, source }
}
