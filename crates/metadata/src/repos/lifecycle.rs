//! Lifecycle rule repository.

use crate::error::MetadataResult;
use crate::models::LifecycleRuleRow;
use async_trait::async_trait;

/// A rule as carried by a lifecycle policy PUT.
#[derive(Debug, Clone, Default)]
pub struct LifecycleRuleSpec {
    pub prefix: String,
    pub enabled: bool,
    pub expire_current_after_days: Option<i64>,
    pub expire_noncurrent_after_days: Option<i64>,
    pub noncurrent_newer_versions_to_keep: Option<i64>,
    pub purge_delete_markers_after_days: Option<i64>,
}

/// Repository for lifecycle rules.
#[async_trait]
pub trait LifecycleRepo: Send + Sync {
    /// Replace a bucket's rules wholesale in one transaction.
    async fn replace_lifecycle_rules(
        &self,
        bucket_id: i64,
        rules: &[LifecycleRuleSpec],
    ) -> MetadataResult<()>;

    /// All rules of one bucket.
    async fn list_lifecycle_rules(&self, bucket_id: i64)
    -> MetadataResult<Vec<LifecycleRuleRow>>;

    /// Drop all rules of one bucket.
    async fn delete_lifecycle_rules(&self, bucket_id: i64) -> MetadataResult<()>;

    /// Enabled rules across all buckets, for the lifecycle worker.
    async fn list_enabled_lifecycle_rules(&self) -> MetadataResult<Vec<LifecycleRuleRow>>;
}
