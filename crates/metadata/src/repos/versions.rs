//! Object version repository: lookups and the lifecycle pruning composites.

use crate::error::MetadataResult;
use crate::models::ObjectVersionRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Result of a lifecycle prune attempt on one version.
#[derive(Debug, Clone)]
pub enum Prune {
    /// The version row was deleted. Carries the blob record removed along
    /// with it, if this was the blob's last non-delete reference.
    Pruned { removed_blob_id: Option<String> },
    /// Nothing was changed: the version no longer exists, or it became the
    /// head since it was listed.
    Skipped,
}

/// Repository for object versions.
#[async_trait]
pub trait VersionRepo: Send + Sync {
    /// Fetch one version by id.
    async fn get_version(&self, version_id: &str) -> MetadataResult<Option<ObjectVersionRow>>;

    /// All versions of a key, newest first.
    async fn list_versions(
        &self,
        bucket_id: i64,
        key: &str,
    ) -> MetadataResult<Vec<ObjectVersionRow>>;

    /// Noncurrent non-delete versions under a prefix older than the
    /// cutoff, oldest first. The head version is never selected.
    async fn list_noncurrent_by_age(
        &self,
        bucket_id: i64,
        prefix: &str,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<ObjectVersionRow>>;

    /// Noncurrent non-delete versions beyond the newest `keep` per key
    /// (ordered `created_at DESC, version_id DESC`), for keys under the
    /// prefix whose noncurrent count exceeds `keep`.
    async fn list_noncurrent_beyond_newest(
        &self,
        bucket_id: i64,
        prefix: &str,
        keep: u32,
        limit: u32,
    ) -> MetadataResult<Vec<ObjectVersionRow>>;

    /// Delete-markers under a prefix older than the cutoff, oldest first.
    async fn list_delete_markers_older_than(
        &self,
        bucket_id: i64,
        prefix: &str,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<ObjectVersionRow>>;

    /// Lifecycle composite: delete a noncurrent version under the per-key
    /// lock, with blob-record GC. Skips (idempotently) if the version is
    /// gone or has become the head since it was listed.
    async fn prune_version(
        &self,
        bucket_id: i64,
        key: &str,
        version_id: &str,
    ) -> MetadataResult<Prune>;

    /// Lifecycle composite: delete an aged delete-marker under the per-key
    /// lock. Never removes the current head (that would resurrect the
    /// key). Returns whether the marker was purged.
    async fn purge_delete_marker(
        &self,
        bucket_id: i64,
        key: &str,
        version_id: &str,
    ) -> MetadataResult<bool>;
}
