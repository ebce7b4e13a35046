//! Bucket repository.

use crate::error::MetadataResult;
use crate::models::BucketRow;
use async_trait::async_trait;

/// Repository for bucket operations.
#[async_trait]
pub trait BucketRepo: Send + Sync {
    /// Find or create a bucket by name, claiming ownership on first create.
    /// Idempotent; returns the bucket id either way.
    async fn ensure_bucket(&self, name: &str, owner_id: i64) -> MetadataResult<i64>;

    /// Look up a bucket id by `(name, owner)`.
    async fn bucket_id_by_name(&self, name: &str, owner_id: i64) -> MetadataResult<Option<i64>>;

    /// List buckets owned by a caller, ordered by name.
    async fn list_buckets(&self, owner_id: i64) -> MetadataResult<Vec<BucketRow>>;

    /// Delete a bucket inside one transaction iff it holds no object rows
    /// and no version rows. Also drops the bucket's lifecycle rules and
    /// idempotency records. Fails with `BucketNotEmpty` otherwise.
    async fn delete_bucket_if_empty(&self, bucket_id: i64) -> MetadataResult<()>;
}
