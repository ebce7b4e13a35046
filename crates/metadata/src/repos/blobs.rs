//! Blob record repository.

use crate::error::MetadataResult;
use crate::models::BlobRow;
use async_trait::async_trait;

/// A GC candidate: a ready blob with no live references.
#[derive(Debug, Clone)]
pub struct GcBlob {
    pub id: String,
    pub size: i64,
}

/// Repository for blob records. Reservation and ready-marking happen
/// inside the PUT composite; this trait covers reads and GC.
#[async_trait]
pub trait BlobRepo: Send + Sync {
    /// Fetch one blob record by id.
    async fn get_blob(&self, id: &str) -> MetadataResult<Option<BlobRow>>;

    /// Whether a blob record exists (any state). Used by the orphan sweep.
    async fn blob_exists(&self, id: &str) -> MetadataResult<bool>;

    /// Count non-delete versions referencing a blob.
    async fn count_blob_references(&self, blob_id: &str) -> MetadataResult<i64>;

    /// Up to `limit` ready blobs with zero non-delete references, oldest
    /// first.
    async fn list_unreferenced_blobs(&self, limit: u32) -> MetadataResult<Vec<GcBlob>>;

    /// Delete a blob record. A no-op if the record is gone.
    async fn delete_blob_record(&self, id: &str) -> MetadataResult<()>;
}
