//! Object head repository: the write path composites and head listings.

use crate::error::MetadataResult;
use crate::models::{HeadListingRow, ObjectVersionRow};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Everything the metadata transaction of a PUT needs. The blob named by
/// `staged_blob_id` has already been committed to the blob store; the
/// transaction decides whether to adopt an existing ready blob instead.
#[derive(Debug, Clone)]
pub struct PutCommit {
    pub bucket_id: i64,
    pub key: String,
    /// Freshly ingested blob, candidate for the dedup decision.
    pub staged_blob_id: String,
    /// `"sha256:<hex>"` of the ingested bytes.
    pub checksum: String,
    /// Observed byte count of the ingested body.
    pub size: i64,
    /// Quoted ETag derived from the checksum.
    pub etag: String,
    pub content_type: String,
    /// Client-supplied idempotency token, if any.
    pub idempotency_key: Option<String>,
}

/// Result of the PUT metadata transaction.
#[derive(Debug, Clone)]
pub enum PutOutcome {
    /// A new version was created. `deduped` is true when an existing ready
    /// blob was adopted — the staged blob's bytes are then unused and must
    /// be deleted by the caller.
    Committed {
        version_id: String,
        blob_id: String,
        etag: String,
        deduped: bool,
    },
    /// The idempotency token had already been consumed; nothing was
    /// mutated. The staged blob's bytes must be deleted by the caller.
    Replayed { version_id: String, etag: String },
}

/// Result of a permanent version delete.
#[derive(Debug, Clone)]
pub struct VersionDelete {
    /// Blob record removed because the deleted version held its last
    /// non-delete reference; the caller deletes the bytes.
    pub removed_blob_id: Option<String>,
}

/// A head selected for current-expiration by the lifecycle engine.
#[derive(Debug, Clone)]
pub struct ExpiredHead {
    pub bucket_id: i64,
    pub key: String,
}

/// Parameters for one ListObjectsV2 scan page.
#[derive(Debug, Clone)]
pub struct ListHeadPage {
    pub bucket_id: i64,
    /// Key prefix filter; empty matches everything.
    pub prefix: String,
    /// Exclusive lower bound on keys (continuation / start-after seek).
    pub after_key: String,
    /// Row budget for the scan (the caller asks for one extra row to
    /// detect truncation).
    pub limit: u32,
}

/// Repository for object heads.
///
/// The mutating operations are composites: each runs in its own
/// transaction and serializes on the object row via the per-key lock
/// before reading or writing anything else.
#[async_trait]
pub trait ObjectRepo: Send + Sync {
    /// Resolve the head version for a key, if the key has one.
    async fn get_head_version(
        &self,
        bucket_id: i64,
        key: &str,
    ) -> MetadataResult<Option<ObjectVersionRow>>;

    /// The PUT metadata transaction: idempotency probe, dedup probe,
    /// blob adoption or ready-marking, version insert, head update and
    /// idempotency recording.
    async fn commit_put(&self, put: PutCommit) -> MetadataResult<PutOutcome>;

    /// Soft delete: insert a delete-marker and point the head at it.
    /// Returns the marker's version id.
    async fn soft_delete_object(&self, bucket_id: i64, key: &str) -> MetadataResult<String>;

    /// Permanently delete one version. Rewires the head to the newest
    /// remaining version (or a fresh delete-marker) when the head was
    /// removed, and drops the blob record once its last non-delete
    /// reference is gone. `NotFound` if the version does not exist.
    async fn delete_version_permanent(
        &self,
        bucket_id: i64,
        key: &str,
        version_id: &str,
    ) -> MetadataResult<VersionDelete>;

    /// Lifecycle current-expiration: shadow the key with a fresh
    /// delete-marker. Returns the marker id, or `None` when the head is
    /// already a delete-marker (or the key vanished).
    async fn expire_current_object(
        &self,
        bucket_id: i64,
        key: &str,
    ) -> MetadataResult<Option<String>>;

    /// One page of heads with a live (non-delete) current version,
    /// ordered by key ascending in byte order.
    async fn list_head_page(&self, page: &ListHeadPage) -> MetadataResult<Vec<HeadListingRow>>;

    /// Heads whose current non-delete version is older than the cutoff.
    async fn list_heads_older_than(
        &self,
        bucket_id: i64,
        prefix: &str,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<ExpiredHead>>;
}
