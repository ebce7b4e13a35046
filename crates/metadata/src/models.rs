//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;

/// Blob states. A `pending` blob has bytes in flight and no versions
/// referencing it; exactly one `ready` blob exists per checksum.
pub const BLOB_STATE_PENDING: &str = "pending";
pub const BLOB_STATE_READY: &str = "ready";

/// SigV4 principal.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub status: String,
    pub created_at: OffsetDateTime,
}

/// Bucket record, one per name.
#[derive(Debug, Clone, FromRow)]
pub struct BucketRow {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub created_at: OffsetDateTime,
}

/// Content-addressed blob record.
#[derive(Debug, Clone, FromRow)]
pub struct BlobRow {
    pub id: String,
    /// `"sha256:" + hex(sha256(bytes))`, unique among ready blobs.
    pub checksum: String,
    pub size: i64,
    pub state: String,
    pub storage_node: String,
    pub created_at: OffsetDateTime,
}

/// Object head pointer. A row exists iff the key has ever received a
/// version; the head may name a delete-marker.
#[derive(Debug, Clone, FromRow)]
pub struct ObjectRow {
    pub id: i64,
    pub bucket_id: i64,
    pub key: String,
    pub head_version_id: String,
    pub created_at: OffsetDateTime,
}

/// One version of an object. `is_delete` marks a delete-marker, which
/// carries no blob reference.
#[derive(Debug, Clone, FromRow)]
pub struct ObjectVersionRow {
    pub version_id: String,
    pub bucket_id: i64,
    pub key: String,
    pub blob_id: Option<String>,
    pub size: Option<i64>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub is_delete: bool,
    pub created_at: OffsetDateTime,
}

/// Idempotency record: one durable PUT outcome per (bucket, key, token).
#[derive(Debug, Clone, FromRow)]
pub struct IdempotencyRow {
    pub bucket_id: i64,
    pub key: String,
    pub idem_key: String,
    pub version_id: String,
    pub etag: String,
    pub created_at: OffsetDateTime,
}

/// Lifecycle rule. Replaced wholesale on policy PUT.
#[derive(Debug, Clone, FromRow)]
pub struct LifecycleRuleRow {
    pub id: i64,
    pub bucket_id: i64,
    pub prefix: String,
    pub enabled: bool,
    pub expire_current_after_days: Option<i64>,
    pub expire_noncurrent_after_days: Option<i64>,
    pub noncurrent_newer_versions_to_keep: Option<i64>,
    pub purge_delete_markers_after_days: Option<i64>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// One row of a ListObjectsV2 page: a head joined to its current version.
#[derive(Debug, Clone, FromRow)]
pub struct HeadListingRow {
    pub key: String,
    pub etag: Option<String>,
    pub size: Option<i64>,
    pub created_at: OffsetDateTime,
}
