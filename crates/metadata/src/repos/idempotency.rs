//! Idempotency key repository.
//!
//! Records are written inside the PUT composite (insert-if-absent, first
//! writer wins) and are immutable thereafter.

use crate::error::MetadataResult;
use crate::models::IdempotencyRow;
use async_trait::async_trait;

/// Repository for idempotency records.
#[async_trait]
pub trait IdempotencyRepo: Send + Sync {
    /// Look up the recorded outcome for `(bucket, key, token)`.
    async fn get_idempotency(
        &self,
        bucket_id: i64,
        key: &str,
        idem_key: &str,
    ) -> MetadataResult<Option<IdempotencyRow>>;
}
