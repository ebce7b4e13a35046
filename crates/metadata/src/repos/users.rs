//! User repository backing the SigV4 credentials provider.

use crate::error::MetadataResult;
use crate::models::UserRow;
use async_trait::async_trait;

/// Repository for SigV4 principals.
#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Find or create a user for an access key. Returns the user id.
    async fn ensure_user(
        &self,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> MetadataResult<i64>;

    /// Look up an active user by access key id.
    async fn find_user_by_access_key(
        &self,
        access_key_id: &str,
    ) -> MetadataResult<Option<UserRow>>;
}
