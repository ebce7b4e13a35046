//! Blob store trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Hints passed to [`BlobStore::begin_write`].
#[derive(Clone, Copy, Debug, Default)]
pub struct WriteHint {
    /// Expected payload size, when the client declared one.
    pub size: Option<u64>,
}

/// An on-disk blob as seen by the orphan sweep.
#[derive(Clone, Debug)]
pub struct StoredBlob {
    /// The blob id the file is stored under.
    pub id: String,
    /// Size of the stored bytes.
    pub size: u64,
    /// Last modification time, if the backend exposes one.
    pub modified: Option<time::OffsetDateTime>,
}

/// Immutable byte storage keyed by blob id.
///
/// Writes are staged through a [`WriteSession`]: bytes are appended to a
/// temporary artifact and become visible only on `commit`, which must be
/// atomic against crashes. Reads are positional. `delete` is idempotent.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Start a streamed write for `id`. Concurrent sessions for distinct
    /// ids never collide; id generation is collision-resistant.
    async fn begin_write(&self, id: &str, hint: WriteHint) -> StorageResult<Box<dyn WriteSession>>;

    /// Positional read of `[offset, offset + length)`; `None` length means
    /// "to end". The stream can be dropped mid-read.
    async fn read_at(&self, id: &str, offset: u64, length: Option<u64>)
    -> StorageResult<ByteStream>;

    /// Size of the committed blob, or `None` if it does not exist.
    async fn stat(&self, id: &str) -> StorageResult<Option<u64>>;

    /// Remove the blob's bytes. A no-op if the blob is absent.
    async fn delete(&self, id: &str) -> StorageResult<()>;

    /// Enumerate committed blobs. Used by the GC orphan sweep.
    async fn list_blobs(&self) -> StorageResult<Vec<StoredBlob>>;

    /// Verify the backend is reachable and writable.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// A staged blob write.
#[async_trait]
pub trait WriteSession: Send {
    /// Append bytes to the staged artifact.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Durably publish the artifact under its id and return the byte count.
    /// Post-commit the blob is fully visible with its final bytes, or — if
    /// the process crashed mid-commit — absent.
    async fn commit(self: Box<Self>) -> StorageResult<u64>;

    /// Best-effort removal of the temporary artifact. Safe after partial
    /// writes.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
