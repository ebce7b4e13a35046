//! Blob storage for silo.
//!
//! This crate defines the [`BlobStore`] contract — immutable byte storage
//! keyed by blob id with streamed, crash-safe writes — and the local
//! filesystem backend.

pub mod error;
pub mod filesystem;
pub mod traits;

pub use error::{StorageError, StorageResult};
pub use filesystem::FilesystemStore;
pub use traits::{BlobStore, ByteStream, StoredBlob, WriteHint, WriteSession};
