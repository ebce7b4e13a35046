//! Local filesystem blob store.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobStore, ByteStream, StoredBlob, WriteHint, WriteSession};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::instrument;
use uuid::Uuid;

/// Chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Suffix separating a final blob path from its staged temporary.
const TMP_INFIX: &str = ".tmp-";

/// Filesystem-backed blob store.
///
/// Blobs live under `<root>/blobs/<aa>/<bb>/<id>.bin` where `aa`/`bb` are
/// the first two byte pairs of the id, keeping any one directory sparse.
/// Writes are staged as `<final>.tmp-<uuid>` and published by fsync+rename.
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Create a new store rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("blobs")).await?;
        Ok(Self { root })
    }

    /// Resolve the final path for a blob id.
    ///
    /// Ids are generated 32-hex strings; anything else is rejected so a
    /// corrupted id can never escape the storage root.
    fn blob_path(&self, id: &str) -> StorageResult<PathBuf> {
        if id.len() < 4 || !id.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(StorageError::InvalidId(id.to_string()));
        }
        Ok(self
            .root
            .join("blobs")
            .join(&id[..2])
            .join(&id[2..4])
            .join(format!("{id}.bin")))
    }
}

#[async_trait]
impl BlobStore for FilesystemStore {
    #[instrument(skip(self, _hint))]
    async fn begin_write(
        &self,
        id: &str,
        _hint: WriteHint,
    ) -> StorageResult<Box<dyn WriteSession>> {
        let final_path = self.blob_path(id)?;
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = PathBuf::from(format!(
            "{}{TMP_INFIX}{}",
            final_path.display(),
            Uuid::new_v4().simple()
        ));
        let file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp_path)
            .await?;

        Ok(Box::new(FilesystemWriteSession {
            file,
            tmp_path,
            final_path,
            bytes_written: 0,
        }))
    }

    #[instrument(skip(self))]
    async fn read_at(
        &self,
        id: &str,
        offset: u64,
        length: Option<u64>,
    ) -> StorageResult<ByteStream> {
        let path = self.blob_path(id)?;
        let mut file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(id.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;

        if offset > 0 {
            file.seek(std::io::SeekFrom::Start(offset)).await?;
        }

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut remaining = length;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let want = match remaining {
                    Some(0) => break,
                    Some(n) => (n as usize).min(STREAM_CHUNK_SIZE),
                    None => STREAM_CHUNK_SIZE,
                };
                let n = file.read(&mut buf[..want]).await?;
                if n == 0 {
                    break;
                }
                if let Some(rem) = remaining.as_mut() {
                    *rem -= n as u64;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self))]
    async fn stat(&self, id: &str) -> StorageResult<Option<u64>> {
        let path = self.blob_path(id)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> StorageResult<()> {
        let path = self.blob_path(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self))]
    async fn list_blobs(&self) -> StorageResult<Vec<StoredBlob>> {
        let mut out = Vec::new();
        let mut stack = vec![self.root.join("blobs")];

        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::Io(e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                // Staged temporaries are not committed blobs.
                if name.contains(TMP_INFIX) {
                    continue;
                }
                let Some(id) = name.strip_suffix(".bin") else {
                    continue;
                };
                let meta = entry.metadata().await?;
                out.push(StoredBlob {
                    id: id.to_string(),
                    size: meta.len(),
                    modified: meta.modified().ok().map(time::OffsetDateTime::from),
                });
            }
        }

        Ok(out)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<()> {
        let meta = fs::metadata(&self.root).await?;
        if !meta.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }
        Ok(())
    }
}

/// Streamed write staged next to its final path.
struct FilesystemWriteSession {
    file: fs::File,
    tmp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
}

#[async_trait]
impl WriteSession for FilesystemWriteSession {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<u64> {
        let this = *self;
        // fsync before rename so the rename never publishes torn bytes.
        if let Err(e) = this.file.sync_all().await {
            drop(this.file);
            let _ = fs::remove_file(&this.tmp_path).await;
            return Err(e.into());
        }
        drop(this.file);
        if let Err(e) = fs::rename(&this.tmp_path, &this.final_path).await {
            let _ = fs::remove_file(&this.tmp_path).await;
            return Err(e.into());
        }
        Ok(this.bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        drop(this.file);
        let _ = fs::remove_file(&this.tmp_path).await;
        Ok(())
    }
}
