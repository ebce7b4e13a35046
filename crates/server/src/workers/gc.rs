//! Blob garbage collector.
//!
//! Each pass has two stages. The record sweep reclaims ready blobs whose
//! last non-delete reference is gone: bytes first, then the record, so a
//! failure at either step just retries next pass. The orphan sweep then
//! removes on-disk files with no blob record at all — the residue of a
//! crash between blob-store commit and the metadata transaction — guarded
//! by a grace period so in-flight ingests are never touched.

use crate::state::AppState;
use silo_metadata::MetadataStore;
use silo_metadata::repos::BlobRepo;
use silo_storage::BlobStore;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

pub struct GcWorker {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn BlobStore>,
    interval: Duration,
    batch: u32,
    orphan_grace: Duration,
}

impl GcWorker {
    pub fn new(state: &AppState) -> Self {
        Self {
            metadata: state.metadata.clone(),
            storage: state.storage.clone(),
            interval: state.config.gc.interval(),
            batch: state.config.gc.batch,
            orphan_grace: state.config.gc.orphan_grace(),
        }
    }

    /// Spawn the periodic loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = self.interval.as_secs(),
                batch = self.batch,
                "gc worker started"
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.one_pass().await;
            }
        })
    }

    /// Run one sweep.
    pub async fn one_pass(&self) {
        let start = std::time::Instant::now();
        let (deleted, freed_bytes) = self.sweep_records().await;
        let orphans = self.sweep_orphan_files().await;
        tracing::info!(
            deleted,
            freed_bytes,
            orphans,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "gc pass finished"
        );
    }

    /// Reclaim ready blobs with zero live references.
    async fn sweep_records(&self) -> (u64, u64) {
        let candidates = match self.metadata.list_unreferenced_blobs(self.batch).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "gc candidate query failed");
                return (0, 0);
            }
        };

        let mut deleted = 0u64;
        let mut freed = 0u64;
        for blob in candidates {
            // Bytes first. If this fails the record stays and the blob is
            // retried next pass.
            if let Err(e) = self.storage.delete(&blob.id).await {
                tracing::error!(blob_id = blob.id, error = %e, "gc byte delete failed");
                continue;
            }
            // Record second. A failure here leaves a record whose bytes
            // are gone; the next pass repeats the idempotent byte delete
            // and tries the record again.
            if let Err(e) = self.metadata.delete_blob_record(&blob.id).await {
                tracing::error!(blob_id = blob.id, error = %e, "gc record delete failed");
                continue;
            }
            deleted += 1;
            freed += blob.size.max(0) as u64;
            tracing::info!(blob_id = blob.id, size = blob.size, "blob collected");
        }
        (deleted, freed)
    }

    /// Remove on-disk blob files with no metadata record, older than the
    /// grace period.
    async fn sweep_orphan_files(&self) -> u64 {
        let files = match self.storage.list_blobs().await {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(error = %e, "orphan listing failed");
                return 0;
            }
        };

        let grace = time::Duration::seconds(self.orphan_grace.as_secs() as i64);
        let cutoff = OffsetDateTime::now_utc() - grace;
        let mut removed = 0u64;

        for file in files {
            if removed >= self.batch as u64 {
                break;
            }
            // Unknown mtime or too fresh: this could be an ingest whose
            // metadata transaction has not committed yet.
            let Some(modified) = file.modified else { continue };
            if modified > cutoff {
                continue;
            }
            match self.metadata.blob_exists(&file.id).await {
                Ok(true) => {}
                Ok(false) => {
                    if let Err(e) = self.storage.delete(&file.id).await {
                        tracing::warn!(blob_id = file.id, error = %e, "orphan delete failed");
                    } else {
                        removed += 1;
                        tracing::info!(blob_id = file.id, size = file.size, "orphan blob removed");
                    }
                }
                Err(e) => {
                    tracing::error!(blob_id = file.id, error = %e, "orphan record check failed");
                }
            }
        }
        removed
    }
}
