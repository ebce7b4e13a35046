//! Lifecycle worker.
//!
//! Each pass applies every enabled rule, in order: (1) expire noncurrent
//! versions by age, (2) keep only the newest K noncurrent versions,
//! (3) purge aged delete-markers, (4) expire current heads. Every mutation
//! is a per-key composite transaction, so the worker never races user
//! writes; single-item failures are logged and skipped.

use crate::state::AppState;
use silo_metadata::MetadataStore;
use silo_metadata::models::LifecycleRuleRow;
use silo_metadata::repos::{LifecycleRepo, ObjectRepo, Prune, VersionRepo};
use silo_storage::BlobStore;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

pub struct LifecycleWorker {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn BlobStore>,
    interval: Duration,
    batch: u32,
}

impl LifecycleWorker {
    pub fn new(state: &AppState) -> Self {
        Self {
            metadata: state.metadata.clone(),
            storage: state.storage.clone(),
            interval: state.config.lifecycle.interval(),
            batch: state.config.lifecycle.batch,
        }
    }

    /// Spawn the periodic loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = self.interval.as_secs(),
                batch = self.batch,
                "lifecycle worker started"
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so passes run
            // a full interval after startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.one_pass().await;
            }
        })
    }

    /// Run one full pass over every enabled rule.
    pub async fn one_pass(&self) {
        let start = std::time::Instant::now();
        let rules = match self.metadata.list_enabled_lifecycle_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                tracing::error!(error = %e, "failed to load lifecycle rules");
                return;
            }
        };
        if rules.is_empty() {
            return;
        }

        let mut changed = 0u64;
        for rule in &rules {
            changed += self.apply_rule(rule).await;
        }
        tracing::info!(
            rules = rules.len(),
            changed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "lifecycle pass finished"
        );
    }

    async fn apply_rule(&self, rule: &LifecycleRuleRow) -> u64 {
        let now = OffsetDateTime::now_utc();
        let mut changed = 0u64;

        // (1) Expire noncurrent versions by age.
        if let Some(days) = rule.expire_noncurrent_after_days.filter(|d| *d >= 0) {
            let cutoff = now - time::Duration::days(days);
            match self
                .metadata
                .list_noncurrent_by_age(rule.bucket_id, &rule.prefix, cutoff, self.batch)
                .await
            {
                Ok(versions) => {
                    for version in versions {
                        changed += self
                            .prune(version.bucket_id, &version.key, &version.version_id)
                            .await;
                    }
                }
                Err(e) => {
                    tracing::error!(bucket_id = rule.bucket_id, error = %e, "noncurrent-age query failed");
                }
            }
        }

        // (2) Keep only the newest K noncurrent versions.
        if let Some(keep) = rule.noncurrent_newer_versions_to_keep.filter(|k| *k >= 0) {
            match self
                .metadata
                .list_noncurrent_beyond_newest(rule.bucket_id, &rule.prefix, keep as u32, self.batch)
                .await
            {
                Ok(versions) => {
                    for version in versions {
                        changed += self
                            .prune(version.bucket_id, &version.key, &version.version_id)
                            .await;
                    }
                }
                Err(e) => {
                    tracing::error!(bucket_id = rule.bucket_id, error = %e, "keep-newest query failed");
                }
            }
        }

        // (3) Purge aged delete-markers, never the head.
        if let Some(days) = rule.purge_delete_markers_after_days.filter(|d| *d >= 0) {
            let cutoff = now - time::Duration::days(days);
            match self
                .metadata
                .list_delete_markers_older_than(rule.bucket_id, &rule.prefix, cutoff, self.batch)
                .await
            {
                Ok(markers) => {
                    for marker in markers {
                        match self
                            .metadata
                            .purge_delete_marker(marker.bucket_id, &marker.key, &marker.version_id)
                            .await
                        {
                            Ok(true) => {
                                changed += 1;
                                tracing::info!(key = marker.key, version_id = marker.version_id, "delete-marker purged");
                            }
                            Ok(false) => {}
                            Err(e) => {
                                tracing::error!(key = marker.key, error = %e, "delete-marker purge failed");
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(bucket_id = rule.bucket_id, error = %e, "delete-marker query failed");
                }
            }
        }

        // (4) Expire current heads: shadow aged keys with delete-markers.
        if let Some(days) = rule.expire_current_after_days.filter(|d| *d >= 0) {
            let cutoff = now - time::Duration::days(days);
            match self
                .metadata
                .list_heads_older_than(rule.bucket_id, &rule.prefix, cutoff, self.batch)
                .await
            {
                Ok(heads) => {
                    for head in heads {
                        match self
                            .metadata
                            .expire_current_object(head.bucket_id, &head.key)
                            .await
                        {
                            Ok(Some(marker_id)) => {
                                changed += 1;
                                tracing::info!(key = head.key, marker_id, "current version expired");
                            }
                            Ok(None) => {}
                            Err(e) => {
                                tracing::error!(key = head.key, error = %e, "current expiration failed");
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(bucket_id = rule.bucket_id, error = %e, "expired-heads query failed");
                }
            }
        }

        changed
    }

    /// Prune one noncurrent version and reclaim its blob bytes when the
    /// composite reports the record orphaned.
    async fn prune(&self, bucket_id: i64, key: &str, version_id: &str) -> u64 {
        match self.metadata.prune_version(bucket_id, key, version_id).await {
            Ok(Prune::Pruned { removed_blob_id }) => {
                tracing::info!(key, version_id, "noncurrent version pruned");
                if let Some(blob_id) = removed_blob_id {
                    if let Err(e) = self.storage.delete(&blob_id).await {
                        tracing::warn!(blob_id, error = %e, "blob byte delete failed");
                    } else {
                        tracing::info!(blob_id, "blob reclaimed");
                    }
                }
                1
            }
            Ok(Prune::Skipped) => 0,
            Err(e) => {
                tracing::error!(key, version_id, error = %e, "version prune failed");
                0
            }
        }
    }
}
