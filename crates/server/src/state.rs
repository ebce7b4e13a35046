//! Application state shared across handlers and workers.

use silo_core::config::AppConfig;
use silo_metadata::MetadataStore;
use silo_storage::BlobStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Blob store backend.
    pub storage: Arc<dyn BlobStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
}

impl AppState {
    /// Create a new application state. Fails fast on invalid configuration.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> silo_core::Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            storage,
            metadata,
        })
    }
}
