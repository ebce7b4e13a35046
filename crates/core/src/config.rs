//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:9000").
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:9000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Blob storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for blob files.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/blobs")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// SQLite database file path.
    #[serde(default = "default_metadata_path")]
    pub path: PathBuf,
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("./data/metadata.db")
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Authentication configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Maximum allowed clock skew for SigV4 timestamps, in seconds.
    #[serde(default = "default_max_clock_skew_secs")]
    pub max_clock_skew_secs: u64,
    /// Accept `x-amz-content-sha256: UNSIGNED-PAYLOAD`.
    #[serde(default = "default_allow_unsigned_payload")]
    pub allow_unsigned_payload: bool,
    /// Let unsigned requests through as the anonymous caller.
    /// Intended for local development and tests only.
    #[serde(default)]
    pub allow_anonymous: bool,
    /// Access key id of the root user ensured at startup.
    #[serde(default)]
    pub root_access_key: Option<String>,
    /// Secret key of the root user ensured at startup.
    #[serde(default)]
    pub root_secret_key: Option<String>,
}

fn default_max_clock_skew_secs() -> u64 {
    900 // 15 minutes
}

fn default_allow_unsigned_payload() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_clock_skew_secs: default_max_clock_skew_secs(),
            allow_unsigned_payload: default_allow_unsigned_payload(),
            allow_anonymous: false,
            root_access_key: None,
            root_secret_key: None,
        }
    }
}

impl AuthConfig {
    /// Get the maximum clock skew as a Duration.
    pub fn max_clock_skew(&self) -> Duration {
        Duration::from_secs(self.max_clock_skew_secs)
    }
}

/// Lifecycle worker configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Run the lifecycle worker.
    #[serde(default = "default_worker_enabled")]
    pub enabled: bool,
    /// Seconds between passes.
    #[serde(default = "default_lifecycle_interval_secs")]
    pub interval_secs: u64,
    /// Maximum items mutated per action per pass.
    #[serde(default = "default_lifecycle_batch")]
    pub batch: u32,
}

fn default_worker_enabled() -> bool {
    true
}

fn default_lifecycle_interval_secs() -> u64 {
    900 // 15 minutes
}

fn default_lifecycle_batch() -> u32 {
    50
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            enabled: default_worker_enabled(),
            interval_secs: default_lifecycle_interval_secs(),
            batch: default_lifecycle_batch(),
        }
    }
}

impl LifecycleConfig {
    /// Get the pass interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Blob garbage collection configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GcConfig {
    /// Run the GC worker.
    #[serde(default = "default_worker_enabled")]
    pub enabled: bool,
    /// Seconds between sweeps.
    #[serde(default = "default_gc_interval_secs")]
    pub interval_secs: u64,
    /// Maximum blobs reclaimed per sweep.
    #[serde(default = "default_gc_batch")]
    pub batch: u32,
    /// Minimum age in seconds before an on-disk blob file with no metadata
    /// record is treated as an orphan. Protects in-flight ingests.
    #[serde(default = "default_orphan_grace_secs")]
    pub orphan_grace_secs: u64,
}

fn default_gc_interval_secs() -> u64 {
    900 // 15 minutes
}

fn default_gc_batch() -> u32 {
    256
}

fn default_orphan_grace_secs() -> u64 {
    3600 // 1 hour
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enabled: default_worker_enabled(),
            interval_secs: default_gc_interval_secs(),
            batch: default_gc_batch(),
            orphan_grace_secs: default_orphan_grace_secs(),
        }
    }
}

impl GcConfig {
    /// Get the sweep interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Get the orphan grace period as a Duration.
    pub fn orphan_grace(&self) -> Duration {
        Duration::from_secs(self.orphan_grace_secs)
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Blob storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Lifecycle worker configuration.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Blob GC configuration.
    #[serde(default)]
    pub gc: GcConfig,
}

impl AppConfig {
    /// Create a test configuration with anonymous access enabled.
    ///
    /// **For testing only.** Storage and metadata paths still need to be
    /// pointed at a temp directory by the caller.
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.auth.allow_anonymous = true;
        config
    }

    /// Validate configuration invariants that would cause runtime failures.
    pub fn validate(&self) -> crate::Result<()> {
        if self.lifecycle.enabled && self.lifecycle.interval_secs == 0 {
            return Err(crate::Error::Config(
                "lifecycle.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.gc.enabled && self.gc.interval_secs == 0 {
            return Err(crate::Error::Config(
                "gc.interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
