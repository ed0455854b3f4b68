//! Configuration types shared across crates.
//!
//! `AppConfig` is loaded once at startup, validated, and then passed by
//! reference (or cloned into `Arc`s) into every constructor. Nothing reads
//! configuration from the environment after startup.

use crate::entity::EntityKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default inline threshold: 64 KiB.
pub const DEFAULT_INLINE_THRESHOLD: u64 = 64 * 1024;

/// Admin HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Blob storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to the default provider chain if not set.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to the default provider chain if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs. Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/blobs"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err("storage.bucket cannot be empty".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// Document store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Advisory query timeout in seconds. Slow queries are logged, not cancelled.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/arbor.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite {
                query_timeout_secs: Some(0),
                ..
            } => Err("metadata.query_timeout_secs must be greater than 0".to_string()),
            MetadataConfig::Sqlite { .. } => Ok(()),
        }
    }
}

/// Table names as they appear in change records.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TablesConfig {
    #[serde(default = "default_workspace_table")]
    pub workspace: String,
    #[serde(default = "default_path_table")]
    pub path: String,
    #[serde(default = "default_component_table")]
    pub component: String,
    #[serde(default = "default_data_table")]
    pub data: String,
}

fn default_workspace_table() -> String {
    "workspace".to_string()
}

fn default_path_table() -> String {
    "path".to_string()
}

fn default_component_table() -> String {
    "component".to_string()
}

fn default_data_table() -> String {
    "data".to_string()
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace_table(),
            path: default_path_table(),
            component: default_component_table(),
            data: default_data_table(),
        }
    }
}

impl TablesConfig {
    /// Table name for an entity kind.
    pub fn name(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::Workspace => &self.workspace,
            EntityKind::Path => &self.path,
            EntityKind::Component => &self.component,
            EntityKind::Data => &self.data,
        }
    }

    /// Map a table name back to its entity kind.
    pub fn kind_of(&self, table: &str) -> Option<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| self.name(*kind) == table)
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut seen: Vec<&str> = Vec::with_capacity(4);
        for kind in EntityKind::ALL {
            let name = self.name(kind);
            if name.is_empty() {
                return Err(format!("tables.{kind} cannot be empty"));
            }
            if seen.contains(&name) {
                return Err(format!("tables.{kind} duplicates table name {name:?}"));
            }
            seen.push(name);
        }
        Ok(())
    }
}

/// Payload placement configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlobConfig {
    /// Bucket name recorded in `s3_location` values.
    #[serde(default = "default_blob_bucket")]
    pub bucket: String,
    /// Key prefix under which offloaded payloads are written.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Payloads strictly larger than this are offloaded.
    #[serde(default = "default_inline_threshold_bytes")]
    pub inline_threshold_bytes: u64,
}

fn default_blob_bucket() -> String {
    "arbor-data".to_string()
}

fn default_key_prefix() -> String {
    "data".to_string()
}

fn default_inline_threshold_bytes() -> u64 {
    DEFAULT_INLINE_THRESHOLD
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            bucket: default_blob_bucket(),
            key_prefix: default_key_prefix(),
            inline_threshold_bytes: default_inline_threshold_bytes(),
        }
    }
}

impl BlobConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.bucket.is_empty() {
            return Err("blob.bucket cannot be empty".to_string());
        }
        if self.inline_threshold_bytes == 0 {
            return Err("blob.inline_threshold_bytes must be greater than 0".to_string());
        }
        let prefix = self.key_prefix.trim_matches('/');
        if prefix.is_empty() {
            return Err("blob.key_prefix cannot be empty".to_string());
        }
        if prefix.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
            return Err(format!(
                "blob.key_prefix {:?} contains an invalid segment",
                self.key_prefix
            ));
        }
        Ok(())
    }
}

/// Change stream consumer configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Number of shards per stream.
    #[serde(default = "default_shards")]
    pub shards: u32,
    /// Maximum records per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Delay between polls when a shard is idle.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Wall-clock budget for handling one batch.
    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,
    /// Give up on a batch after this many failed deliveries (0 = never).
    #[serde(default)]
    pub max_batch_attempts: u32,
    /// Entity tables whose streams are consumed.
    #[serde(default = "default_stream_tables")]
    pub tables: Vec<EntityKind>,
}

fn default_shards() -> u32 {
    4
}

fn default_batch_size() -> u32 {
    100
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_invocation_timeout_secs() -> u64 {
    300
}

fn default_stream_tables() -> Vec<EntityKind> {
    vec![EntityKind::Workspace, EntityKind::Data]
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            invocation_timeout_secs: default_invocation_timeout_secs(),
            max_batch_attempts: 0,
            tables: default_stream_tables(),
        }
    }
}

impl StreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.shards == 0 {
            return Err("stream.shards must be at least 1".to_string());
        }
        if self.batch_size == 0 {
            return Err("stream.batch_size must be at least 1".to_string());
        }
        if self.invocation_timeout_secs == 0 {
            return Err("stream.invocation_timeout_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Cascade traversal configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CascadeConfig {
    /// Maximum concurrent resolutions or deletions within one level.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Page size for secondary index queries.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_concurrency() -> usize {
    8
}

fn default_page_size() -> u32 {
    100
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            page_size: default_page_size(),
        }
    }
}

impl CascadeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("cascade.concurrency must be at least 1".to_string());
        }
        if self.page_size == 0 {
            return Err("cascade.page_size must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Per-operation retry policy for transient store errors.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            ));
        }
        Ok(())
    }
}

/// Orphan blob sweep configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Run the sweep on a schedule (disabled by default).
    #[serde(default)]
    pub enabled: bool,
    /// Interval in seconds between sweeps (default: 1 hour).
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    /// Blobs younger than this are never deleted.
    #[serde(default = "default_sweep_grace_period_secs")]
    pub grace_period_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_sweep_grace_period_secs() -> u64 {
    3600
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_sweep_interval_secs(),
            grace_period_secs: default_sweep_grace_period_secs(),
        }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Grace period as a signed duration for comparisons with timestamps.
    pub fn grace_period(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.grace_period_secs).unwrap_or(i64::MAX))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.interval_secs == 0 {
            return Err("sweep.interval_secs cannot be 0 when the sweep is enabled".to_string());
        }
        if self.grace_period_secs > i64::MAX as u64 {
            return Err(format!(
                "sweep.grace_period_secs {} exceeds maximum value {}",
                self.grace_period_secs,
                i64::MAX
            ));
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub tables: TablesConfig,
    #[serde(default)]
    pub blob: BlobConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub cascade: CascadeConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

impl AppConfig {
    /// Create a test configuration with a small inline threshold.
    ///
    /// **For testing only.** Uses filesystem storage and SQLite metadata at
    /// their default relative paths; tests override both with temp dirs.
    pub fn for_testing() -> Self {
        Self {
            blob: BlobConfig {
                inline_threshold_bytes: 4096,
                ..BlobConfig::default()
            },
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 10,
            },
            ..Self::default()
        }
    }

    /// Validate every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.metadata.validate()?;
        self.tables.validate()?;
        self.blob.validate()?;
        self.stream.validate()?;
        self.cascade.validate()?;
        self.retry.validate()?;
        self.sweep.validate()?;

        if let StorageConfig::S3 { bucket, .. } = &self.storage
            && bucket != &self.blob.bucket
        {
            return Err(format!(
                "blob.bucket ({:?}) must match storage.bucket ({:?})",
                self.blob.bucket, bucket
            ));
        }
        Ok(())
    }
}
