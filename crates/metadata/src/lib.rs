//! Document store abstraction for Arbor.
//!
//! This crate provides the entity tables and everything derived from them:
//! - Workspace, Path, Component and Data rows
//! - Parent-id secondary indexes with paginated queries
//! - Per-table sharded change streams and consumer checkpoints

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use repos::{IndexCursor, IndexPage, IndexRow, PageRequest, StreamPosition};
pub use store::{MetadataStore, SqliteStore, StreamOptions, shard_of};

use arbor_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a document store from configuration.
pub async fn from_config(
    config: &MetadataConfig,
    stream: StreamOptions,
) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            tracing::info!(path = %path.display(), shards = stream.shards, "Opening SQLite document store");
            let store = SqliteStore::new(path, *query_timeout_secs, stream).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
