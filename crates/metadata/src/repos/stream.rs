//! Change streams and consumer checkpoints.

use crate::error::MetadataResult;
use arbor_core::{EntityKind, RawChangeRecord};
use async_trait::async_trait;

/// A shard of one entity table's stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamPosition {
    pub kind: EntityKind,
    pub shard: u32,
}

impl std::fmt::Display for StreamPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.shard)
    }
}

/// Every mutation through the entity repositories appends a change record
/// in the same transaction, routed to a shard by the row's id.
#[async_trait]
pub trait StreamRepo: Send + Sync {
    /// Number of shards per table stream.
    fn shard_count(&self) -> u32;

    /// Shard that records for `id` are routed to.
    fn shard_for(&self, id: &arbor_core::EntityId) -> u32;

    /// Read up to `limit` records with a sequence greater than `after`, in
    /// sequence order.
    async fn read_changes(
        &self,
        position: StreamPosition,
        after: Option<u64>,
        limit: u32,
    ) -> MetadataResult<Vec<RawChangeRecord>>;

    /// Last fully processed sequence for a shard.
    async fn load_checkpoint(&self, position: StreamPosition) -> MetadataResult<Option<u64>>;

    async fn save_checkpoint(&self, position: StreamPosition, sequence: u64)
    -> MetadataResult<()>;

    /// Append an externally produced record verbatim (replication imports
    /// and fault injection). Returns its sequence.
    async fn publish_raw(
        &self,
        position: StreamPosition,
        event_name: &str,
        keys: &str,
        old_image: Option<&str>,
        new_image: Option<&str>,
    ) -> MetadataResult<u64>;
}
