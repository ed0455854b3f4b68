//! Secondary index queries.

use crate::error::MetadataResult;
use arbor_core::{BlobLocation, EntityId, IndexName};
use async_trait::async_trait;

/// Exclusive start position for the next page: the last id returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexCursor(pub EntityId);

#[derive(Clone, Debug)]
pub struct PageRequest {
    pub limit: u32,
    pub start: Option<IndexCursor>,
}

impl PageRequest {
    pub fn first(limit: u32) -> Self {
        Self { limit, start: None }
    }

    pub fn after(limit: u32, cursor: IndexCursor) -> Self {
        Self {
            limit,
            start: Some(cursor),
        }
    }
}

/// Row projection carried by the indexes: the child id plus, for
/// `ComponentDataIndex`, the blob location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexRow {
    pub id: EntityId,
    pub s3_location: Option<BlobLocation>,
}

#[derive(Clone, Debug)]
pub struct IndexPage {
    pub rows: Vec<IndexRow>,
    /// Present while more rows remain.
    pub next: Option<IndexCursor>,
}

#[async_trait]
pub trait IndexRepo: Send + Sync {
    /// Query one page of an index by its partition (parent id), ordered by id.
    async fn query_index(
        &self,
        index: IndexName,
        partition: &EntityId,
        page: PageRequest,
    ) -> MetadataResult<IndexPage>;
}
