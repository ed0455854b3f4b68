//! Data repository trait.

use crate::error::MetadataResult;
use arbor_core::{DataRecord, EntityId};
use async_trait::async_trait;

#[async_trait]
pub trait DataRepo: Send + Sync {
    /// Insert or fully replace a Data row.
    ///
    /// Returns the previous row when one was replaced. Emits an `INSERT` or
    /// `MODIFY` change record accordingly.
    async fn put_data(&self, data: &DataRecord) -> MetadataResult<Option<DataRecord>>;

    async fn get_data(&self, id: &EntityId) -> MetadataResult<Option<DataRecord>>;

    /// Returns the deleted row, or `NotFound` if it was already absent.
    async fn delete_data(&self, id: &EntityId) -> MetadataResult<DataRecord>;
}
