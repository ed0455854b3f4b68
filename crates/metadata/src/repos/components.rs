//! Component repository trait.

use crate::error::MetadataResult;
use arbor_core::{ComponentRecord, EntityId};
use async_trait::async_trait;

#[async_trait]
pub trait ComponentRepo: Send + Sync {
    /// Fails with `AlreadyExists` if the path already has a component with
    /// the same name.
    async fn create_component(&self, component: &ComponentRecord) -> MetadataResult<()>;

    async fn get_component(&self, id: &EntityId) -> MetadataResult<Option<ComponentRecord>>;

    /// Point lookup on `PathComponentIndex`.
    async fn get_component_by_name(
        &self,
        path_id: &EntityId,
        name: &str,
    ) -> MetadataResult<Option<ComponentRecord>>;

    async fn delete_component(&self, id: &EntityId) -> MetadataResult<ComponentRecord>;
}
