//! Path repository trait.

use crate::error::MetadataResult;
use arbor_core::{EntityId, PathRecord};
use async_trait::async_trait;

#[async_trait]
pub trait PathRepo: Send + Sync {
    /// Fails with `AlreadyExists` if the workspace already has a path with
    /// the same normalized name.
    async fn create_path(&self, path: &PathRecord) -> MetadataResult<()>;

    async fn get_path(&self, id: &EntityId) -> MetadataResult<Option<PathRecord>>;

    /// Point lookup on `WorkspacePathIndex`.
    async fn get_path_by_name(
        &self,
        workspace_id: &EntityId,
        normalized_name: &str,
    ) -> MetadataResult<Option<PathRecord>>;

    async fn delete_path(&self, id: &EntityId) -> MetadataResult<PathRecord>;
}
