//! Workspace repository trait.

use crate::error::MetadataResult;
use arbor_core::{EntityId, WorkspaceRecord};
use async_trait::async_trait;

/// Repository for the root entity table.
#[async_trait]
pub trait WorkspaceRepo: Send + Sync {
    async fn create_workspace(&self, workspace: &WorkspaceRecord) -> MetadataResult<()>;

    async fn get_workspace(&self, id: &EntityId) -> MetadataResult<Option<WorkspaceRecord>>;

    /// Delete a workspace row only. Descendants are removed by the cascade
    /// reacting to the resulting change record.
    ///
    /// Returns the deleted row, or `NotFound` if it was already absent.
    async fn delete_workspace(&self, id: &EntityId) -> MetadataResult<WorkspaceRecord>;
}
