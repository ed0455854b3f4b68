//! Bulk ingest: many payloads into one component, creating the path and
//! component on first use.

use crate::error::{PipelineError, PipelineResult};
use crate::materialize::Materializer;
use crate::retry::{RetryPolicy, with_retry};
use arbor_core::{
    ComponentRecord, ContentHash, EntityId, EntityKind, PathRecord, Payload, PayloadIndex,
    normalize_name,
};
use arbor_metadata::{MetadataError, MetadataStore};
use serde::Serialize;
use std::sync::Arc;

/// One payload to ingest, with an optional caller-supplied index.
#[derive(Clone, Debug)]
pub struct BulkEntry {
    pub payload: Payload,
    pub index: Option<PayloadIndex>,
}

impl From<Payload> for BulkEntry {
    fn from(payload: Payload) -> Self {
        Self {
            payload,
            index: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BulkRequest {
    pub workspace_id: EntityId,
    pub path_name: String,
    pub component_name: String,
    /// Identifies the logical write. Data ids are derived from it, so a
    /// redelivered request lands on the rows it wrote before. Without one
    /// the key is derived from the entries' contents.
    pub request_id: Option<String>,
    pub entries: Vec<BulkEntry>,
}

impl BulkRequest {
    fn request_key(&self) -> PipelineResult<String> {
        match self.request_id.as_deref().map(str::trim) {
            Some("") => Err(PipelineError::InvalidInput(
                "request_id must not be blank".to_string(),
            )),
            Some(id) => Ok(id.to_string()),
            None => {
                let mut digests = String::with_capacity(self.entries.len() * 64);
                for entry in &self.entries {
                    digests.push_str(&entry.payload.digest().to_hex());
                }
                Ok(format!(
                    "content:{}",
                    ContentHash::compute(digests.as_bytes()).to_hex()
                ))
            }
        }
    }
}

/// Id of the Data row for entry `position` of the request `key`.
fn entry_data_id(component_id: &EntityId, key: &str, position: usize) -> EntityId {
    EntityId::derive(
        EntityKind::Data,
        format!("{component_id}/{key}/{position}").as_bytes(),
    )
}

#[derive(Clone, Debug, Serialize)]
pub struct BulkResult {
    pub request_id: String,
    pub path_id: EntityId,
    pub path_created: bool,
    pub component_id: EntityId,
    pub component_created: bool,
    pub data_ids: Vec<EntityId>,
}

pub struct BulkIngest {
    store: Arc<dyn MetadataStore>,
    materializer: Arc<Materializer>,
    retry: RetryPolicy,
}

impl BulkIngest {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        materializer: Arc<Materializer>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            materializer,
            retry,
        }
    }

    /// Write every entry through the materializer, in order.
    ///
    /// Stops at the first failed entry; rows written before it stay, and
    /// repeating the request completes it without duplicating them.
    #[tracing::instrument(
        skip(self, request),
        fields(
            workspace_id = %request.workspace_id,
            path = %request.path_name,
            component = %request.component_name,
            entries = request.entries.len()
        )
    )]
    pub async fn ingest(&self, request: BulkRequest) -> PipelineResult<BulkResult> {
        let key = request.request_key()?;
        let workspace = with_retry(&self.retry, "get_workspace", || {
            self.store.get_workspace(&request.workspace_id)
        })
        .await?;
        if workspace.is_none() {
            return Err(PipelineError::NotFound(format!(
                "workspace {}",
                request.workspace_id
            )));
        }

        let (path, path_created) = self
            .path_for(&request.workspace_id, &request.path_name)
            .await?;
        let (component, component_created) = self
            .component_for(&path, &request.component_name)
            .await?;

        let mut data_ids = Vec::with_capacity(request.entries.len());
        for (position, entry) in request.entries.into_iter().enumerate() {
            let data_id = entry_data_id(&component.id, &key, position);
            let record = self
                .materializer
                .write_as(data_id, &component.id, entry.payload, entry.index)
                .await?;
            data_ids.push(record.id);
        }

        tracing::info!(
            path_id = %path.id,
            component_id = %component.id,
            written = data_ids.len(),
            "Bulk ingest complete"
        );
        Ok(BulkResult {
            request_id: key,
            path_id: path.id,
            path_created,
            component_id: component.id,
            component_created,
            data_ids,
        })
    }

    async fn path_for(
        &self,
        workspace_id: &EntityId,
        name: &str,
    ) -> PipelineResult<(PathRecord, bool)> {
        let normalized = normalize_name(name)?;
        if let Some(existing) = with_retry(&self.retry, "get_path_by_name", || {
            self.store.get_path_by_name(workspace_id, &normalized)
        })
        .await?
        {
            return Ok((existing, false));
        }

        let path = PathRecord::new(workspace_id.clone(), name)?;
        match self.store.create_path(&path).await {
            Ok(()) => Ok((path, true)),
            // Lost a race with a concurrent ingest; use the winner's row.
            Err(MetadataError::AlreadyExists(_)) => self
                .store
                .get_path_by_name(workspace_id, &normalized)
                .await?
                .map(|p| (p, false))
                .ok_or_else(|| PipelineError::NotFound(format!("path {normalized}"))),
            Err(e) => Err(e.into()),
        }
    }

    async fn component_for(
        &self,
        path: &PathRecord,
        name: &str,
    ) -> PipelineResult<(ComponentRecord, bool)> {
        if let Some(existing) = with_retry(&self.retry, "get_component_by_name", || {
            self.store.get_component_by_name(&path.id, name)
        })
        .await?
        {
            return Ok((existing, false));
        }

        let component = ComponentRecord::new(path.workspace_id.clone(), path.id.clone(), name)?;
        match self.store.create_component(&component).await {
            Ok(()) => Ok((component, true)),
            Err(MetadataError::AlreadyExists(_)) => self
                .store
                .get_component_by_name(&path.id, name)
                .await?
                .map(|c| (c, false))
                .ok_or_else(|| PipelineError::NotFound(format!("component {name}"))),
            Err(e) => Err(e.into()),
        }
    }
}
