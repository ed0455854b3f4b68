//! Idempotent writer for rows and blobs.
//!
//! Deleting something that is already gone succeeds, and a blob whose
//! current content already matches is not rewritten.

use crate::error::{PipelineError, PipelineResult};
use crate::metrics;
use crate::retry::{RetryPolicy, with_retry};
use arbor_core::{BlobLocation, DataRecord, EntityId, EntityKind, Payload};
use arbor_metadata::{MetadataError, MetadataStore};
use arbor_storage::{ObjectStore, StorageError};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlobWrite {
    Written,
    /// Same bytes were already stored under the key.
    Unchanged,
}

/// Outcome of deleting a Data row together with its blob.
#[derive(Debug)]
pub struct DataDeleteOutcome {
    pub id: EntityId,
    pub row: PipelineResult<DeleteOutcome>,
    /// `None` when the row had no blob.
    pub blob: Option<PipelineResult<DeleteOutcome>>,
}

impl DataDeleteOutcome {
    /// The row is gone (deleted now or before).
    pub fn row_removed(&self) -> bool {
        self.row.is_ok()
    }

    pub fn blob_removed(&self) -> bool {
        !matches!(self.blob, Some(Err(_)))
    }

    /// Exactly one of the two deletes failed.
    pub fn is_inconsistent(&self) -> bool {
        self.blob.is_some() && self.row_removed() != self.blob_removed()
    }

    /// Collapse into a single result. A split outcome becomes an
    /// [`PipelineError::Inconsistency`].
    pub fn into_result(self) -> PipelineResult<()> {
        match (self.row, self.blob) {
            (Ok(_), None) | (Ok(_), Some(Ok(_))) => Ok(()),
            (Err(e), None) | (Err(e), Some(Err(_))) => Err(e),
            (Ok(_), Some(Err(blob))) => Err(PipelineError::Inconsistency {
                id: self.id,
                row: "deleted".to_string(),
                blob: blob.to_string(),
            }),
            (Err(row), Some(Ok(_))) => Err(PipelineError::Inconsistency {
                id: self.id,
                row: row.to_string(),
                blob: "deleted".to_string(),
            }),
        }
    }
}

pub struct IdempotentWriter {
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
}

impl IdempotentWriter {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn ObjectStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            blobs,
            retry,
        }
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Delete a row of any kind. An absent row is success.
    #[tracing::instrument(skip(self), fields(kind = %kind, id = %id))]
    pub async fn delete_row(&self, kind: EntityKind, id: &EntityId) -> PipelineResult<DeleteOutcome> {
        let result = with_retry(&self.retry, "delete_row", || async move {
            match kind {
                EntityKind::Workspace => self.store.delete_workspace(id).await.map(drop),
                EntityKind::Path => self.store.delete_path(id).await.map(drop),
                EntityKind::Component => self.store.delete_component(id).await.map(drop),
                EntityKind::Data => self.store.delete_data(id).await.map(drop),
            }
        })
        .await;

        match result {
            Ok(()) => {
                metrics::ROWS_DELETED.with_label_values(&[kind.as_str()]).inc();
                Ok(DeleteOutcome::Deleted)
            }
            Err(PipelineError::Metadata(MetadataError::NotFound(_))) => {
                tracing::debug!("Row already absent");
                Ok(DeleteOutcome::AlreadyAbsent)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a blob. An absent blob is success.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn delete_blob(&self, key: &str) -> PipelineResult<DeleteOutcome> {
        let result = with_retry(&self.retry, "delete_blob", || self.blobs.delete(key)).await;
        match result {
            Ok(()) => {
                metrics::BLOBS_DELETED.inc();
                Ok(DeleteOutcome::Deleted)
            }
            Err(PipelineError::Storage(StorageError::NotFound(_))) => {
                Ok(DeleteOutcome::AlreadyAbsent)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a Data row and its blob. Both deletes are always attempted.
    ///
    /// The blob goes first so that a failed row delete leaves the row in
    /// place for the next attempt to rediscover.
    pub async fn delete_data(
        &self,
        id: &EntityId,
        location: Option<&BlobLocation>,
    ) -> DataDeleteOutcome {
        let blob = match location {
            Some(location) => Some(self.delete_blob(&location.key).await),
            None => None,
        };
        let row = self.delete_row(EntityKind::Data, id).await;
        let outcome = DataDeleteOutcome {
            id: id.clone(),
            row,
            blob,
        };
        if outcome.is_inconsistent() {
            metrics::INCONSISTENCIES.inc();
            tracing::error!(
                data_id = %id,
                row_error = ?outcome.row.as_ref().err().map(ToString::to_string),
                blob_error = ?outcome.blob.as_ref().and_then(|b| b.as_ref().err()).map(ToString::to_string),
                "Row and blob deletes disagree"
            );
        }
        outcome
    }

    /// Store `payload` under `key` unless identical bytes are already there.
    #[tracing::instrument(skip(self, payload), fields(key = %key, size = payload.len()))]
    pub async fn put_blob(&self, key: &str, payload: &Payload) -> PipelineResult<BlobWrite> {
        if self.blob_matches(key, payload).await? {
            tracing::debug!("Blob already current");
            return Ok(BlobWrite::Unchanged);
        }
        with_retry(&self.retry, "put_blob", || {
            self.blobs.put(key, payload.as_bytes().clone())
        })
        .await?;
        metrics::BLOBS_WRITTEN.inc();
        Ok(BlobWrite::Written)
    }

    async fn blob_matches(&self, key: &str, payload: &Payload) -> PipelineResult<bool> {
        let meta = match with_retry(&self.retry, "head_blob", || self.blobs.head(key)).await {
            Ok(meta) => meta,
            Err(PipelineError::Storage(StorageError::NotFound(_))) => return Ok(false),
            Err(e) => return Err(e),
        };
        if meta.size != payload.len() {
            return Ok(false);
        }
        match with_retry(&self.retry, "get_blob", || self.blobs.get(key)).await {
            Ok(existing) => Ok(Payload::new(existing).digest() == payload.digest()),
            Err(PipelineError::Storage(StorageError::NotFound(_))) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Insert or replace a Data row.
    pub async fn put_data(&self, record: &DataRecord) -> PipelineResult<Option<DataRecord>> {
        with_retry(&self.retry, "put_data", || self.store.put_data(record)).await
    }
}
