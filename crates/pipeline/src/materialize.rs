//! Data materialization: payload placement and the inline index.
//!
//! Payloads up to the inline threshold live in the row's `data` attribute.
//! Larger ones go to the blob store under a key derived from the row id and
//! the row keeps only `s3_location`. Either way `data_map` is derived from the
//! payload bytes.

use crate::decode::ChangeEvent;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics;
use crate::retry::with_retry;
use crate::writer::{DeleteOutcome, IdempotentWriter};
use arbor_core::config::BlobConfig;
use arbor_core::{
    BlobLocation, DataRecord, EntityId, EntityKind, EventName, Payload, PayloadIndex, Placement,
    Record, blob_key,
};
use arbor_metadata::MetadataStore;
use arbor_storage::{ObjectStore, StorageError};
use std::sync::Arc;
use time::OffsetDateTime;

/// What handling a Data change event did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataEventOutcome {
    /// The row already matched its placement and index.
    Unchanged,
    /// Inline bytes over the threshold were moved to the blob store.
    Offloaded,
    /// The row stayed inline and its index or location was corrected.
    Reindexed,
    /// The blob of a removed row was deleted.
    BlobRemoved,
    /// The row no longer exists or carries no payload at all.
    Skipped,
}

pub struct Materializer {
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn ObjectStore>,
    writer: Arc<IdempotentWriter>,
    config: BlobConfig,
}

impl Materializer {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn ObjectStore>,
        writer: Arc<IdempotentWriter>,
        config: BlobConfig,
    ) -> Self {
        Self {
            store,
            blobs,
            writer,
            config,
        }
    }

    pub fn config(&self) -> &BlobConfig {
        &self.config
    }

    /// Deterministic blob location of a Data row.
    pub fn location_for(&self, data_id: &EntityId) -> BlobLocation {
        BlobLocation::new(
            self.config.bucket.clone(),
            blob_key(&self.config.key_prefix, data_id),
        )
    }

    pub fn placement_for(&self, payload: &Payload) -> Placement {
        Placement::for_size(payload.len(), self.config.inline_threshold_bytes)
    }

    /// Create a new Data row under `component_id`.
    ///
    /// A supplied `index` must match the payload; without one it is derived.
    pub async fn write(
        &self,
        component_id: &EntityId,
        payload: Payload,
        index: Option<PayloadIndex>,
    ) -> PipelineResult<DataRecord> {
        self.write_as(EntityId::generate(EntityKind::Data), component_id, payload, index)
            .await
    }

    /// Write the Data row `data_id` under `component_id`.
    ///
    /// An existing row with that id is updated instead, so repeating the same
    /// write leaves the row and its blob untouched.
    #[tracing::instrument(skip(self, payload, index), fields(data_id = %data_id, component_id = %component_id, size = payload.len()))]
    pub async fn write_as(
        &self,
        data_id: EntityId,
        component_id: &EntityId,
        payload: Payload,
        index: Option<PayloadIndex>,
    ) -> PipelineResult<DataRecord> {
        let index = checked_index(&payload, index)?;
        let component = with_retry(self.writer.retry(), "get_component", || {
            self.store.get_component(component_id)
        })
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("component {component_id}")))?;

        let existing = with_retry(self.writer.retry(), "get_data", || {
            self.store.get_data(&data_id)
        })
        .await?;
        if let Some(existing) = existing {
            if existing.component_id != component.id {
                return Err(PipelineError::InvalidInput(format!(
                    "data {data_id} belongs to component {}",
                    existing.component_id
                )));
            }
            return self.update(&data_id, payload, Some(index)).await;
        }

        let now = OffsetDateTime::now_utc();
        let mut record = DataRecord {
            id: data_id,
            component_id: component.id,
            workspace_id: component.workspace_id,
            data: None,
            data_map: index,
            s3_location: None,
            created_at: now,
            updated_at: now,
        };
        let placement = self.place(&mut record, payload).await?;
        self.commit(&record, None).await?;
        tracing::debug!(data_id = %record.id, ?placement, "Data written");
        Ok(record)
    }

    /// Replace the payload of an existing row, re-evaluating its placement.
    ///
    /// A row that moves back inline has its old blob deleted after the row
    /// is rewritten.
    #[tracing::instrument(skip(self, payload, index), fields(data_id = %data_id, size = payload.len()))]
    pub async fn update(
        &self,
        data_id: &EntityId,
        payload: Payload,
        index: Option<PayloadIndex>,
    ) -> PipelineResult<DataRecord> {
        let index = checked_index(&payload, index)?;
        let existing = self.load(data_id).await?;

        if existing.data_map == index
            && existing.is_consistent()
            && existing.placement() == self.placement_for(&payload)
        {
            return Ok(existing);
        }

        let previous = self.overwritten_blob(&existing, &payload).await?;
        let stale = existing.s3_location.clone();
        let mut record = existing;
        record.data_map = index;
        record.updated_at = OffsetDateTime::now_utc();
        self.place(&mut record, payload).await?;
        self.commit(&record, previous).await?;
        self.drop_stale_blob(stale.as_ref(), record.s3_location.as_ref())
            .await;
        Ok(record)
    }

    /// Canonical payload of a row, verified against its index.
    #[tracing::instrument(skip(self), fields(data_id = %data_id))]
    pub async fn read(&self, data_id: &EntityId) -> PipelineResult<Payload> {
        let record = self.load(data_id).await?;
        let payload = match (&record.data, &record.s3_location) {
            (Some(inline), _) => inline.clone(),
            (None, Some(location)) => {
                let bytes = with_retry(self.writer.retry(), "get_blob", || {
                    self.blobs.get(&location.key)
                })
                .await?;
                Payload::new(bytes)
            }
            (None, None) => {
                return Err(PipelineError::Inconsistency {
                    id: record.id,
                    row: "no inline payload".to_string(),
                    blob: "no location".to_string(),
                });
            }
        };
        record.data_map.verify(&payload)?;
        Ok(payload)
    }

    /// Delete a row and its blob. An absent row is success.
    pub async fn delete(&self, data_id: &EntityId) -> PipelineResult<()> {
        let existing = with_retry(self.writer.retry(), "get_data", || {
            self.store.get_data(data_id)
        })
        .await?;
        let Some(existing) = existing else {
            return Ok(());
        };
        self.writer
            .delete_data(data_id, existing.s3_location.as_ref())
            .await
            .into_result()
    }

    /// Delete the blob behind `location`. An absent blob is success.
    pub async fn remove_blob(&self, location: &BlobLocation) -> PipelineResult<DeleteOutcome> {
        if location.bucket != self.config.bucket {
            tracing::warn!(
                location = %location,
                bucket = %self.config.bucket,
                "Blob location names a foreign bucket, deleting by key"
            );
        }
        self.writer.delete_blob(&location.key).await
    }

    /// React to a change on the Data table.
    ///
    /// Insert and modify events reconcile the row as it currently is in the
    /// store, so writes made here (which emit their own modify events) settle
    /// into [`DataEventOutcome::Unchanged`] on the next pass.
    #[tracing::instrument(skip(self, event), fields(data_id = %event.id, event = %event.event_kind))]
    pub async fn on_data_event(&self, event: &ChangeEvent) -> PipelineResult<DataEventOutcome> {
        if event.entity_kind != EntityKind::Data {
            return Err(PipelineError::InvalidInput(format!(
                "{} event routed to the data materializer",
                event.entity_kind
            )));
        }
        let before_location = event
            .before
            .as_ref()
            .and_then(Record::as_data)
            .and_then(|d| d.s3_location.clone());

        match event.event_kind {
            EventName::Remove => match before_location {
                Some(location) => {
                    self.remove_blob(&location).await?;
                    Ok(DataEventOutcome::BlobRemoved)
                }
                None => Ok(DataEventOutcome::Unchanged),
            },
            EventName::Insert | EventName::Modify => {
                let current = with_retry(self.writer.retry(), "get_data", || {
                    self.store.get_data(&event.id)
                })
                .await?;
                let Some(current) = current else {
                    tracing::debug!("Row deleted since the event, nothing to materialize");
                    return Ok(DataEventOutcome::Skipped);
                };
                let (outcome, location) = self.reconcile(current).await?;
                self.drop_stale_blob(before_location.as_ref(), location.as_ref())
                    .await;
                Ok(outcome)
            }
        }
    }

    /// Bring a stored row in line with its payload. Returns the outcome and
    /// the row's resulting blob location.
    async fn reconcile(
        &self,
        mut record: DataRecord,
    ) -> PipelineResult<(DataEventOutcome, Option<BlobLocation>)> {
        let Some(payload) = record.data.take() else {
            if record.s3_location.is_none() {
                tracing::warn!(data_id = %record.id, "Data row has neither payload nor location");
                return Ok((DataEventOutcome::Skipped, None));
            }
            return Ok((DataEventOutcome::Unchanged, record.s3_location));
        };

        let index = PayloadIndex::derive(&payload);
        let placement = self.placement_for(&payload);
        if placement == Placement::Inline
            && record.data_map == index
            && record.s3_location.is_none()
        {
            return Ok((DataEventOutcome::Unchanged, None));
        }

        let previous = self.overwritten_blob(&record, &payload).await?;
        let stale = record.s3_location.clone();
        record.data_map = index;
        record.updated_at = OffsetDateTime::now_utc();
        self.place(&mut record, payload).await?;
        self.commit(&record, previous).await?;
        self.drop_stale_blob(stale.as_ref(), record.s3_location.as_ref())
            .await;

        let outcome = match placement {
            Placement::Offloaded => DataEventOutcome::Offloaded,
            Placement::Inline => DataEventOutcome::Reindexed,
        };
        Ok((outcome, record.s3_location))
    }

    /// Set the payload fields of `record` for `payload`'s placement, writing
    /// the blob first when offloading.
    async fn place(&self, record: &mut DataRecord, payload: Payload) -> PipelineResult<Placement> {
        let placement = self.placement_for(&payload);
        match placement {
            Placement::Inline => {
                record.data = Some(payload);
                record.s3_location = None;
                metrics::INLINE_WRITES.inc();
            }
            Placement::Offloaded => {
                let location = self.location_for(&record.id);
                self.writer.put_blob(&location.key, &payload).await?;
                record.data = None;
                record.s3_location = Some(location);
                metrics::OFFLOADED_WRITES.inc();
            }
        }
        Ok(placement)
    }

    /// Current bytes of the blob that placing `payload` into `record` would
    /// overwrite, if any.
    async fn overwritten_blob(
        &self,
        record: &DataRecord,
        payload: &Payload,
    ) -> PipelineResult<Option<Payload>> {
        if self.placement_for(payload) != Placement::Offloaded {
            return Ok(None);
        }
        let Some(current) = record.s3_location.as_ref() else {
            return Ok(None);
        };
        if current.key != self.location_for(&record.id).key {
            return Ok(None);
        }
        let fetched = with_retry(self.writer.retry(), "get_blob", || {
            self.blobs.get(&current.key)
        })
        .await;
        match fetched {
            Ok(bytes) => Ok(Some(Payload::new(bytes))),
            Err(PipelineError::Storage(StorageError::NotFound(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write the row after [`Self::place`]. If the row write fails, the blob
    /// at the row's key goes back to `previous` (or away when there was none)
    /// so the stored row still reads back; failing that is an inconsistency.
    async fn commit(&self, record: &DataRecord, previous: Option<Payload>) -> PipelineResult<()> {
        let err = match self.writer.put_data(record).await {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };
        let Some(location) = record.s3_location.as_ref() else {
            return Err(err);
        };
        let restored = match &previous {
            Some(bytes) => self.writer.put_blob(&location.key, bytes).await.map(|_| ()),
            None => self.writer.delete_blob(&location.key).await.map(|_| ()),
        };
        match restored {
            Ok(()) => {
                tracing::debug!(
                    data_id = %record.id,
                    error = %err,
                    "Row write failed, blob restored"
                );
                Err(err)
            }
            Err(restore) => {
                metrics::INCONSISTENCIES.inc();
                tracing::error!(
                    data_id = %record.id,
                    location = %location,
                    row_error = %err,
                    blob_error = %restore,
                    "Row write failed and the blob could not be restored"
                );
                Err(PipelineError::Inconsistency {
                    id: record.id.clone(),
                    row: err.to_string(),
                    blob: restore.to_string(),
                })
            }
        }
    }

    /// Delete `previous` when the row no longer points at it. Failures are
    /// logged; the orphan sweep reclaims what is left behind.
    async fn drop_stale_blob(
        &self,
        previous: Option<&BlobLocation>,
        current: Option<&BlobLocation>,
    ) {
        let Some(previous) = previous else {
            return;
        };
        if current.is_some_and(|c| c.key == previous.key) {
            return;
        }
        if let Err(e) = self.remove_blob(previous).await {
            tracing::warn!(location = %previous, error = %e, "Failed to delete stale blob");
        }
    }

    async fn load(&self, data_id: &EntityId) -> PipelineResult<DataRecord> {
        with_retry(self.writer.retry(), "get_data", || self.store.get_data(data_id))
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("data {data_id}")))
    }
}

fn checked_index(payload: &Payload, index: Option<PayloadIndex>) -> PipelineResult<PayloadIndex> {
    match index {
        Some(index) => {
            index.verify(payload)?;
            Ok(index)
        }
        None => Ok(PayloadIndex::derive(payload)),
    }
}
