//! Orphan blob sweep.
//!
//! Lists every blob under the data key prefix and deletes the ones that no
//! Data row points at, once they are older than the grace period. This
//! reclaims blobs left behind by inconsistent deletes and by stale-blob
//! cleanups that failed.

use crate::error::PipelineResult;
use crate::retry::{RetryPolicy, with_retry};
use crate::writer::{DeleteOutcome, IdempotentWriter};
use arbor_core::config::BlobConfig;
use arbor_core::payload::data_id_from_key;
use arbor_metadata::MetadataStore;
use arbor_storage::{ListingOptions, ObjectStore, ObjectStoreListStreamExt, StorageError};
use futures::TryStreamExt;
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: u64,
    pub deleted: u64,
    /// Blobs still referenced by their row.
    pub kept: u64,
    /// Keys that are not Data blobs, or orphans still inside the grace period.
    pub skipped: u64,
    pub errors: u64,
}

#[derive(Debug)]
enum OrphanCheck {
    Kept,
    Deleted,
    Skipped,
    Error,
}

pub struct OrphanSweeper {
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn ObjectStore>,
    writer: Arc<IdempotentWriter>,
    config: BlobConfig,
    grace_period: time::Duration,
    retry: RetryPolicy,
}

impl OrphanSweeper {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn ObjectStore>,
        writer: Arc<IdempotentWriter>,
        config: BlobConfig,
        grace_period: time::Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            blobs,
            writer,
            config,
            grace_period,
            retry,
        }
    }

    /// One full pass over the prefix. Stops early, with a partial report,
    /// when `cancel` fires.
    #[tracing::instrument(skip(self, cancel), fields(prefix = %self.config.key_prefix))]
    pub async fn run(&self, cancel: &CancellationToken) -> PipelineResult<SweepReport> {
        let mut report = SweepReport::default();
        let prefix = format!("{}/", self.config.key_prefix);
        let mut keys = self
            .blobs
            .list_keys(&prefix, Some(ListingOptions::default()));

        while let Some(key) = keys.try_next().await? {
            if cancel.is_cancelled() {
                tracing::info!(scanned = report.scanned, "Sweep cancelled");
                break;
            }
            report.scanned += 1;
            match self.check(&key).await {
                OrphanCheck::Kept => report.kept += 1,
                OrphanCheck::Deleted => report.deleted += 1,
                OrphanCheck::Skipped => report.skipped += 1,
                OrphanCheck::Error => report.errors += 1,
            }
        }

        tracing::info!(
            scanned = report.scanned,
            deleted = report.deleted,
            kept = report.kept,
            skipped = report.skipped,
            errors = report.errors,
            "Orphan sweep finished"
        );
        Ok(report)
    }

    async fn check(&self, key: &str) -> OrphanCheck {
        let Some(data_id) = data_id_from_key(&self.config.key_prefix, key) else {
            tracing::debug!(key, "Not a data blob key, skipping");
            return OrphanCheck::Skipped;
        };

        match with_retry(&self.retry, "get_data", || self.store.get_data(&data_id)).await {
            Ok(Some(row)) if row.s3_location.as_ref().is_some_and(|l| l.key == key) => {
                return OrphanCheck::Kept;
            }
            // Row gone, or row moved back inline.
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(key, data_id = %data_id, error = %e, "Failed to look up data row, skipping");
                return OrphanCheck::Error;
            }
        }

        let age = match with_retry(&self.retry, "head_blob", || self.blobs.head(key)).await {
            Ok(meta) => match meta.last_modified {
                Some(modified) => OffsetDateTime::now_utc() - modified,
                None => {
                    // Without a timestamp, only a much older grace window is safe.
                    tracing::warn!(key, "Backend returned no last_modified, using 5x grace period");
                    self.grace_period * 5
                }
            },
            Err(crate::error::PipelineError::Storage(StorageError::NotFound(_))) => {
                return OrphanCheck::Skipped;
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read blob age, skipping");
                return OrphanCheck::Error;
            }
        };

        if age < self.grace_period {
            tracing::trace!(key, age_secs = age.whole_seconds(), "Orphan within grace period");
            return OrphanCheck::Skipped;
        }

        match self.writer.delete_blob(key).await {
            Ok(DeleteOutcome::Deleted) => {
                tracing::info!(key, data_id = %data_id, age_secs = age.whole_seconds(), "Deleted orphan blob");
                OrphanCheck::Deleted
            }
            Ok(DeleteOutcome::AlreadyAbsent) => OrphanCheck::Skipped,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to delete orphan blob");
                OrphanCheck::Error
            }
        }
    }
}
