//! Pipeline error types.

use arbor_core::{EntityId, EntityRef};
use arbor_metadata::MetadataError;
use arbor_storage::StorageError;
use thiserror::Error;

/// Errors from pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("invalid record: {0}")]
    Domain(#[from] arbor_core::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Row and blob deletes for one Data record disagreed.
    #[error("inconsistent delete of {id}: row: {row}, blob: {blob}")]
    Inconsistency {
        id: EntityId,
        row: String,
        blob: String,
    },

    /// Some descendants could not be removed; the batch must be redelivered.
    #[error("cascade from {root} incomplete: {failed} entities failed")]
    CascadeIncomplete { root: EntityRef, failed: usize },

    #[error("invocation exceeded its {0:?} budget")]
    Timeout(std::time::Duration),
}

impl PipelineError {
    /// Whether the operation may succeed if retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::Metadata(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether the error means the target was already absent.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::Storage(StorageError::NotFound(_))
                | Self::Metadata(MetadataError::NotFound(_))
        )
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
