//! Event-driven cascade deletion and data materialization for Arbor.
//!
//! Change records from the document store's streams are decoded into typed
//! events and dispatched:
//! - Workspace (and Path/Component) removals start a [`cascade`] that
//!   deletes every descendant bottom-up.
//! - Data inserts and modifications are [`materialize`]d: large payloads are
//!   offloaded to the blob store and the inline index is kept in sync.
//! - Data removals delete the row's blob.
//!
//! All writes go through the [`writer::IdempotentWriter`], so redelivered
//! batches converge on the same end state.

pub mod cascade;
pub mod consumer;
pub mod decode;
pub mod error;
pub mod ingest;
pub mod materialize;
pub mod metrics;
pub mod resolver;
pub mod retry;
pub mod sweep;
pub mod writer;

pub use cascade::{CascadeEngine, CascadeReport, FailedEntity, FailureStage};
pub use consumer::{BatchOutcome, EventHandler, HandledEvent, StreamConsumer};
pub use decode::{ChangeEvent, DecodeError, decode_batch};
pub use error::{PipelineError, PipelineResult};
pub use ingest::{BulkEntry, BulkIngest, BulkRequest, BulkResult};
pub use materialize::{DataEventOutcome, Materializer};
pub use resolver::RelationshipResolver;
pub use retry::RetryPolicy;
pub use sweep::{OrphanSweeper, SweepReport};
pub use writer::{DeleteOutcome, IdempotentWriter};

use arbor_core::config::AppConfig;
use arbor_metadata::MetadataStore;
use arbor_storage::ObjectStore;
use std::sync::Arc;

/// Every pipeline component, wired from one configuration.
#[derive(Clone)]
pub struct Pipeline {
    pub store: Arc<dyn MetadataStore>,
    pub blobs: Arc<dyn ObjectStore>,
    pub writer: Arc<IdempotentWriter>,
    pub resolver: Arc<RelationshipResolver>,
    pub cascade: Arc<CascadeEngine>,
    pub materializer: Arc<Materializer>,
    pub ingest: Arc<BulkIngest>,
    pub consumer: Arc<StreamConsumer>,
    pub sweeper: Arc<OrphanSweeper>,
}

impl Pipeline {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn ObjectStore>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        let writer = Arc::new(IdempotentWriter::new(
            store.clone(),
            blobs.clone(),
            retry.clone(),
        ));
        let resolver = Arc::new(RelationshipResolver::new(
            store.clone(),
            config.cascade.page_size,
            retry.clone(),
        ));
        let cascade = Arc::new(CascadeEngine::new(
            resolver.clone(),
            writer.clone(),
            config.cascade.concurrency,
        ));
        let materializer = Arc::new(Materializer::new(
            store.clone(),
            blobs.clone(),
            writer.clone(),
            config.blob.clone(),
        ));
        let ingest = Arc::new(BulkIngest::new(
            store.clone(),
            materializer.clone(),
            retry.clone(),
        ));
        let handler = Arc::new(EventHandler::new(cascade.clone(), materializer.clone()));
        let consumer = Arc::new(StreamConsumer::new(
            store.clone(),
            handler,
            config.tables.clone(),
            config.stream.clone(),
            retry.clone(),
        ));
        let sweeper = Arc::new(OrphanSweeper::new(
            store.clone(),
            blobs.clone(),
            writer.clone(),
            config.blob.clone(),
            config.sweep.grace_period(),
            retry,
        ));

        Self {
            store,
            blobs,
            writer,
            resolver,
            cascade,
            materializer,
            ingest,
            consumer,
            sweeper,
        }
    }
}
