//! Stream consumer loop and event dispatch.
//!
//! One loop runs per consumed table and shard. A loop reads the batch after
//! its checkpoint, handles the events in order, and only then advances the
//! checkpoint. A failed or timed-out batch is redelivered from the same
//! checkpoint, so every handler must tolerate seeing an event twice.

use crate::cascade::{CascadeEngine, CascadeReport};
use crate::decode::{ChangeEvent, decode_batch};
use crate::error::{PipelineError, PipelineResult};
use crate::materialize::{DataEventOutcome, Materializer};
use crate::metrics;
use crate::retry::RetryPolicy;
use arbor_core::config::{StreamConfig, TablesConfig};
use arbor_core::{EntityKind, EntityRef, EventName, RawChangeRecord};
use arbor_metadata::{MetadataStore, StreamPosition};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What handling one event amounted to.
#[derive(Debug)]
pub enum HandledEvent {
    Cascade(CascadeReport),
    Data(DataEventOutcome),
    Ignored,
}

/// Routes decoded events to the engine responsible for them.
pub struct EventHandler {
    cascade: Arc<CascadeEngine>,
    materializer: Arc<Materializer>,
}

impl EventHandler {
    pub fn new(cascade: Arc<CascadeEngine>, materializer: Arc<Materializer>) -> Self {
        Self {
            cascade,
            materializer,
        }
    }

    /// Removals of Workspace, Path or Component rows start a cascade; every
    /// Data change goes to the materializer. An incomplete cascade is an
    /// error so that the batch is redelivered.
    pub async fn handle(&self, event: &ChangeEvent) -> PipelineResult<HandledEvent> {
        match (event.entity_kind, event.event_kind) {
            (EntityKind::Data, _) => Ok(HandledEvent::Data(
                self.materializer.on_data_event(event).await?,
            )),
            (kind, EventName::Remove) => {
                let report = self
                    .cascade
                    .run(EntityRef::new(kind, event.id.clone()))
                    .await;
                Ok(HandledEvent::Cascade(report.into_result()?))
            }
            _ => Ok(HandledEvent::Ignored),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub records: usize,
    pub handled: usize,
    pub decode_errors: usize,
    pub last_sequence: Option<u64>,
}

enum Step {
    Idle,
    Processed(BatchOutcome),
    Failed {
        last_sequence: u64,
        error: PipelineError,
    },
}

pub struct StreamConsumer {
    store: Arc<dyn MetadataStore>,
    handler: Arc<EventHandler>,
    tables: TablesConfig,
    config: StreamConfig,
    backoff: RetryPolicy,
}

impl StreamConsumer {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        handler: Arc<EventHandler>,
        tables: TablesConfig,
        config: StreamConfig,
        backoff: RetryPolicy,
    ) -> Self {
        Self {
            store,
            handler,
            tables,
            config,
            backoff,
        }
    }

    /// Every (table, shard) pair this consumer reads.
    pub fn positions(&self) -> Vec<StreamPosition> {
        let shards = self.store.shard_count();
        self.config
            .tables
            .iter()
            .flat_map(|&kind| (0..shards).map(move |shard| StreamPosition { kind, shard }))
            .collect()
    }

    /// Decode and handle one batch, in order.
    ///
    /// Malformed records are logged and skipped. The first handler failure
    /// aborts the batch.
    pub async fn process_batch(&self, records: &[RawChangeRecord]) -> PipelineResult<BatchOutcome> {
        let mut outcome = BatchOutcome {
            records: records.len(),
            last_sequence: records.last().map(|r| r.sequence),
            ..BatchOutcome::default()
        };

        for result in decode_batch(records, &self.tables) {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    metrics::DECODE_ERRORS.inc();
                    tracing::warn!(
                        event_id = %e.event_id,
                        sequence = e.sequence,
                        reason = %e.reason,
                        "Skipping undecodable change record"
                    );
                    outcome.decode_errors += 1;
                    continue;
                }
            };
            metrics::EVENTS_DECODED
                .with_label_values(&[event.entity_kind.as_str(), event.event_kind.as_str()])
                .inc();

            match self.handler.handle(&event).await {
                Ok(_) => outcome.handled += 1,
                Err(e) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        kind = %event.entity_kind,
                        id = %event.id,
                        error = %e,
                        "Event handling failed"
                    );
                    return Err(e);
                }
            }
        }
        Ok(outcome)
    }

    async fn process_with_budget(&self, records: &[RawChangeRecord]) -> PipelineResult<BatchOutcome> {
        let budget = self.config.invocation_timeout();
        tokio::time::timeout(budget, self.process_batch(records))
            .await
            .map_err(|_| PipelineError::Timeout(budget))?
    }

    async fn step(&self, position: StreamPosition) -> PipelineResult<Step> {
        let after = self.store.load_checkpoint(position).await?;
        let records = self
            .store
            .read_changes(position, after, self.config.batch_size)
            .await?;
        let Some(last_sequence) = records.last().map(|r| r.sequence) else {
            return Ok(Step::Idle);
        };

        match self.process_with_budget(&records).await {
            Ok(outcome) => {
                self.store.save_checkpoint(position, last_sequence).await?;
                Ok(Step::Processed(outcome))
            }
            Err(error) => Ok(Step::Failed {
                last_sequence,
                error,
            }),
        }
    }

    /// Process the next batch of a shard, if any, and checkpoint it.
    pub async fn poll_once(&self, position: StreamPosition) -> PipelineResult<Option<BatchOutcome>> {
        match self.step(position).await? {
            Step::Idle => Ok(None),
            Step::Processed(outcome) => Ok(Some(outcome)),
            Step::Failed { error, .. } => Err(error),
        }
    }

    /// Process batches until the shard has nothing left. Returns the number
    /// of batches handled.
    pub async fn drain(&self, position: StreamPosition) -> PipelineResult<usize> {
        let mut batches = 0;
        while self.poll_once(position).await?.is_some() {
            batches += 1;
        }
        Ok(batches)
    }

    /// Drain every position once.
    pub async fn drain_all(&self) -> PipelineResult<usize> {
        let mut batches = 0;
        for position in self.positions() {
            batches += self.drain(position).await?;
        }
        Ok(batches)
    }

    /// Long-running loop for one shard. Returns when `cancel` fires.
    #[tracing::instrument(skip(self, cancel), fields(position = %position))]
    pub async fn run_shard(&self, position: StreamPosition, cancel: CancellationToken) {
        metrics::ACTIVE_CONSUMERS.inc();
        tracing::info!("Shard consumer started");
        let mut attempts: u32 = 0;

        while !cancel.is_cancelled() {
            let pause = match self.step(position).await {
                Ok(Step::Processed(outcome)) => {
                    attempts = 0;
                    tracing::debug!(
                        records = outcome.records,
                        handled = outcome.handled,
                        decode_errors = outcome.decode_errors,
                        "Batch processed"
                    );
                    None
                }
                Ok(Step::Idle) => Some(self.config.poll_interval()),
                Ok(Step::Failed {
                    last_sequence,
                    error,
                }) => {
                    attempts += 1;
                    match self
                        .on_failed_batch(position, attempts, last_sequence, &error)
                        .await
                    {
                        Ok(true) => {
                            attempts = 0;
                            None
                        }
                        Ok(false) => Some(self.backoff.delay_for(attempts)),
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to skip batch");
                            Some(self.backoff.delay_for(attempts))
                        }
                    }
                }
                Err(e) => {
                    attempts += 1;
                    tracing::warn!(error = %e, attempts, "Failed to read shard");
                    Some(self.backoff.delay_for(attempts))
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        metrics::ACTIVE_CONSUMERS.dec();
        tracing::info!("Shard consumer stopped");
    }

    /// Returns whether the batch was abandoned (checkpoint moved past it).
    async fn on_failed_batch(
        &self,
        position: StreamPosition,
        attempts: u32,
        last_sequence: u64,
        error: &PipelineError,
    ) -> PipelineResult<bool> {
        let limit = self.config.max_batch_attempts;
        if limit > 0 && attempts >= limit {
            metrics::BATCHES_ABANDONED.inc();
            tracing::error!(
                attempts,
                last_sequence,
                error = %error,
                "Batch failed too often, skipping it"
            );
            self.store.save_checkpoint(position, last_sequence).await?;
            return Ok(true);
        }
        metrics::BATCH_REDELIVERIES.inc();
        tracing::warn!(attempts, error = %error, "Batch failed, redelivering");
        Ok(false)
    }

    /// Spawn one loop per position.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        self.positions()
            .into_iter()
            .map(|position| {
                let consumer = Arc::clone(&self);
                let cancel = cancel.clone();
                tokio::spawn(async move { consumer.run_shard(position, cancel).await })
            })
            .collect()
    }
}
