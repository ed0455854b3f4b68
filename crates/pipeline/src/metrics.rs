//! Prometheus metrics for the pipeline.
//!
//! The statics are process-wide; [`register`] adds them to a registry once.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::{LazyLock, Once};

pub static EVENTS_DECODED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "arbor_stream_events_decoded_total",
            "Change events decoded by table and event name",
        ),
        &["table", "event"],
    )
    .expect("metric creation failed")
});

pub static DECODE_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "arbor_stream_decode_errors_total",
        "Change records skipped because they could not be decoded",
    )
    .expect("metric creation failed")
});

pub static BATCH_REDELIVERIES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "arbor_stream_batch_redeliveries_total",
        "Batches redelivered after a failed invocation",
    )
    .expect("metric creation failed")
});

pub static BATCHES_ABANDONED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "arbor_stream_batches_abandoned_total",
        "Batches skipped after reaching the attempt limit",
    )
    .expect("metric creation failed")
});

pub static ACTIVE_CONSUMERS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "arbor_stream_active_consumers",
        "Shard consumer loops currently running",
    )
    .expect("metric creation failed")
});

pub static CASCADES_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "arbor_cascades_completed_total",
        "Cascades that removed every descendant",
    )
    .expect("metric creation failed")
});

pub static CASCADES_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "arbor_cascades_failed_total",
        "Cascades that left descendants behind",
    )
    .expect("metric creation failed")
});

pub static ROWS_DELETED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("arbor_rows_deleted_total", "Rows deleted by entity kind"),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static INCONSISTENCIES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "arbor_delete_inconsistencies_total",
        "Data deletes where the row and blob outcomes disagreed",
    )
    .expect("metric creation failed")
});

pub static BLOBS_WRITTEN: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("arbor_blobs_written_total", "Payload blobs written")
        .expect("metric creation failed")
});

pub static BLOBS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("arbor_blobs_deleted_total", "Payload blobs deleted")
        .expect("metric creation failed")
});

pub static INLINE_WRITES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "arbor_data_inline_writes_total",
        "Data payloads stored inline in the row",
    )
    .expect("metric creation failed")
});

pub static OFFLOADED_WRITES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "arbor_data_offloaded_writes_total",
        "Data payloads offloaded to the blob store",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all pipeline metrics with `registry`.
///
/// Idempotent: only the first call registers.
pub fn register(registry: &Registry) {
    REGISTER_ONCE.call_once(|| {
        registry
            .register(Box::new(EVENTS_DECODED.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(DECODE_ERRORS.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(BATCH_REDELIVERIES.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(BATCHES_ABANDONED.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(ACTIVE_CONSUMERS.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(CASCADES_COMPLETED.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(CASCADES_FAILED.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(ROWS_DELETED.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(INCONSISTENCIES.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(BLOBS_WRITTEN.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(BLOBS_DELETED.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(INLINE_WRITES.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(OFFLOADED_WRITES.clone()))
            .expect("metric registration failed");
    });
}
