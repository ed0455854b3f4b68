//! Prometheus metrics for the Arbor daemon.
//!
//! The process-wide [`REGISTRY`] holds the daemon's own request and sweep
//! metrics plus every pipeline metric (see `arbor_pipeline::metrics`).
//!
//! The `/metrics` endpoint is unauthenticated. It exposes aggregate counts
//! only, but should still be network-restricted to the Prometheus scraper.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static BULK_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "arbor_bulk_requests_total",
            "Bulk ingest requests by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static BULK_ENTRIES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "arbor_bulk_entries_total",
        "Data entries written through bulk ingest",
    )
    .expect("metric creation failed")
});

pub static BULK_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "arbor_bulk_duration_seconds",
            "Time taken to serve a bulk ingest request",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .expect("metric creation failed")
});

pub static WORKSPACES_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "arbor_workspaces_deleted_total",
        "Workspace rows deleted through the API",
    )
    .expect("metric creation failed")
});

pub static SWEEP_RUNS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("arbor_sweep_runs_total", "Orphan sweep runs by outcome"),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static SWEEP_BLOBS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "arbor_sweep_blobs_deleted_total",
        "Orphan blobs deleted by the sweep",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Safe to call more than once; only the first call registers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(BULK_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BULK_ENTRIES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BULK_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(WORKSPACES_DELETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SWEEP_RUNS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SWEEP_BLOBS_DELETED.clone()))
            .expect("metric registration failed");
    });
    arbor_pipeline::metrics::register(&REGISTRY);
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}
