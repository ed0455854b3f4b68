//! Health and maintenance endpoints.

use crate::error::ApiResult;
use crate::metrics;
use crate::state::AppState;
use arbor_pipeline::SweepReport;
use axum::Json;
use axum::extract::State;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub blob_backend: &'static str,
}

/// GET /v1/health - Liveness and dependency check.
///
/// Fails when either the document store or the blob store is unreachable.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.pipeline.store.health_check().await?;
    state.pipeline.blobs.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        blob_backend: state.pipeline.blobs.backend_name(),
    }))
}

/// POST /v1/admin/sweep - Run one orphan sweep pass and return its report.
pub async fn run_sweep(State(state): State<AppState>) -> ApiResult<Json<SweepReport>> {
    let result = state.pipeline.sweeper.run(&CancellationToken::new()).await;
    record_sweep(&result);
    Ok(Json(result?))
}

/// Count a sweep run in the daemon metrics.
pub fn record_sweep<E>(result: &Result<SweepReport, E>) {
    match result {
        Ok(report) => {
            metrics::SWEEP_RUNS.with_label_values(&["ok"]).inc();
            metrics::SWEEP_BLOBS_DELETED.inc_by(report.deleted);
        }
        Err(_) => metrics::SWEEP_RUNS.with_label_values(&["error"]).inc(),
    }
}
