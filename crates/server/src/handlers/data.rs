//! Data payload endpoints.

use super::common::parse_id;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use arbor_core::EntityKind;
use arbor_pipeline::PipelineError;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;

/// GET /v1/data/{id} - Canonical payload bytes, inline or from the blob.
pub async fn get_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, EntityKind::Data)?;
    let payload = state
        .pipeline
        .materializer
        .read(&id)
        .await
        .map_err(|e| match e {
            // A stored payload that fails its own index is corrupt, not a bad request.
            PipelineError::Domain(e) => ApiError::Internal(format!("data {id}: {e}")),
            other => other.into(),
        })?;
    let digest = payload.digest().to_hex();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::ETAG, format!("\"{digest}\"")),
        ],
        payload.into_bytes(),
    ))
}

/// DELETE /v1/data/{id} - Delete one row and its blob. Idempotent.
pub async fn delete_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id, EntityKind::Data)?;
    state.pipeline.materializer.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
