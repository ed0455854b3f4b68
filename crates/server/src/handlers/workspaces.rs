//! Workspace endpoints: the entry point for cascade deletes.

use super::common::parse_id;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use arbor_core::{EntityKind, EntityRef, WorkspaceRecord};
use arbor_metadata::repos::WorkspaceRepo;
use arbor_pipeline::{CascadeReport, DeleteOutcome};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct WorkspaceResponse {
    pub id: String,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<WorkspaceRecord> for WorkspaceResponse {
    fn from(record: WorkspaceRecord) -> Self {
        Self {
            id: record.id.to_string(),
            name: record.name,
            created_at: record.created_at,
        }
    }
}

/// POST /v1/workspaces
pub async fn create_workspace(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> ApiResult<(StatusCode, Json<WorkspaceResponse>)> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("workspace name cannot be empty".to_string()));
    }
    let record = WorkspaceRecord::new(req.name);
    state.pipeline.store.create_workspace(&record).await?;
    tracing::info!(workspace_id = %record.id, "Workspace created");
    Ok((StatusCode::CREATED, Json(record.into())))
}

/// GET /v1/workspaces/{id}
pub async fn get_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkspaceResponse>> {
    let id = parse_id(&id, EntityKind::Workspace)?;
    let record = state
        .pipeline
        .store
        .get_workspace(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("workspace {id}")))?;
    Ok(Json(record.into()))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteWorkspaceQuery {
    /// Run the cascade before responding instead of leaving it to the
    /// stream consumers.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize)]
pub struct DeleteAccepted {
    pub id: String,
    pub status: &'static str,
}

/// DELETE /v1/workspaces/{id}
///
/// Deletes the workspace row. Its descendants are removed by the cascade
/// that the row's REMOVE event triggers; with `?wait=true` the cascade runs
/// inline and its report is returned.
pub async fn delete_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DeleteWorkspaceQuery>,
) -> ApiResult<Response> {
    let id = parse_id(&id, EntityKind::Workspace)?;
    match state
        .pipeline
        .writer
        .delete_row(EntityKind::Workspace, &id)
        .await?
    {
        DeleteOutcome::Deleted => metrics::WORKSPACES_DELETED.inc(),
        DeleteOutcome::AlreadyAbsent => {
            return Err(ApiError::NotFound(format!("workspace {id}")));
        }
    }
    tracing::info!(workspace_id = %id, wait = query.wait, "Workspace deleted");

    if !query.wait {
        let body = DeleteAccepted {
            id: id.to_string(),
            status: "accepted",
        };
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    let report: CascadeReport = state
        .pipeline
        .cascade
        .run(EntityRef::new(EntityKind::Workspace, id))
        .await
        .into_result()?;
    Ok((StatusCode::OK, Json(report)).into_response())
}
