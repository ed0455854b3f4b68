//! Bulk ingest endpoint.

use super::common::parse_id;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use arbor_core::{EntityKind, Payload, PayloadIndex};
use arbor_pipeline::{BulkEntry, BulkRequest, BulkResult};
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use std::time::Instant;

/// Largest number of entries accepted in one request.
pub const MAX_BULK_ENTRIES: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct BulkIngestRequest {
    pub workspace_id: String,
    pub path_name: String,
    pub component_name: String,
    /// Repeating a request with the same id rewrites the same rows.
    #[serde(default)]
    pub request_id: Option<String>,
    pub entries: Vec<BulkEntryBody>,
}

/// One entry: exactly one of `json` (stored as its serialized bytes) or
/// `base64` (opaque bytes), plus an optional precomputed index.
#[derive(Debug, Deserialize)]
pub struct BulkEntryBody {
    #[serde(default)]
    pub json: Option<serde_json::Value>,
    #[serde(default)]
    pub base64: Option<String>,
    #[serde(default)]
    pub index: Option<PayloadIndex>,
}

impl BulkEntryBody {
    fn into_entry(self, position: usize) -> ApiResult<BulkEntry> {
        let payload = match (self.json, self.base64) {
            (Some(value), None) => serde_json::to_vec(&value)
                .map(Payload::from)
                .map_err(|e| ApiError::BadRequest(format!("entry {position}: {e}")))?,
            (None, Some(encoded)) => BASE64
                .decode(encoded.as_bytes())
                .map(Payload::from)
                .map_err(|e| ApiError::BadRequest(format!("entry {position}: invalid base64: {e}")))?,
            _ => {
                return Err(ApiError::BadRequest(format!(
                    "entry {position}: exactly one of json or base64 is required"
                )));
            }
        };
        Ok(BulkEntry {
            payload,
            index: self.index,
        })
    }
}

/// POST /v1/bulk - Write many payloads into one component.
///
/// The path and component are created on first use. Entries are written in
/// order and the request stops at the first failure.
pub async fn post_bulk(
    State(state): State<AppState>,
    Json(req): Json<BulkIngestRequest>,
) -> ApiResult<(StatusCode, Json<BulkResult>)> {
    let start = Instant::now();
    let result = ingest(&state, req).await;
    metrics::BULK_DURATION.observe(start.elapsed().as_secs_f64());

    match result {
        Ok(result) => {
            metrics::BULK_REQUESTS.with_label_values(&["ok"]).inc();
            metrics::BULK_ENTRIES.inc_by(result.data_ids.len() as u64);
            let status = if result.path_created || result.component_created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            Ok((status, Json(result)))
        }
        Err(e) => {
            metrics::BULK_REQUESTS.with_label_values(&["error"]).inc();
            Err(e)
        }
    }
}

async fn ingest(state: &AppState, req: BulkIngestRequest) -> ApiResult<BulkResult> {
    if req.entries.len() > MAX_BULK_ENTRIES {
        return Err(ApiError::BadRequest(format!(
            "too many entries: {} (max {MAX_BULK_ENTRIES})",
            req.entries.len()
        )));
    }
    let workspace_id = parse_id(&req.workspace_id, EntityKind::Workspace)?;
    let entries = req
        .entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| entry.into_entry(i))
        .collect::<ApiResult<Vec<_>>>()?;

    let request = BulkRequest {
        workspace_id,
        path_name: req.path_name,
        component_name: req.component_name,
        request_id: req.request_id,
        entries,
    };
    Ok(state.pipeline.ingest.ingest(request).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: serde_json::Value) -> BulkEntryBody {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_json_entry_is_serialized() {
        let entry = body(json!({"json": {"a": 1}})).into_entry(0).unwrap();
        assert_eq!(entry.payload.as_bytes().as_ref(), br#"{"a":1}"#);
        assert!(entry.index.is_none());
    }

    #[test]
    fn test_base64_entry_is_decoded() {
        let entry = body(json!({"base64": "AP8Q"})).into_entry(0).unwrap();
        assert_eq!(entry.payload.as_bytes().as_ref(), &[0x00, 0xff, 0x10]);
    }

    #[test]
    fn test_entry_needs_exactly_one_payload() {
        assert!(body(json!({})).into_entry(3).is_err());
        let both = body(json!({"json": 1, "base64": "AA=="})).into_entry(4);
        assert!(matches!(both, Err(ApiError::BadRequest(msg)) if msg.starts_with("entry 4")));
    }

    #[test]
    fn test_invalid_base64_rejected() {
        assert!(matches!(
            body(json!({"base64": "%%%"})).into_entry(0),
            Err(ApiError::BadRequest(_))
        ));
    }
}
