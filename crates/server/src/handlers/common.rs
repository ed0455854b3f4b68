//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use arbor_core::{EntityId, EntityKind};

/// Parse an id taken from the request path, checking that it names an
/// entity of `kind`.
pub fn parse_id(raw: &str, kind: EntityKind) -> ApiResult<EntityId> {
    let id = EntityId::parse(raw)?;
    if !id.as_str().starts_with(&format!("{}-", kind.id_prefix())) {
        return Err(ApiError::BadRequest(format!("{raw} is not a {kind} id")));
    }
    Ok(id)
}
