//! Stream event decoder: raw change records to typed events.
//!
//! Each record is decoded on its own. A malformed record yields a
//! [`DecodeError`] in its slot and never aborts the rest of the batch.

use arbor_core::attribute::{AttributeMap, decode_record, get_id};
use arbor_core::config::TablesConfig;
use arbor_core::{EntityId, EntityKind, EventName, RawChangeRecord, Record};
use thiserror::Error;

/// A decoded change to one row.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub event_id: String,
    pub sequence: u64,
    pub entity_kind: EntityKind,
    pub event_kind: EventName,
    pub id: EntityId,
    /// Row state before the change (`modify` and `remove`).
    pub before: Option<Record>,
    /// Row state after the change (`insert` and `modify`).
    pub after: Option<Record>,
}

/// Why a single record could not be decoded.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("record {event_id} (sequence {sequence}): {reason}")]
pub struct DecodeError {
    pub event_id: String,
    pub sequence: u64,
    pub reason: String,
}

impl DecodeError {
    fn new(raw: &RawChangeRecord, reason: impl Into<String>) -> Self {
        Self {
            event_id: raw.event_id.clone(),
            sequence: raw.sequence,
            reason: reason.into(),
        }
    }
}

/// Decode a batch, preserving order. One result per input record.
pub fn decode_batch(
    records: &[RawChangeRecord],
    tables: &TablesConfig,
) -> Vec<Result<ChangeEvent, DecodeError>> {
    records.iter().map(|raw| decode_one(raw, tables)).collect()
}

/// Decode a single raw change record.
pub fn decode_one(raw: &RawChangeRecord, tables: &TablesConfig) -> Result<ChangeEvent, DecodeError> {
    let entity_kind = tables
        .kind_of(&raw.table)
        .ok_or_else(|| DecodeError::new(raw, format!("unknown table '{}'", raw.table)))?;
    let event_kind = EventName::parse(&raw.event_name)
        .ok_or_else(|| DecodeError::new(raw, format!("unknown event name '{}'", raw.event_name)))?;

    let keys = attribute_map(raw, "keys", &raw.keys)?;
    let id = get_id(&keys, "id").map_err(|e| DecodeError::new(raw, format!("keys: {e}")))?;

    let before = image(raw, entity_kind, "old_image", raw.old_image.as_ref())?;
    let after = image(raw, entity_kind, "new_image", raw.new_image.as_ref())?;

    match event_kind {
        EventName::Insert | EventName::Modify if after.is_none() => {
            return Err(DecodeError::new(raw, "missing new_image"));
        }
        EventName::Remove if before.is_none() => {
            return Err(DecodeError::new(raw, "missing old_image"));
        }
        _ => {}
    }

    for record in before.iter().chain(after.iter()) {
        if record.id() != &id {
            return Err(DecodeError::new(
                raw,
                format!("image id {} does not match key {id}", record.id()),
            ));
        }
    }

    Ok(ChangeEvent {
        event_id: raw.event_id.clone(),
        sequence: raw.sequence,
        entity_kind,
        event_kind,
        id,
        // Images that do not belong to the event are dropped.
        before: if event_kind == EventName::Insert { None } else { before },
        after: if event_kind == EventName::Remove { None } else { after },
    })
}

fn attribute_map(
    raw: &RawChangeRecord,
    field: &str,
    value: &serde_json::Value,
) -> Result<AttributeMap, DecodeError> {
    serde_json::from_value(value.clone())
        .map_err(|e| DecodeError::new(raw, format!("{field}: unparsable attributes: {e}")))
}

fn image(
    raw: &RawChangeRecord,
    kind: EntityKind,
    field: &str,
    value: Option<&serde_json::Value>,
) -> Result<Option<Record>, DecodeError> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let map = attribute_map(raw, field, value)?;
    decode_record(kind, &map)
        .map(Some)
        .map_err(|e| DecodeError::new(raw, format!("{field}: {e}")))
}
