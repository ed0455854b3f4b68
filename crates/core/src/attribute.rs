//! Typed attribute encoding used by change-record images.
//!
//! Values are tagged the way DynamoDB streams tag them: `{"S": "..."}`,
//! `{"N": "12"}`, `{"B": "<base64>"}`, `{"BOOL": true}`, `{"NULL": true}`,
//! `{"M": {...}}` and `{"L": [...]}`. Numbers and binaries stay in their
//! textual form until a field is read, so a malformed value only fails the
//! record that carries it.

use crate::entity::{EntityId, EntityKind};
use crate::payload::{BlobLocation, Payload, PayloadIndex};
use crate::record::{ComponentRecord, DataRecord, PathRecord, Record, WorkspaceRecord};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub type AttributeMap = BTreeMap<String, AttributeValue>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    S(String),
    #[serde(rename = "N")]
    N(String),
    #[serde(rename = "B")]
    B(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "M")]
    M(AttributeMap),
    #[serde(rename = "L")]
    L(Vec<AttributeValue>),
}

impl AttributeValue {
    pub fn string(s: impl Into<String>) -> Self {
        Self::S(s.into())
    }

    pub fn binary(bytes: &[u8]) -> Self {
        Self::B(STANDARD.encode(bytes))
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::S(_) => "S",
            Self::N(_) => "N",
            Self::B(_) => "B",
            Self::Bool(_) => "BOOL",
            Self::Null(_) => "NULL",
            Self::M(_) => "M",
            Self::L(_) => "L",
        }
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> crate::Error {
    crate::Error::InvalidAttribute {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Read a required string attribute.
pub fn get_str<'a>(map: &'a AttributeMap, name: &str) -> crate::Result<&'a str> {
    get_opt_str(map, name)?.ok_or_else(|| crate::Error::MissingAttribute(name.to_string()))
}

/// Read an optional string attribute. `NULL` counts as absent.
pub fn get_opt_str<'a>(map: &'a AttributeMap, name: &str) -> crate::Result<Option<&'a str>> {
    match map.get(name) {
        None | Some(AttributeValue::Null(_)) => Ok(None),
        Some(AttributeValue::S(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(invalid(name, format!("expected S, got {}", other.type_name()))),
    }
}

/// Read an optional binary attribute. `NULL` counts as absent.
pub fn get_opt_binary(map: &AttributeMap, name: &str) -> crate::Result<Option<Vec<u8>>> {
    match map.get(name) {
        None | Some(AttributeValue::Null(_)) => Ok(None),
        Some(AttributeValue::B(b64)) => STANDARD
            .decode(b64)
            .map(Some)
            .map_err(|e| invalid(name, e.to_string())),
        Some(other) => Err(invalid(name, format!("expected B, got {}", other.type_name()))),
    }
}

pub fn get_id(map: &AttributeMap, name: &str) -> crate::Result<EntityId> {
    EntityId::parse(get_str(map, name)?).map_err(|e| invalid(name, e.to_string()))
}

fn get_time(map: &AttributeMap, name: &str) -> crate::Result<OffsetDateTime> {
    OffsetDateTime::parse(get_str(map, name)?, &Rfc3339).map_err(|e| invalid(name, e.to_string()))
}

fn format_time(t: &OffsetDateTime) -> AttributeValue {
    // Rfc3339 formatting only fails for years outside 0..=9999.
    AttributeValue::S(t.format(&Rfc3339).unwrap_or_default())
}

/// Key attributes of a row (`{"id": {"S": ...}}`).
pub fn encode_keys(id: &EntityId) -> AttributeMap {
    BTreeMap::from([("id".to_string(), AttributeValue::string(id.as_str()))])
}

/// Full image of a row as it appears in a change record.
pub fn encode_record(record: &Record) -> crate::Result<AttributeMap> {
    let mut map = AttributeMap::new();
    let mut put = |name: &str, value: AttributeValue| {
        map.insert(name.to_string(), value);
    };
    match record {
        Record::Workspace(r) => {
            put("id", AttributeValue::string(r.id.as_str()));
            put("name", AttributeValue::string(&r.name));
            put("created_at", format_time(&r.created_at));
            put("updated_at", format_time(&r.updated_at));
        }
        Record::Path(r) => {
            put("id", AttributeValue::string(r.id.as_str()));
            put("workspace_id", AttributeValue::string(r.workspace_id.as_str()));
            put("name", AttributeValue::string(&r.name));
            put("normalized_name", AttributeValue::string(&r.normalized_name));
            put("created_at", format_time(&r.created_at));
            put("updated_at", format_time(&r.updated_at));
        }
        Record::Component(r) => {
            put("id", AttributeValue::string(r.id.as_str()));
            put("workspace_id", AttributeValue::string(r.workspace_id.as_str()));
            put("path_id", AttributeValue::string(r.path_id.as_str()));
            put("name", AttributeValue::string(&r.name));
            put("created_at", format_time(&r.created_at));
            put("updated_at", format_time(&r.updated_at));
        }
        Record::Data(r) => {
            put("id", AttributeValue::string(r.id.as_str()));
            put("component_id", AttributeValue::string(r.component_id.as_str()));
            put("workspace_id", AttributeValue::string(r.workspace_id.as_str()));
            put(
                "data",
                match &r.data {
                    Some(payload) => AttributeValue::binary(payload.as_bytes()),
                    None => AttributeValue::Null(true),
                },
            );
            put("data_map", AttributeValue::S(r.data_map.to_json()?));
            put(
                "s3_location",
                match &r.s3_location {
                    Some(loc) => AttributeValue::S(loc.to_string()),
                    None => AttributeValue::Null(true),
                },
            );
            put("created_at", format_time(&r.created_at));
            put("updated_at", format_time(&r.updated_at));
        }
    }
    Ok(map)
}

/// Decode a row image of the given kind.
pub fn decode_record(kind: EntityKind, map: &AttributeMap) -> crate::Result<Record> {
    let record = match kind {
        EntityKind::Workspace => Record::Workspace(WorkspaceRecord {
            id: get_id(map, "id")?,
            name: get_str(map, "name")?.to_string(),
            created_at: get_time(map, "created_at")?,
            updated_at: get_time(map, "updated_at")?,
        }),
        EntityKind::Path => Record::Path(PathRecord {
            id: get_id(map, "id")?,
            workspace_id: get_id(map, "workspace_id")?,
            name: get_str(map, "name")?.to_string(),
            normalized_name: get_str(map, "normalized_name")?.to_string(),
            created_at: get_time(map, "created_at")?,
            updated_at: get_time(map, "updated_at")?,
        }),
        EntityKind::Component => Record::Component(ComponentRecord {
            id: get_id(map, "id")?,
            workspace_id: get_id(map, "workspace_id")?,
            path_id: get_id(map, "path_id")?,
            name: get_str(map, "name")?.to_string(),
            created_at: get_time(map, "created_at")?,
            updated_at: get_time(map, "updated_at")?,
        }),
        EntityKind::Data => {
            let data_map = PayloadIndex::from_json(get_str(map, "data_map")?)
                .map_err(|e| invalid("data_map", e.to_string()))?;
            let s3_location = get_opt_str(map, "s3_location")?
                .filter(|s| !s.is_empty())
                .map(BlobLocation::parse)
                .transpose()
                .map_err(|e| invalid("s3_location", e.to_string()))?;
            Record::Data(DataRecord {
                id: get_id(map, "id")?,
                component_id: get_id(map, "component_id")?,
                workspace_id: get_id(map, "workspace_id")?,
                data: get_opt_binary(map, "data")?.map(Payload::from),
                data_map,
                s3_location,
                created_at: get_time(map, "created_at")?,
                updated_at: get_time(map, "updated_at")?,
            })
        }
    };
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data() -> DataRecord {
        let payload = Payload::new(&br#"{"v":1}"#[..]);
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        DataRecord {
            id: EntityId::parse("data-1").unwrap(),
            component_id: EntityId::parse("comp-1").unwrap(),
            workspace_id: EntityId::parse("ws-1").unwrap(),
            data_map: PayloadIndex::derive(&payload),
            data: Some(payload),
            s3_location: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn wire_format_matches_stream_tags() {
        let json = r#"{"id":{"S":"ws-1"},"n":{"N":"3"},"flag":{"BOOL":true},"gone":{"NULL":true},"nested":{"M":{"x":{"L":[{"S":"a"}]}}}}"#;
        let map: AttributeMap = serde_json::from_str(json).unwrap();
        assert_eq!(get_str(&map, "id").unwrap(), "ws-1");
        assert_eq!(map.get("n"), Some(&AttributeValue::N("3".to_string())));
        assert_eq!(get_opt_str(&map, "gone").unwrap(), None);
        assert!(matches!(map.get("nested"), Some(AttributeValue::M(_))));
    }

    #[test]
    fn data_image_carries_payload_as_binary() {
        let record = Record::Data(sample_data());
        let image = encode_record(&record).unwrap();
        assert!(matches!(image.get("data"), Some(AttributeValue::B(_))));
        assert_eq!(image.get("s3_location"), Some(&AttributeValue::Null(true)));
        assert_eq!(decode_record(EntityKind::Data, &image).unwrap(), record);
    }

    #[test]
    fn offloaded_image_decodes_location() {
        let mut data = sample_data();
        data.data = None;
        data.s3_location = Some(BlobLocation::new("arbor-data", "data/ab/data-1"));
        let image = encode_record(&Record::Data(data.clone())).unwrap();
        let decoded = decode_record(EntityKind::Data, &image).unwrap();
        assert_eq!(decoded.as_data(), Some(&data));
    }

    #[test]
    fn decode_reports_missing_and_malformed_attributes() {
        let mut image = encode_record(&Record::Data(sample_data())).unwrap();
        image.insert("data".to_string(), AttributeValue::B("!!not base64".to_string()));
        assert!(matches!(
            decode_record(EntityKind::Data, &image),
            Err(crate::Error::InvalidAttribute { .. })
        ));

        image.remove("component_id");
        assert!(decode_record(EntityKind::Data, &image).is_err());

        let empty = AttributeMap::new();
        assert!(matches!(
            decode_record(EntityKind::Workspace, &empty),
            Err(crate::Error::MissingAttribute(_))
        ));
    }

    #[test]
    fn type_mismatch_is_invalid() {
        let map = BTreeMap::from([("id".to_string(), AttributeValue::N("7".to_string()))]);
        assert!(matches!(
            get_str(&map, "id"),
            Err(crate::Error::InvalidAttribute { .. })
        ));
    }
}
