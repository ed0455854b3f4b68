//! Data payloads, their inline index, and blob placement.

use crate::entity::EntityId;
use crate::hash::ContentHash;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque payload bytes of a Data record.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload(Bytes);

impl Payload {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn len(&self) -> u64 {
        self.0.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn digest(&self) -> ContentHash {
        ContentHash::compute(&self.0)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Self(b)
    }
}

/// JSON type of a top-level payload field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl FieldKind {
    fn of(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(_) => Self::Bool,
            serde_json::Value::Number(_) => Self::Number,
            serde_json::Value::String(_) => Self::String,
            serde_json::Value::Array(_) => Self::Array,
            serde_json::Value::Object(_) => Self::Object,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldEntry {
    pub name: String,
    pub kind: FieldKind,
}

/// Lightweight index kept inline on every Data row (`data_map`).
///
/// Always derived from the canonical payload: the digest and size identify
/// the payload exactly, and `fields` lists top-level keys when the payload is
/// a JSON object (empty otherwise).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadIndex {
    pub digest: ContentHash,
    pub size: u64,
    #[serde(default)]
    pub fields: Vec<FieldEntry>,
}

impl PayloadIndex {
    /// Derive the index from a payload.
    pub fn derive(payload: &Payload) -> Self {
        let fields = match serde_json::from_slice::<serde_json::Value>(payload.as_bytes()) {
            Ok(serde_json::Value::Object(map)) => map
                .iter()
                .map(|(name, value)| FieldEntry {
                    name: name.clone(),
                    kind: FieldKind::of(value),
                })
                .collect(),
            _ => Vec::new(),
        };
        Self {
            digest: payload.digest(),
            size: payload.len(),
            fields,
        }
    }

    /// Check that this index describes `payload`.
    pub fn verify(&self, payload: &Payload) -> crate::Result<()> {
        let actual = payload.digest();
        if actual != self.digest || payload.len() != self.size {
            return Err(crate::Error::IndexMismatch {
                expected: self.digest.to_hex(),
                actual: actual.to_hex(),
            });
        }
        Ok(())
    }

    /// Encode as the JSON string stored in `data_map`.
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    pub fn from_json(s: &str) -> crate::Result<Self> {
        serde_json::from_str(s).map_err(|e| crate::Error::Serialization(e.to_string()))
    }
}

/// Where a payload physically lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    Inline,
    Offloaded,
}

impl Placement {
    /// Payloads strictly larger than the threshold are offloaded.
    pub fn for_size(size: u64, inline_threshold: u64) -> Self {
        if size > inline_threshold {
            Self::Offloaded
        } else {
            Self::Inline
        }
    }
}

/// An `s3://bucket/key` reference stored in `s3_location`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BlobLocation {
    pub bucket: String,
    pub key: String,
}

impl BlobLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        let rest = s
            .strip_prefix("s3://")
            .ok_or_else(|| crate::Error::InvalidLocation(format!("missing s3:// scheme: {s}")))?;
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| crate::Error::InvalidLocation(format!("missing key: {s}")))?;
        if bucket.is_empty() || key.is_empty() {
            return Err(crate::Error::InvalidLocation(format!(
                "empty bucket or key: {s}"
            )));
        }
        Ok(Self::new(bucket, key))
    }
}

impl fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

impl fmt::Debug for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobLocation({self})")
    }
}

/// Deterministic blob key for a Data row: `{prefix}/{shard}/{data_id}`.
///
/// `shard` is the first two hex digits of `sha256(data_id)`, which spreads
/// keys across listing prefixes.
pub fn blob_key(key_prefix: &str, data_id: &EntityId) -> String {
    let shard = &ContentHash::compute(data_id.as_str().as_bytes()).to_hex()[..2];
    format!("{}/{}/{}", key_prefix.trim_matches('/'), shard, data_id)
}

/// Recover the Data row id from a key produced by [`blob_key`].
pub fn data_id_from_key(key_prefix: &str, key: &str) -> Option<EntityId> {
    let rest = key.strip_prefix(key_prefix.trim_matches('/'))?.strip_prefix('/')?;
    let (_, id) = rest.split_once('/')?;
    let id = EntityId::parse(id).ok()?;
    (blob_key(key_prefix, &id) == key).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_lists_top_level_json_fields() {
        let payload = Payload::new(&br#"{"temp": 21.5, "tags": ["a"], "ok": true}"#[..]);
        let index = PayloadIndex::derive(&payload);
        assert_eq!(index.size, payload.len());
        let names: Vec<_> = index.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["ok", "tags", "temp"]);
        assert_eq!(index.fields[1].kind, FieldKind::Array);
        assert!(index.verify(&payload).is_ok());
    }

    #[test]
    fn index_of_opaque_bytes_has_no_fields() {
        let payload = Payload::new(vec![0xff, 0x00, 0x13]);
        let index = PayloadIndex::derive(&payload);
        assert!(index.fields.is_empty());
        assert_eq!(index.size, 3);
    }

    #[test]
    fn verify_detects_divergence() {
        let index = PayloadIndex::derive(&Payload::new(&b"one"[..]));
        let err = index.verify(&Payload::new(&b"two"[..])).unwrap_err();
        assert!(matches!(err, crate::Error::IndexMismatch { .. }));
    }

    #[test]
    fn placement_threshold_is_inclusive() {
        assert_eq!(Placement::for_size(4096, 4096), Placement::Inline);
        assert_eq!(Placement::for_size(4097, 4096), Placement::Offloaded);
        assert_eq!(Placement::for_size(0, 4096), Placement::Inline);
    }

    #[test]
    fn location_parse_and_display() {
        let loc = BlobLocation::parse("s3://arbor-data/data/ab/data-1").unwrap();
        assert_eq!(loc.bucket, "arbor-data");
        assert_eq!(loc.key, "data/ab/data-1");
        assert_eq!(loc.to_string(), "s3://arbor-data/data/ab/data-1");
        assert!(BlobLocation::parse("https://x/y").is_err());
        assert!(BlobLocation::parse("s3://bucket-only").is_err());
    }

    #[test]
    fn blob_key_is_deterministic_and_reversible() {
        let id = EntityId::parse("data-42").unwrap();
        let key = blob_key("data/", &id);
        assert_eq!(key, blob_key("data", &id));
        assert!(key.starts_with("data/"));
        assert!(key.ends_with("/data-42"));
        assert_eq!(key.split('/').nth(1).unwrap().len(), 2);
        assert_eq!(data_id_from_key("data", &key), Some(id));
        assert_eq!(data_id_from_key("data", "data/zz/data-42"), None);
        assert_eq!(data_id_from_key("other", &key), None);
    }
}
