//! Raw change-stream records as delivered to consumers.

use crate::attribute::{AttributeMap, encode_keys, encode_record};
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mutation kind carried by a change record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventName {
    Insert,
    Modify,
    Remove,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Modify => "MODIFY",
            Self::Remove => "REMOVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(Self::Insert),
            "MODIFY" => Some(Self::Modify),
            "REMOVE" => Some(Self::Remove),
            _ => None,
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One change record, still in wire form.
///
/// `keys` and the images are kept as untyped JSON so that a malformed record
/// can be rejected on its own without failing the batch it arrived in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawChangeRecord {
    /// Position in the shard, strictly increasing.
    pub sequence: u64,
    pub event_id: String,
    pub table: String,
    pub event_name: String,
    pub keys: serde_json::Value,
    #[serde(default)]
    pub old_image: Option<serde_json::Value>,
    #[serde(default)]
    pub new_image: Option<serde_json::Value>,
}

/// Keys and images of a mutation, before it is assigned a stream position.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeImages {
    pub keys: AttributeMap,
    pub old_image: Option<AttributeMap>,
    pub new_image: Option<AttributeMap>,
}

impl ChangeImages {
    /// Images for a mutation of `record` (the row's state after an insert or
    /// modify, before a remove).
    pub fn for_mutation(
        event: EventName,
        before: Option<&Record>,
        after: Option<&Record>,
    ) -> crate::Result<Self> {
        let id = after
            .or(before)
            .map(Record::id)
            .ok_or_else(|| crate::Error::MissingAttribute("id".to_string()))?;
        let old_image = match event {
            EventName::Insert => None,
            _ => before.map(encode_record).transpose()?,
        };
        let new_image = match event {
            EventName::Remove => None,
            _ => after.map(encode_record).transpose()?,
        };
        Ok(Self {
            keys: encode_keys(id),
            old_image,
            new_image,
        })
    }
}
