//! Core domain types and shared logic for the Arbor workspace pipeline.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Entity kinds, identifiers and secondary index names
//! - Rows of the Workspace, Path, Component and Data tables
//! - Payloads, the inline payload index and blob placement
//! - Attribute encoding of change-record images
//! - Application configuration

pub mod attribute;
pub mod change;
pub mod config;
pub mod entity;
pub mod error;
pub mod hash;
pub mod payload;
pub mod record;

pub use attribute::{AttributeMap, AttributeValue};
pub use change::{ChangeImages, EventName, RawChangeRecord};
pub use entity::{EntityId, EntityKind, EntityRef, IndexName};
pub use error::{Error, Result};
pub use hash::ContentHash;
pub use payload::{BlobLocation, FieldEntry, FieldKind, Payload, PayloadIndex, Placement, blob_key};
pub use record::{
    ComponentRecord, DataRecord, PathRecord, Record, WorkspaceRecord, normalize_name,
};
