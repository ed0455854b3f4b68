//! Entity kinds, identifiers and the secondary indexes that link them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum length of an entity identifier.
pub const MAX_ID_LEN: usize = 128;

/// The four levels of the workspace hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Workspace,
    Path,
    Component,
    Data,
}

impl EntityKind {
    /// All kinds, root first.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Workspace,
        EntityKind::Path,
        EntityKind::Component,
        EntityKind::Data,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::Path => "path",
            Self::Component => "component",
            Self::Data => "data",
        }
    }

    /// Prefix used for generated identifiers.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Workspace => "ws",
            Self::Path => "path",
            Self::Component => "comp",
            Self::Data => "data",
        }
    }

    /// The kind one level up, if any.
    pub fn parent(&self) -> Option<EntityKind> {
        match self {
            Self::Workspace => None,
            Self::Path => Some(Self::Workspace),
            Self::Component => Some(Self::Path),
            Self::Data => Some(Self::Component),
        }
    }

    /// The kind one level down, if any.
    pub fn child(&self) -> Option<EntityKind> {
        match self {
            Self::Workspace => Some(Self::Path),
            Self::Path => Some(Self::Component),
            Self::Component => Some(Self::Data),
            Self::Data => None,
        }
    }

    /// Name of the attribute holding the parent foreign key.
    pub fn parent_key(&self) -> Option<&'static str> {
        match self {
            Self::Workspace => None,
            Self::Path => Some("workspace_id"),
            Self::Component => Some("path_id"),
            Self::Data => Some("component_id"),
        }
    }

    /// The secondary index used to enumerate rows of this kind by parent.
    pub fn parent_index(&self) -> Option<IndexName> {
        match self {
            Self::Workspace => None,
            Self::Path => Some(IndexName::WorkspacePath),
            Self::Component => Some(IndexName::PathComponent),
            Self::Data => Some(IndexName::ComponentData),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "workspace" => Ok(Self::Workspace),
            "path" => Ok(Self::Path),
            "component" => Ok(Self::Component),
            "data" => Ok(Self::Data),
            other => Err(crate::Error::UnknownEntityKind(other.to_string())),
        }
    }
}

/// Secondary indexes keyed by a parent foreign key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexName {
    /// Paths by `workspace_id` (sort key `normalized_name`).
    WorkspacePath,
    /// Components by `path_id` (sort key `name`).
    PathComponent,
    /// Data rows by `component_id`.
    ComponentData,
}

impl IndexName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkspacePath => "WorkspacePathIndex",
            Self::PathComponent => "PathComponentIndex",
            Self::ComponentData => "ComponentDataIndex",
        }
    }

    /// The kind of row this index returns.
    pub fn child_kind(&self) -> EntityKind {
        match self {
            Self::WorkspacePath => EntityKind::Path,
            Self::PathComponent => EntityKind::Component,
            Self::ComponentData => EntityKind::Data,
        }
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a row in any entity table.
///
/// Ids are restricted to `[A-Za-z0-9_-]` because blob keys are derived from
/// Data row ids.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Generate a fresh id for the given kind, e.g. `ws-3f2a...`.
    pub fn generate(kind: EntityKind) -> Self {
        Self(format!("{}-{}", kind.id_prefix(), Uuid::new_v4().simple()))
    }

    /// Id that is a pure function of `name`, for writes that must land on
    /// the same row when they are repeated.
    pub fn derive(kind: EntityKind, name: &[u8]) -> Self {
        Self(format!(
            "{}-{}",
            kind.id_prefix(),
            Uuid::new_v5(&Uuid::NAMESPACE_OID, name).simple()
        ))
    }

    /// Parse and validate an id.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() {
            return Err(crate::Error::InvalidId("empty id".to_string()));
        }
        if s.len() > MAX_ID_LEN {
            return Err(crate::Error::InvalidId(format!(
                "id exceeds {MAX_ID_LEN} characters"
            )));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(crate::Error::InvalidId(format!(
                "invalid character {c:?} in {s:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntityId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A typed reference to a row: its kind plus id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_links_are_consistent() {
        for kind in EntityKind::ALL {
            if let Some(child) = kind.child() {
                assert_eq!(child.parent(), Some(kind));
                let index = child.parent_index().unwrap();
                assert_eq!(index.child_kind(), child);
            }
        }
        assert_eq!(EntityKind::Workspace.parent_key(), None);
        assert_eq!(EntityKind::Data.parent_key(), Some("component_id"));
    }

    #[test]
    fn generated_ids_are_valid_and_prefixed() {
        let id = EntityId::generate(EntityKind::Component);
        assert!(id.as_str().starts_with("comp-"));
        assert_eq!(EntityId::parse(id.as_str()).unwrap(), id);
    }

    #[test]
    fn derived_ids_depend_only_on_the_name() {
        let a = EntityId::derive(EntityKind::Data, b"comp-1/req/0");
        assert_eq!(a, EntityId::derive(EntityKind::Data, b"comp-1/req/0"));
        assert_ne!(a, EntityId::derive(EntityKind::Data, b"comp-1/req/1"));
        assert!(a.as_str().starts_with("data-"));
        assert_eq!(EntityId::parse(a.as_str()).unwrap(), a);
    }

    #[test]
    fn parse_rejects_path_like_ids() {
        assert!(EntityId::parse("").is_err());
        assert!(EntityId::parse("../etc").is_err());
        assert!(EntityId::parse("a/b").is_err());
        assert!(EntityId::parse(&"x".repeat(MAX_ID_LEN + 1)).is_err());
        assert!(EntityId::parse("data-20241212083321").is_ok());
    }

    #[test]
    fn kind_roundtrips_through_str() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("account".parse::<EntityKind>().is_err());
    }
}
