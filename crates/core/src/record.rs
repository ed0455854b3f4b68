//! Rows of the four entity tables.

use crate::entity::{EntityId, EntityKind};
use crate::payload::{BlobLocation, Payload, PayloadIndex, Placement};
use time::OffsetDateTime;

/// Normalize a path name: lower-cased, spaces replaced by `-`.
pub fn normalize_name(name: &str) -> crate::Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(crate::Error::InvalidName("name cannot be empty".to_string()));
    }
    Ok(trimmed.to_lowercase().replace(' ', "-"))
}

#[derive(Clone, Debug, PartialEq)]
pub struct WorkspaceRecord {
    pub id: EntityId,
    pub name: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl WorkspaceRecord {
    pub fn new(name: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: EntityId::generate(EntityKind::Workspace),
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PathRecord {
    pub id: EntityId,
    pub workspace_id: EntityId,
    pub name: String,
    pub normalized_name: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl PathRecord {
    pub fn new(workspace_id: EntityId, name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        let normalized_name = normalize_name(&name)?;
        let now = OffsetDateTime::now_utc();
        Ok(Self {
            id: EntityId::generate(EntityKind::Path),
            workspace_id,
            name,
            normalized_name,
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ComponentRecord {
    pub id: EntityId,
    pub workspace_id: EntityId,
    pub path_id: EntityId,
    pub name: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ComponentRecord {
    pub fn new(
        workspace_id: EntityId,
        path_id: EntityId,
        name: impl Into<String>,
    ) -> crate::Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(crate::Error::InvalidName(
                "component name cannot be empty".to_string(),
            ));
        }
        let now = OffsetDateTime::now_utc();
        Ok(Self {
            id: EntityId::generate(EntityKind::Component),
            workspace_id,
            path_id,
            name,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Leaf payload record.
///
/// Exactly one of `data` and `s3_location` is set once a write completes.
#[derive(Clone, Debug, PartialEq)]
pub struct DataRecord {
    pub id: EntityId,
    pub component_id: EntityId,
    pub workspace_id: EntityId,
    pub data: Option<Payload>,
    pub data_map: PayloadIndex,
    pub s3_location: Option<BlobLocation>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl DataRecord {
    /// Current placement as recorded on the row.
    pub fn placement(&self) -> Placement {
        if self.s3_location.is_some() {
            Placement::Offloaded
        } else {
            Placement::Inline
        }
    }

    /// Whether the row has exactly one payload location.
    pub fn is_consistent(&self) -> bool {
        self.data.is_some() != self.s3_location.is_some()
    }
}

/// A row of any entity table.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    Workspace(WorkspaceRecord),
    Path(PathRecord),
    Component(ComponentRecord),
    Data(DataRecord),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Workspace(_) => EntityKind::Workspace,
            Self::Path(_) => EntityKind::Path,
            Self::Component(_) => EntityKind::Component,
            Self::Data(_) => EntityKind::Data,
        }
    }

    pub fn id(&self) -> &EntityId {
        match self {
            Self::Workspace(r) => &r.id,
            Self::Path(r) => &r.id,
            Self::Component(r) => &r.id,
            Self::Data(r) => &r.id,
        }
    }

    /// Parent foreign key, `None` for workspaces.
    pub fn parent_id(&self) -> Option<&EntityId> {
        match self {
            Self::Workspace(_) => None,
            Self::Path(r) => Some(&r.workspace_id),
            Self::Component(r) => Some(&r.path_id),
            Self::Data(r) => Some(&r.component_id),
        }
    }

    pub fn as_data(&self) -> Option<&DataRecord> {
        match self {
            Self::Data(r) => Some(r),
            _ => None,
        }
    }
}
