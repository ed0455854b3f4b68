//! Database rows mapping to the entity and change-log schema.

use crate::error::MetadataError;
use arbor_core::{
    BlobLocation, ComponentRecord, DataRecord, EntityId, PathRecord, Payload, PayloadIndex,
    WorkspaceRecord,
};
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Debug, Clone, FromRow)]
pub struct WorkspaceRow {
    pub id: String,
    pub name: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub struct PathRow {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub normalized_name: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub struct ComponentRow {
    pub id: String,
    pub workspace_id: String,
    pub path_id: String,
    pub name: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub struct DataRow {
    pub id: String,
    pub component_id: String,
    pub workspace_id: String,
    pub data: Option<Vec<u8>>,
    pub data_map: String,
    pub s3_location: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Projection returned by secondary index queries.
#[derive(Debug, Clone, FromRow)]
pub struct IndexEntryRow {
    pub id: String,
    pub s3_location: Option<String>,
}

/// One entry of the change log.
#[derive(Debug, Clone, FromRow)]
pub struct ChangeLogRow {
    pub sequence: i64,
    pub table_name: String,
    pub shard: i64,
    pub event_name: String,
    pub keys: String,
    pub old_image: Option<String>,
    pub new_image: Option<String>,
}

fn id(s: String) -> Result<EntityId, MetadataError> {
    Ok(EntityId::parse(&s)?)
}

impl TryFrom<WorkspaceRow> for WorkspaceRecord {
    type Error = MetadataError;

    fn try_from(row: WorkspaceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: id(row.id)?,
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<PathRow> for PathRecord {
    type Error = MetadataError;

    fn try_from(row: PathRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: id(row.id)?,
            workspace_id: id(row.workspace_id)?,
            name: row.name,
            normalized_name: row.normalized_name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<ComponentRow> for ComponentRecord {
    type Error = MetadataError;

    fn try_from(row: ComponentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: id(row.id)?,
            workspace_id: id(row.workspace_id)?,
            path_id: id(row.path_id)?,
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<DataRow> for DataRecord {
    type Error = MetadataError;

    fn try_from(row: DataRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: id(row.id)?,
            component_id: id(row.component_id)?,
            workspace_id: id(row.workspace_id)?,
            data: row.data.map(Payload::from),
            data_map: PayloadIndex::from_json(&row.data_map)?,
            s3_location: row
                .s3_location
                .as_deref()
                .map(BlobLocation::parse)
                .transpose()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
