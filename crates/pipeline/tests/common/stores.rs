//! Store wrappers that record calls and inject failures.

use arbor_core::{
    ComponentRecord, DataRecord, EntityId, EntityKind, IndexName, PathRecord, RawChangeRecord,
    WorkspaceRecord,
};
use arbor_metadata::repos::{
    ComponentRepo, DataRepo, IndexRepo, PathRepo, StreamRepo, WorkspaceRepo,
};
use arbor_metadata::{
    IndexPage, MetadataError, MetadataResult, MetadataStore, PageRequest, SqliteStore,
    StreamPosition,
};
use arbor_storage::{
    FilesystemBackend, ListingOptions, ObjectMeta, ObjectStore, PageStream, StorageError,
    StorageResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Failure to inject for one target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Fail with a transient error this many times, then succeed.
    Transient(u32),
    /// Always fail with a permanent error.
    Permanent,
}

fn take_fault(faults: &Mutex<HashMap<String, Fault>>, target: &str) -> Option<Fault> {
    let mut faults = faults.lock().unwrap();
    match faults.get_mut(target) {
        Some(Fault::Transient(0)) => None,
        Some(Fault::Transient(n)) => {
            *n -= 1;
            Some(Fault::Transient(*n + 1))
        }
        Some(Fault::Permanent) => Some(Fault::Permanent),
        None => None,
    }
}

fn metadata_fault(fault: Fault) -> MetadataError {
    match fault {
        Fault::Transient(_) => MetadataError::Database(sqlx::Error::PoolTimedOut),
        Fault::Permanent => MetadataError::Internal("injected failure".to_string()),
    }
}

/// Document store wrapper that records deletes in call order and fails
/// selected operations.
pub struct RecordingStore {
    inner: Arc<SqliteStore>,
    deletes: Mutex<Vec<(EntityKind, EntityId)>>,
    delete_faults: Mutex<HashMap<String, Fault>>,
    index_faults: Mutex<HashMap<String, Fault>>,
    write_faults: Mutex<HashMap<String, Fault>>,
}

impl RecordingStore {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            deletes: Mutex::new(Vec::new()),
            delete_faults: Mutex::new(HashMap::new()),
            index_faults: Mutex::new(HashMap::new()),
            write_faults: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &Arc<SqliteStore> {
        &self.inner
    }

    /// Successful row deletes, in the order they completed.
    pub fn deletes(&self) -> Vec<(EntityKind, EntityId)> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn clear_deletes(&self) {
        self.deletes.lock().unwrap().clear();
    }

    pub fn fail_delete(&self, id: &EntityId, fault: Fault) {
        self.delete_faults
            .lock()
            .unwrap()
            .insert(id.to_string(), fault);
    }

    /// Fail index queries partitioned by `parent`.
    pub fn fail_index(&self, parent: &EntityId, fault: Fault) {
        self.index_faults
            .lock()
            .unwrap()
            .insert(parent.to_string(), fault);
    }

    /// Fail `put_data` for the row `id`.
    pub fn fail_put_data(&self, id: &EntityId, fault: Fault) {
        self.write_faults
            .lock()
            .unwrap()
            .insert(id.to_string(), fault);
    }

    pub fn clear_faults(&self) {
        self.delete_faults.lock().unwrap().clear();
        self.index_faults.lock().unwrap().clear();
        self.write_faults.lock().unwrap().clear();
    }

    fn before_delete(&self, id: &EntityId) -> MetadataResult<()> {
        match take_fault(&self.delete_faults, id.as_str()) {
            Some(fault) => Err(metadata_fault(fault)),
            None => Ok(()),
        }
    }

    fn record_delete(&self, kind: EntityKind, id: &EntityId) {
        self.deletes.lock().unwrap().push((kind, id.clone()));
    }
}

#[async_trait]
impl WorkspaceRepo for RecordingStore {
    async fn create_workspace(&self, workspace: &WorkspaceRecord) -> MetadataResult<()> {
        self.inner.create_workspace(workspace).await
    }

    async fn get_workspace(&self, id: &EntityId) -> MetadataResult<Option<WorkspaceRecord>> {
        self.inner.get_workspace(id).await
    }

    async fn delete_workspace(&self, id: &EntityId) -> MetadataResult<WorkspaceRecord> {
        self.before_delete(id)?;
        let row = self.inner.delete_workspace(id).await?;
        self.record_delete(EntityKind::Workspace, id);
        Ok(row)
    }
}

#[async_trait]
impl PathRepo for RecordingStore {
    async fn create_path(&self, path: &PathRecord) -> MetadataResult<()> {
        self.inner.create_path(path).await
    }

    async fn get_path(&self, id: &EntityId) -> MetadataResult<Option<PathRecord>> {
        self.inner.get_path(id).await
    }

    async fn get_path_by_name(
        &self,
        workspace_id: &EntityId,
        normalized_name: &str,
    ) -> MetadataResult<Option<PathRecord>> {
        self.inner
            .get_path_by_name(workspace_id, normalized_name)
            .await
    }

    async fn delete_path(&self, id: &EntityId) -> MetadataResult<PathRecord> {
        self.before_delete(id)?;
        let row = self.inner.delete_path(id).await?;
        self.record_delete(EntityKind::Path, id);
        Ok(row)
    }
}

#[async_trait]
impl ComponentRepo for RecordingStore {
    async fn create_component(&self, component: &ComponentRecord) -> MetadataResult<()> {
        self.inner.create_component(component).await
    }

    async fn get_component(&self, id: &EntityId) -> MetadataResult<Option<ComponentRecord>> {
        self.inner.get_component(id).await
    }

    async fn get_component_by_name(
        &self,
        path_id: &EntityId,
        name: &str,
    ) -> MetadataResult<Option<ComponentRecord>> {
        self.inner.get_component_by_name(path_id, name).await
    }

    async fn delete_component(&self, id: &EntityId) -> MetadataResult<ComponentRecord> {
        self.before_delete(id)?;
        let row = self.inner.delete_component(id).await?;
        self.record_delete(EntityKind::Component, id);
        Ok(row)
    }
}

#[async_trait]
impl DataRepo for RecordingStore {
    async fn put_data(&self, data: &DataRecord) -> MetadataResult<Option<DataRecord>> {
        if let Some(fault) = take_fault(&self.write_faults, data.id.as_str()) {
            return Err(metadata_fault(fault));
        }
        self.inner.put_data(data).await
    }

    async fn get_data(&self, id: &EntityId) -> MetadataResult<Option<DataRecord>> {
        self.inner.get_data(id).await
    }

    async fn delete_data(&self, id: &EntityId) -> MetadataResult<DataRecord> {
        self.before_delete(id)?;
        let row = self.inner.delete_data(id).await?;
        self.record_delete(EntityKind::Data, id);
        Ok(row)
    }
}

#[async_trait]
impl IndexRepo for RecordingStore {
    async fn query_index(
        &self,
        index: IndexName,
        partition: &EntityId,
        page: PageRequest,
    ) -> MetadataResult<IndexPage> {
        if let Some(fault) = take_fault(&self.index_faults, partition.as_str()) {
            return Err(metadata_fault(fault));
        }
        self.inner.query_index(index, partition, page).await
    }
}

#[async_trait]
impl StreamRepo for RecordingStore {
    fn shard_count(&self) -> u32 {
        self.inner.shard_count()
    }

    fn shard_for(&self, id: &EntityId) -> u32 {
        self.inner.shard_for(id)
    }

    async fn read_changes(
        &self,
        position: StreamPosition,
        after: Option<u64>,
        limit: u32,
    ) -> MetadataResult<Vec<RawChangeRecord>> {
        self.inner.read_changes(position, after, limit).await
    }

    async fn load_checkpoint(&self, position: StreamPosition) -> MetadataResult<Option<u64>> {
        self.inner.load_checkpoint(position).await
    }

    async fn save_checkpoint(
        &self,
        position: StreamPosition,
        sequence: u64,
    ) -> MetadataResult<()> {
        self.inner.save_checkpoint(position, sequence).await
    }

    async fn publish_raw(
        &self,
        position: StreamPosition,
        event_name: &str,
        keys: &str,
        old_image: Option<&str>,
        new_image: Option<&str>,
    ) -> MetadataResult<u64> {
        self.inner
            .publish_raw(position, event_name, keys, old_image, new_image)
            .await
    }
}

#[async_trait]
impl MetadataStore for RecordingStore {
    async fn migrate(&self) -> MetadataResult<()> {
        self.inner.migrate().await
    }

    async fn health_check(&self) -> MetadataResult<()> {
        self.inner.health_check().await
    }
}

/// Blob store wrapper that counts writes and fails selected deletes.
pub struct FaultyBlobStore {
    inner: FilesystemBackend,
    puts: Mutex<Vec<String>>,
    delete_faults: Mutex<HashMap<String, Fault>>,
}

impl FaultyBlobStore {
    pub fn new(inner: FilesystemBackend) -> Self {
        Self {
            inner,
            puts: Mutex::new(Vec::new()),
            delete_faults: Mutex::new(HashMap::new()),
        }
    }

    /// Keys written, in order.
    pub fn puts(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }

    pub fn fail_delete(&self, key: &str, fault: Fault) {
        self.delete_faults
            .lock()
            .unwrap()
            .insert(key.to_string(), fault);
    }

    pub fn clear_faults(&self) {
        self.delete_faults.lock().unwrap().clear();
    }
}

#[async_trait]
impl ObjectStore for FaultyBlobStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.puts.lock().unwrap().push(key.to_string());
        self.inner.put(key, data).await
    }

    async fn put_if_not_exists(&self, key: &str, data: Bytes) -> StorageResult<bool> {
        self.inner.put_if_not_exists(key, data).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        match take_fault(&self.delete_faults, key) {
            Some(Fault::Transient(_)) => {
                Err(StorageError::Unavailable("injected outage".to_string()))
            }
            Some(Fault::Permanent) => Err(StorageError::InvalidKey(format!(
                "injected failure for {key}"
            ))),
            None => self.inner.delete(key).await,
        }
    }

    fn list_pages<'a>(&'a self, prefix: &str, options: ListingOptions) -> PageStream<'a> {
        self.inner.list_pages(prefix, options)
    }

    fn backend_name(&self) -> &'static str {
        "faulty-filesystem"
    }
}
