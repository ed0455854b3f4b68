//! Test environment: SQLite document store and filesystem blobs in a temp
//! directory, wrapped for call recording and fault injection.

use super::stores::{FaultyBlobStore, RecordingStore};
use arbor_core::config::AppConfig;
use arbor_core::{ComponentRecord, DataRecord, PathRecord, Payload, WorkspaceRecord};
use arbor_metadata::repos::{ComponentRepo, PathRepo, WorkspaceRepo};
use arbor_metadata::{SqliteStore, StreamOptions};
use arbor_pipeline::Pipeline;
use arbor_storage::{FilesystemBackend, ObjectStore, ObjectStoreListStreamExt};
use futures::TryStreamExt;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestEnv {
    _dir: TempDir,
    pub config: AppConfig,
    pub store: Arc<RecordingStore>,
    pub blobs: Arc<FaultyBlobStore>,
    pub pipeline: Pipeline,
}

impl TestEnv {
    /// 4 KiB inline threshold, fast retries.
    pub async fn new() -> Self {
        Self::with_config(AppConfig::for_testing()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let sqlite = SqliteStore::new(
            dir.path().join("arbor.db"),
            Some(30),
            StreamOptions::from_app_config(&config),
        )
        .await
        .unwrap();
        let store = Arc::new(RecordingStore::new(Arc::new(sqlite)));
        let backend = FilesystemBackend::new(dir.path().join("blobs")).await.unwrap();
        let blobs = Arc::new(FaultyBlobStore::new(backend));
        let pipeline = Pipeline::new(&config, store.clone(), blobs.clone());
        Self {
            _dir: dir,
            config,
            store,
            blobs,
            pipeline,
        }
    }

    pub async fn blob_exists(&self, key: &str) -> bool {
        self.blobs.exists(key).await.unwrap()
    }

    /// Every key under the data prefix.
    pub async fn blob_keys(&self) -> Vec<String> {
        let prefix = format!("{}/", self.config.blob.key_prefix);
        self.blobs
            .list_keys(&prefix, None)
            .try_collect()
            .await
            .unwrap()
    }
}

/// A JSON object payload of exactly `size` bytes (`size` >= 22).
pub fn json_payload(size: usize) -> Payload {
    let frame = r#"{"kind":"s","body":""}"#.len();
    assert!(size >= frame, "payload too small");
    let body = "x".repeat(size - frame);
    let json = format!(r#"{{"kind":"s","body":"{body}"}}"#);
    assert_eq!(json.len(), size);
    Payload::from(json.into_bytes())
}

/// A seeded hierarchy: one workspace with `paths` paths, `components`
/// components per path and `data` rows per component.
pub struct Tree {
    pub workspace: WorkspaceRecord,
    pub paths: Vec<PathRecord>,
    pub components: Vec<ComponentRecord>,
    pub data: Vec<DataRecord>,
}

impl Tree {
    pub fn total_descendants(&self) -> usize {
        self.paths.len() + self.components.len() + self.data.len()
    }
}

pub async fn seed_tree(
    env: &TestEnv,
    paths: usize,
    components: usize,
    data: usize,
    payload_size: usize,
) -> Tree {
    let workspace = WorkspaceRecord::new("Seeded");
    env.store.create_workspace(&workspace).await.unwrap();
    let mut tree = Tree {
        workspace,
        paths: Vec::new(),
        components: Vec::new(),
        data: Vec::new(),
    };

    for p in 0..paths {
        let path = PathRecord::new(tree.workspace.id.clone(), format!("path {p}")).unwrap();
        env.store.create_path(&path).await.unwrap();
        for c in 0..components {
            let component = ComponentRecord::new(
                tree.workspace.id.clone(),
                path.id.clone(),
                format!("component-{c}"),
            )
            .unwrap();
            env.store.create_component(&component).await.unwrap();
            for _ in 0..data {
                let record = env
                    .pipeline
                    .materializer
                    .write(&component.id, json_payload(payload_size), None)
                    .await
                    .unwrap();
                tree.data.push(record);
            }
            tree.components.push(component);
        }
        tree.paths.push(path);
    }
    tree
}
