//! Bulk ingest and the orphan blob sweep.

mod common;

use arbor_core::config::AppConfig;
use arbor_core::{EntityId, EntityKind, Placement, blob_key};
use arbor_metadata::repos::{ComponentRepo, DataRepo, PathRepo};
use arbor_pipeline::{BulkEntry, BulkRequest, PipelineError};
use arbor_storage::ObjectStore;
use bytes::Bytes;
use common::{Fault, TestEnv, json_payload, seed_tree};
use tokio_util::sync::CancellationToken;

fn request(workspace_id: &EntityId, path: &str, component: &str, sizes: &[usize]) -> BulkRequest {
    BulkRequest {
        workspace_id: workspace_id.clone(),
        path_name: path.to_string(),
        component_name: component.to_string(),
        request_id: None,
        entries: sizes.iter().map(|&s| BulkEntry::from(json_payload(s))).collect(),
    }
}

#[tokio::test]
async fn test_ingest_creates_path_and_component_once() {
    let env = TestEnv::new().await;
    let tree = seed_tree(&env, 0, 0, 0, 64).await;
    let ws = &tree.workspace.id;

    let first = env
        .pipeline
        .ingest
        .ingest(request(ws, "Sensor Logs", "raw", &[100, 200]))
        .await
        .unwrap();
    assert!(first.path_created);
    assert!(first.component_created);
    assert_eq!(first.data_ids.len(), 2);

    let path = env.store.get_path(&first.path_id).await.unwrap().unwrap();
    assert_eq!(path.normalized_name, "sensor-logs");

    // Same path under a differently cased name, same component.
    let second = env
        .pipeline
        .ingest
        .ingest(request(ws, "sensor logs", "raw", &[300]))
        .await
        .unwrap();
    assert!(!second.path_created);
    assert!(!second.component_created);
    assert_eq!(second.path_id, first.path_id);
    assert_eq!(second.component_id, first.component_id);

    let third = env
        .pipeline
        .ingest
        .ingest(request(ws, "Sensor Logs", "derived", &[]))
        .await
        .unwrap();
    assert!(!third.path_created);
    assert!(third.component_created);
    assert!(third.data_ids.is_empty());

    let component = env
        .store
        .get_component(&first.component_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(component.path_id, first.path_id);
    assert_eq!(component.workspace_id, *ws);
}

#[tokio::test]
async fn test_ingest_places_each_entry_by_size() {
    let env = TestEnv::new().await;
    let tree = seed_tree(&env, 0, 0, 0, 64).await;

    let result = env
        .pipeline
        .ingest
        .ingest(request(&tree.workspace.id, "p", "c", &[512, 4096, 4097, 20_000]))
        .await
        .unwrap();

    let mut placements = Vec::new();
    for id in &result.data_ids {
        let row = env.store.get_data(id).await.unwrap().unwrap();
        assert_eq!(row.component_id, result.component_id);
        assert!(row.is_consistent());
        placements.push(row.placement());
    }
    assert_eq!(
        placements,
        vec![
            Placement::Inline,
            Placement::Inline,
            Placement::Offloaded,
            Placement::Offloaded
        ]
    );
    assert_eq!(env.blob_keys().await.len(), 2);
}

#[tokio::test]
async fn test_redelivered_ingest_writes_nothing_new() {
    let env = TestEnv::new().await;
    let tree = seed_tree(&env, 0, 0, 0, 64).await;
    let req = request(&tree.workspace.id, "p", "c", &[100, 10 * 1024]);

    let first = env.pipeline.ingest.ingest(req.clone()).await.unwrap();
    let puts = env.blobs.puts().len();
    let second = env.pipeline.ingest.ingest(req).await.unwrap();

    assert_eq!(second.data_ids, first.data_ids);
    assert_eq!(second.request_id, first.request_id);
    assert_eq!(env.blobs.puts().len(), puts);
    assert_eq!(env.blob_keys().await.len(), 1);
    let rows = env
        .pipeline
        .resolver
        .child_ids(&first.component_id, EntityKind::Data)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_distinct_request_ids_keep_identical_payloads_apart() {
    let env = TestEnv::new().await;
    let tree = seed_tree(&env, 0, 0, 0, 64).await;
    let mut req = request(&tree.workspace.id, "p", "c", &[100]);

    req.request_id = Some("batch-1".to_string());
    let first = env.pipeline.ingest.ingest(req.clone()).await.unwrap();
    req.request_id = Some("batch-2".to_string());
    let second = env.pipeline.ingest.ingest(req.clone()).await.unwrap();
    assert_ne!(first.data_ids, second.data_ids);
    assert_eq!(first.request_id, "batch-1");

    req.request_id = Some("  ".to_string());
    let blank = env.pipeline.ingest.ingest(req).await;
    assert!(matches!(blank, Err(PipelineError::InvalidInput(_))));
}

#[tokio::test]
async fn test_ingest_resumes_after_a_failed_entry() {
    let env = TestEnv::new().await;
    let tree = seed_tree(&env, 0, 0, 0, 64).await;
    let mut req = request(&tree.workspace.id, "p", "c", &[100, 200]);
    req.request_id = Some("resume".to_string());

    let first = env.pipeline.ingest.ingest(req.clone()).await.unwrap();
    let second_row = first.data_ids[1].clone();
    env.store.delete_data(&second_row).await.unwrap();
    env.store.fail_put_data(&second_row, Fault::Permanent);
    assert!(env.pipeline.ingest.ingest(req.clone()).await.is_err());

    env.store.clear_faults();
    let retried = env.pipeline.ingest.ingest(req).await.unwrap();
    assert_eq!(retried.data_ids, first.data_ids);
    assert!(env.store.get_data(&second_row).await.unwrap().is_some());
}

#[tokio::test]
async fn test_ingest_into_missing_workspace_fails() {
    let env = TestEnv::new().await;
    let missing = EntityId::generate(EntityKind::Workspace);

    let result = env
        .pipeline
        .ingest
        .ingest(request(&missing, "p", "c", &[100]))
        .await;

    assert!(matches!(result, Err(PipelineError::NotFound(_))));
    assert!(env.blob_keys().await.is_empty());
}

#[tokio::test]
async fn test_ingest_rejects_blank_path_name() {
    let env = TestEnv::new().await;
    let tree = seed_tree(&env, 0, 0, 0, 64).await;

    let result = env
        .pipeline
        .ingest
        .ingest(request(&tree.workspace.id, "   ", "c", &[100]))
        .await;

    assert!(matches!(result, Err(PipelineError::Domain(_))));
}

fn sweeping_config(grace_period_secs: u64) -> AppConfig {
    let mut config = AppConfig::for_testing();
    config.sweep.grace_period_secs = grace_period_secs;
    config
}

#[tokio::test]
async fn test_sweep_deletes_orphans_and_keeps_referenced_blobs() {
    let env = TestEnv::with_config(sweeping_config(0)).await;
    let tree = seed_tree(&env, 1, 1, 2, 8000).await;
    let orphan_key = blob_key(&env.config.blob.key_prefix, &tree.data[0].id);
    let live_key = blob_key(&env.config.blob.key_prefix, &tree.data[1].id);
    // Row removed without the stream ever being consumed.
    env.store.delete_data(&tree.data[0].id).await.unwrap();

    let stray_key = format!("{}/zz/not-a-data-id", env.config.blob.key_prefix);
    env.blobs
        .put(&stray_key, Bytes::from_static(b"stray"))
        .await
        .unwrap();

    let report = env
        .pipeline
        .sweeper
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.scanned, 3);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.kept, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.errors, 0);
    assert!(!env.blob_exists(&orphan_key).await);
    assert!(env.blob_exists(&live_key).await);
    assert!(env.blob_exists(&stray_key).await);
}

#[tokio::test]
async fn test_sweep_respects_grace_period() {
    let env = TestEnv::with_config(sweeping_config(3600)).await;
    let tree = seed_tree(&env, 1, 1, 1, 8000).await;
    let key = blob_key(&env.config.blob.key_prefix, &tree.data[0].id);
    env.store.delete_data(&tree.data[0].id).await.unwrap();

    let report = env
        .pipeline
        .sweeper
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.deleted, 0);
    assert_eq!(report.skipped, 1);
    assert!(env.blob_exists(&key).await);
}

#[tokio::test]
async fn test_sweep_reclaims_blob_left_by_failed_stale_cleanup() {
    let env = TestEnv::with_config(sweeping_config(0)).await;
    let tree = seed_tree(&env, 1, 1, 1, 8000).await;
    let id = tree.data[0].id.clone();
    let key = blob_key(&env.config.blob.key_prefix, &id);

    // Shrinking the row moves it inline; the old blob cannot be deleted.
    env.blobs.fail_delete(&key, Fault::Permanent);
    let row = env
        .pipeline
        .materializer
        .update(&id, json_payload(100), None)
        .await
        .unwrap();
    assert_eq!(row.placement(), Placement::Inline);
    assert!(env.blob_exists(&key).await);

    env.blobs.clear_faults();
    let report = env
        .pipeline
        .sweeper
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.deleted, 1);
    assert!(!env.blob_exists(&key).await);
    assert_eq!(env.pipeline.materializer.read(&id).await.unwrap(), json_payload(100));
}

#[tokio::test]
async fn test_cancelled_sweep_stops_early() {
    let env = TestEnv::with_config(sweeping_config(0)).await;
    seed_tree(&env, 1, 1, 3, 8000).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = env.pipeline.sweeper.run(&cancel).await.unwrap();

    assert_eq!(report.scanned, 0);
    assert_eq!(env.blob_keys().await.len(), 3);
}
