//! Stream consumer: checkpoints, malformed records, redelivery and shard loops.

mod common;

use arbor_core::EntityKind;
use arbor_metadata::StreamPosition;
use arbor_metadata::repos::{DataRepo, PathRepo, StreamRepo, WorkspaceRepo};
use arbor_pipeline::PipelineError;
use common::{Fault, TestEnv, seed_tree};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn last_sequence(env: &TestEnv, position: StreamPosition) -> u64 {
    env.store
        .read_changes(position, None, 1000)
        .await
        .unwrap()
        .last()
        .map(|r| r.sequence)
        .unwrap()
}

#[tokio::test]
async fn test_positions_cover_every_table_and_shard() {
    let env = TestEnv::new().await;
    let positions = env.pipeline.consumer.positions();

    let expected = env.config.stream.tables.len() * env.config.stream.shards as usize;
    assert_eq!(positions.len(), expected);
    for kind in &env.config.stream.tables {
        assert_eq!(
            positions.iter().filter(|p| p.kind == *kind).count(),
            env.config.stream.shards as usize
        );
    }
}

#[tokio::test]
async fn test_idle_shard_returns_none() {
    let env = TestEnv::new().await;
    let position = StreamPosition {
        kind: EntityKind::Workspace,
        shard: 0,
    };
    assert!(env.pipeline.consumer.poll_once(position).await.unwrap().is_none());
    assert_eq!(env.store.load_checkpoint(position).await.unwrap(), None);
}

#[tokio::test]
async fn test_malformed_record_is_skipped_and_checkpointed() {
    let env = TestEnv::new().await;
    let position = StreamPosition {
        kind: EntityKind::Workspace,
        shard: 1,
    };
    let garbage = env
        .store
        .publish_raw(position, "TRUNCATE", "{not json", None, None)
        .await
        .unwrap();
    let missing_image = env
        .store
        .publish_raw(position, "INSERT", r#"{"id":{"S":"ws_x"}}"#, None, None)
        .await
        .unwrap();

    let outcome = env
        .pipeline
        .consumer
        .poll_once(position)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.records, 2);
    assert_eq!(outcome.decode_errors, 2);
    assert_eq!(outcome.handled, 0);
    assert_eq!(outcome.last_sequence, Some(missing_image));
    assert!(garbage < missing_image);
    assert_eq!(
        env.store.load_checkpoint(position).await.unwrap(),
        Some(missing_image)
    );
    assert!(env.pipeline.consumer.poll_once(position).await.unwrap().is_none());
}

#[tokio::test]
async fn test_malformed_record_does_not_block_valid_ones() {
    let env = TestEnv::new().await;
    let tree = seed_tree(&env, 1, 1, 1, 64).await;
    let position = StreamPosition {
        kind: EntityKind::Workspace,
        shard: env.store.shard_for(&tree.workspace.id),
    };
    env.store
        .publish_raw(position, "REMOVE", r#"{"id":{"N":"7"}}"#, None, None)
        .await
        .unwrap();
    env.store.delete_workspace(&tree.workspace.id).await.unwrap();

    let outcome = env
        .pipeline
        .consumer
        .poll_once(position)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.decode_errors, 1);
    assert!(env.store.get_data(&tree.data[0].id).await.unwrap().is_none());
    assert!(env.store.get_path(&tree.paths[0].id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_batch_keeps_checkpoint_and_is_redelivered() {
    let env = TestEnv::new().await;
    let tree = seed_tree(&env, 1, 1, 2, 64).await;
    let position = StreamPosition {
        kind: EntityKind::Workspace,
        shard: env.store.shard_for(&tree.workspace.id),
    };
    env.store.fail_delete(&tree.data[1].id, Fault::Permanent);
    env.store.delete_workspace(&tree.workspace.id).await.unwrap();

    let first = env.pipeline.consumer.poll_once(position).await;
    assert!(matches!(
        first,
        Err(PipelineError::CascadeIncomplete { failed: 1, .. })
    ));
    assert_eq!(env.store.load_checkpoint(position).await.unwrap(), None);
    assert!(env.store.get_data(&tree.data[0].id).await.unwrap().is_none());
    assert!(env.store.get_data(&tree.data[1].id).await.unwrap().is_some());

    env.store.clear_faults();
    let second = env
        .pipeline
        .consumer
        .poll_once(position)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(second.last_sequence, Some(last_sequence(&env, position).await));
    assert!(env.store.get_data(&tree.data[1].id).await.unwrap().is_none());
    assert!(env.store.get_path(&tree.paths[0].id).await.unwrap().is_none());
    assert_eq!(
        env.store.load_checkpoint(position).await.unwrap(),
        second.last_sequence
    );
}

#[tokio::test]
async fn test_batches_respect_batch_size() {
    let mut config = arbor_core::config::AppConfig::for_testing();
    config.stream.batch_size = 2;
    config.stream.shards = 1;
    let env = TestEnv::with_config(config).await;
    let position = StreamPosition {
        kind: EntityKind::Workspace,
        shard: 0,
    };
    for n in 0..5 {
        env.store
            .create_workspace(&arbor_core::WorkspaceRecord::new(format!("ws {n}")))
            .await
            .unwrap();
    }

    let batches = env.pipeline.consumer.drain(position).await.unwrap();

    assert_eq!(batches, 3);
    assert_eq!(
        env.store.load_checkpoint(position).await.unwrap(),
        Some(last_sequence(&env, position).await)
    );
}

#[tokio::test]
async fn test_path_stream_cascades_from_removed_path() {
    let mut config = arbor_core::config::AppConfig::for_testing();
    config.stream.tables = vec![EntityKind::Workspace, EntityKind::Path, EntityKind::Data];
    let env = TestEnv::with_config(config).await;
    let tree = seed_tree(&env, 2, 1, 2, 64).await;

    env.store.delete_path(&tree.paths[0].id).await.unwrap();
    env.pipeline.consumer.drain_all().await.unwrap();

    assert!(env.store.get_data(&tree.data[0].id).await.unwrap().is_none());
    assert!(env.store.get_data(&tree.data[1].id).await.unwrap().is_none());
    assert!(env.store.get_data(&tree.data[2].id).await.unwrap().is_some());
    assert!(env.store.get_path(&tree.paths[1].id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_shard_loop_abandons_batch_after_attempt_limit() {
    let mut config = arbor_core::config::AppConfig::for_testing();
    config.stream.max_batch_attempts = 2;
    config.stream.poll_interval_ms = 5;
    let env = TestEnv::with_config(config).await;
    let tree = seed_tree(&env, 1, 1, 1, 64).await;
    let position = StreamPosition {
        kind: EntityKind::Workspace,
        shard: env.store.shard_for(&tree.workspace.id),
    };
    env.store.fail_delete(&tree.data[0].id, Fault::Permanent);
    env.store.delete_workspace(&tree.workspace.id).await.unwrap();
    let target = last_sequence(&env, position).await;

    let cancel = CancellationToken::new();
    let consumer = Arc::clone(&env.pipeline.consumer);
    let loop_cancel = cancel.clone();
    let handle = tokio::spawn(async move { consumer.run_shard(position, loop_cancel).await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while env.store.load_checkpoint(position).await.unwrap() != Some(target) {
        assert!(tokio::time::Instant::now() < deadline, "batch never abandoned");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();
    handle.await.unwrap();

    // The stuck row stays behind for the orphan tooling to find.
    assert!(env.store.get_data(&tree.data[0].id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_spawned_loops_process_events_and_stop_on_cancel() {
    let mut config = arbor_core::config::AppConfig::for_testing();
    config.stream.poll_interval_ms = 5;
    let env = TestEnv::with_config(config).await;
    let tree = seed_tree(&env, 2, 2, 1, 6000).await;
    env.store.delete_workspace(&tree.workspace.id).await.unwrap();

    let cancel = CancellationToken::new();
    let handles = Arc::clone(&env.pipeline.consumer).spawn(cancel.clone());
    assert_eq!(handles.len(), env.pipeline.consumer.positions().len());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !env.blob_keys().await.is_empty()
        || env.store.get_path(&tree.paths[1].id).await.unwrap().is_some()
    {
        assert!(tokio::time::Instant::now() < deadline, "cascade never finished");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    cancel.cancel();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
