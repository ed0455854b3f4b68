//! Background work supervised by the daemon: one stream consumer loop per
//! table shard, and the periodic orphan sweep when enabled.

use crate::handlers::record_sweep;
use arbor_core::config::SweepConfig;
use arbor_pipeline::{OrphanSweeper, Pipeline};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handles of every spawned background task.
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Spawn the consumers and, if configured, the sweep loop.
    pub fn spawn(pipeline: &Pipeline, sweep: &SweepConfig, cancel: &CancellationToken) -> Self {
        let mut handles = Arc::clone(&pipeline.consumer).spawn(cancel.clone());
        tracing::info!(consumers = handles.len(), "Stream consumers spawned");

        if sweep.enabled {
            handles.push(spawn_sweep_loop(
                Arc::clone(&pipeline.sweeper),
                sweep.interval(),
                cancel.clone(),
            ));
            tracing::info!(
                interval_secs = sweep.interval_secs,
                grace_period_secs = sweep.grace_period_secs,
                "Orphan sweep scheduled"
            );
        } else {
            tracing::info!("Orphan sweep disabled");
        }
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every task to stop, up to `timeout`. Call after cancelling.
    pub async fn join(self, timeout: Duration) {
        let all = futures::future::join_all(self.handles);
        match tokio::time::timeout(timeout, all).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Background task panicked");
                    }
                }
                tracing::info!("Background tasks stopped");
            }
            Err(_) => tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "Background tasks did not stop in time"
            ),
        }
    }
}

fn spawn_sweep_loop(
    sweeper: Arc<OrphanSweeper>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let result = sweeper.run(&cancel).await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "Orphan sweep failed");
            }
            record_sweep(&result);
        }
    })
}
