//! Sync scheduler: bounded-concurrency engine for file transfers.
//!
//! Each cycle the engine calls `dispatch`, which reaps finished workers,
//! claims pending files up to the free slot count, and spawns one worker per
//! claimed file. Workers run independently of the poll cycle; shutdown
//! aborts them and waits up to a grace period.

mod progress;
mod worker;

pub use progress::SpeedSample;

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::config::PullarrConfig;
use crate::control::SyncControl;
use crate::layout;
use crate::registry::{JobRegistry, SyncClaim};
use crate::transfer::Transfer;

use worker::{run_claim, WorkerCtx};

pub struct SyncScheduler {
    ctx: Arc<WorkerCtx>,
    staging_root: PathBuf,
    max_slots: usize,
    /// Per-source remote→local path prefix rewrites from config.
    path_maps: Vec<(String, crate::config::SourceConfig)>,
    workers: JoinSet<()>,
}

impl SyncScheduler {
    pub fn new(
        registry: Arc<JobRegistry>,
        transfer: Arc<dyn Transfer>,
        control: Arc<SyncControl>,
        cfg: &PullarrConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(WorkerCtx {
                registry,
                transfer,
                control,
                streams: cfg.streams_per_file.max(1),
                fail_job_on_file_error: cfg.fail_job_on_file_error,
            }),
            staging_root: cfg.staging_dir.clone(),
            max_slots: cfg.max_concurrent_syncs.max(1),
            path_maps: cfg
                .sources
                .iter()
                .map(|s| (s.name.clone(), s.clone()))
                .collect(),
            workers: JoinSet::new(),
        }
    }

    /// Reap finished workers, then claim and start transfers for as many
    /// pending files as free slots allow. Returns the number started.
    pub async fn dispatch(&mut self) -> Result<usize> {
        while self.workers.try_join_next().is_some() {}
        let free = self.max_slots.saturating_sub(self.workers.len());
        if free == 0 {
            return Ok(0);
        }
        let claims = self.ctx.registry.claim_sync_files(free).await?;
        let started = claims.len();
        for claim in claims {
            let remote_file = self.remote_file_path(&claim);
            let local_file =
                layout::staging_dir(&self.staging_root, &claim.id).join(&claim.path);
            tracing::debug!(
                download = %claim.id,
                path = %claim.path,
                resume = claim.resume,
                "starting transfer"
            );
            // The token must exist before the task is spawned: an abort
            // issued between dispatch and the worker's first poll would
            // otherwise never reach it.
            let abort = self.ctx.control.register(&claim.id);
            let ctx = Arc::clone(&self.ctx);
            self.workers
                .spawn(async move { run_claim(ctx, claim, remote_file, local_file, abort).await });
        }
        Ok(started)
    }

    /// Files currently transferring.
    pub fn in_flight(&mut self) -> usize {
        while self.workers.try_join_next().is_some() {}
        self.workers.len()
    }

    /// Wait for every in-flight worker to finish (tests and idle shutdown).
    pub async fn drain(&mut self) {
        while self.workers.join_next().await.is_some() {}
    }

    /// Graceful shutdown: signal abort to every transfer, wait up to `grace`
    /// for workers to acknowledge, then detach whatever remains. Partial
    /// files stay on disk, resumable by the next run.
    pub async fn shutdown(&mut self, grace: Duration) {
        self.ctx.control.abort_all();
        let drained = tokio::time::timeout(grace, self.drain()).await;
        if drained.is_err() {
            tracing::warn!(
                "shutdown grace period elapsed with {} transfer(s) still running",
                self.workers.len()
            );
            self.workers.abort_all();
        }
    }

    fn remote_file_path(&self, claim: &SyncClaim) -> PathBuf {
        let root = self
            .path_maps
            .iter()
            .find(|(name, _)| name == &claim.id.source)
            .map(|(_, src)| src.map_remote_path(&claim.remote_path))
            .unwrap_or_else(|| claim.remote_path.clone());
        PathBuf::from(root).join(&claim.path)
    }
}
