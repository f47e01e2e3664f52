//! One sync worker: runs a claimed file transfer end to end and writes the
//! outcome back to the registry. A file failure never touches its siblings;
//! the sync job only fails outright under the configured policy.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::control::SyncControl;
use crate::model::{DownloadId, SyncFileStatus, SyncJobStatus};
use crate::registry::{unix_timestamp, JobRegistry, SyncClaim};
use crate::transfer::{Transfer, TransferError};

use super::progress::SpeedSample;

/// How often in-flight progress is flushed to the registry.
const PROGRESS_FLUSH: Duration = Duration::from_secs(1);

pub(super) struct WorkerCtx {
    pub registry: Arc<JobRegistry>,
    pub transfer: Arc<dyn Transfer>,
    pub control: Arc<SyncControl>,
    pub streams: usize,
    pub fail_job_on_file_error: bool,
}

/// Runs one claimed transfer. `abort` was registered with `SyncControl` by
/// the scheduler at dispatch time; this worker owns the matching release.
pub(super) async fn run_claim(
    ctx: Arc<WorkerCtx>,
    claim: SyncClaim,
    remote_file: PathBuf,
    local_file: PathBuf,
    abort: Arc<AtomicBool>,
) {
    if let Some(parent) = local_file.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            ctx.control.release(&claim.id);
            finish_file(
                &ctx,
                &claim,
                SyncFileStatus::Errored,
                None,
                Some(format!("create staging dir: {e}")),
            )
            .await;
            return;
        }
    }

    let (tx, rx) = mpsc::channel::<u64>(64);
    let progress_task = tokio::spawn(progress_loop(
        Arc::clone(&ctx.registry),
        claim.id.clone(),
        claim.path.clone(),
        rx,
    ));

    let result = ctx
        .transfer
        .fetch(
            &remote_file,
            &local_file,
            claim.size,
            claim.resume,
            ctx.streams,
            tx,
            abort,
        )
        .await;

    // The progress sender is gone once fetch returns; drain the loop first so
    // the final status write below is not overwritten by a stale update.
    let _ = progress_task.await;
    ctx.control.release(&claim.id);

    match result {
        Ok(done) => {
            tracing::debug!(download = %claim.id, path = %claim.path, "file synced");
            finish_file(&ctx, &claim, SyncFileStatus::Complete, Some(done), None).await;
        }
        Err(TransferError::Aborted) => {
            // Back to pending, partial file kept resumable on disk.
            tracing::info!(download = %claim.id, path = %claim.path, "transfer aborted");
            finish_file(&ctx, &claim, SyncFileStatus::Pending, None, None).await;
        }
        Err(e) => {
            tracing::warn!(download = %claim.id, path = %claim.path, "transfer failed: {e}");
            finish_file(
                &ctx,
                &claim,
                SyncFileStatus::Errored,
                None,
                Some(e.to_string()),
            )
            .await;
        }
    }
}

async fn finish_file(
    ctx: &WorkerCtx,
    claim: &SyncClaim,
    status: SyncFileStatus,
    transferred: Option<u64>,
    error: Option<String>,
) {
    let fail_job = ctx.fail_job_on_file_error;
    let res = ctx
        .registry
        .update(&claim.id, |rec| {
            let Some(sync) = rec.sync.as_mut() else {
                return;
            };
            if let Some(file) = sync.file_mut(&claim.path) {
                file.status = status;
                file.speed_bps = 0;
                if let Some(done) = transferred {
                    file.transferred = done;
                }
                file.error = error.clone();
            }
            if sync.status == SyncJobStatus::Running {
                if sync.all_complete() {
                    sync.status = SyncJobStatus::Complete;
                    sync.finished_at = Some(unix_timestamp());
                } else if fail_job
                    && sync.files.iter().any(|f| f.status == SyncFileStatus::Errored)
                    && !sync.has_open_files()
                {
                    sync.status = SyncJobStatus::Errored;
                    sync.finished_at = Some(unix_timestamp());
                }
            }
        })
        .await;
    if let Err(e) = res {
        tracing::warn!(download = %claim.id, "persisting sync outcome failed: {e:#}");
    }
}

async fn progress_loop(
    registry: Arc<JobRegistry>,
    id: DownloadId,
    path: String,
    mut rx: mpsc::Receiver<u64>,
) {
    let mut speed = SpeedSample::new();
    let mut last_flush = Instant::now();
    while let Some(total) = rx.recv().await {
        speed.record(total);
        if last_flush.elapsed() < PROGRESS_FLUSH {
            continue;
        }
        last_flush = Instant::now();
        let bps = speed.bytes_per_sec();
        let res = registry
            .update(&id, |rec| {
                if let Some(file) = rec.sync.as_mut().and_then(|s| s.file_mut(&path)) {
                    file.transferred = total.min(file.size);
                    file.speed_bps = bps;
                }
            })
            .await;
        if res.is_err() {
            tracing::warn!(download = %id, "durable progress update failed");
        }
    }
}
