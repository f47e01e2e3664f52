//! Reconciler: diff a polled source snapshot against registry state.
//!
//! Applied atomically per download under the registry lock. Produces the
//! state transitions the rest of the pipeline acts on: new downloads are
//! inserted, newly eligible files join the sync job, category relabels after
//! a successful import mark cleanup pending, and downloads the remote
//! stopped reporting are eventually marked removed. Re-applying an unchanged
//! snapshot is a no-op apart from retrying errored files.

use anyhow::Result;
use std::collections::HashSet;

use crate::control::SyncControl;
use crate::model::{
    AppJobStatus, DownloadFile, DownloadId, DownloadRecord, SyncFile, SyncFileStatus, SyncJob,
    SyncJobStatus,
};
use crate::registry::{unix_timestamp, JobRegistry};
use crate::remote::{PolledDownload, SourceSnapshot};

/// Knobs the reconciler needs from configuration.
#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
    /// Categories whose app wants the local copy cleaned when the remote
    /// drops the download.
    pub cleanup_on_remove: HashSet<String>,
    /// Consecutive missed polls before a download counts as removed.
    pub missed_polls_before_removed: u32,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            cleanup_on_remove: HashSet::new(),
            missed_polls_before_removed: 2,
        }
    }
}

/// Apply one source snapshot to the registry.
///
/// Only called for sources that produced a snapshot this cycle; downloads of
/// a source that failed to respond are left untouched (stale, not erroring).
pub async fn apply_snapshot(
    registry: &JobRegistry,
    control: &SyncControl,
    snapshot: &SourceSnapshot,
    policy: &ReconcilePolicy,
) -> Result<()> {
    let mut seen = HashSet::new();
    for polled in &snapshot.downloads {
        let id = DownloadId::new(&snapshot.source, &polled.download.name);
        seen.insert(id.as_key());
        let updated = registry
            .update(&id, |rec| merge_polled(rec, polled))
            .await?;
        if updated.is_none() {
            let mut rec = DownloadRecord::new(
                id.clone(),
                polled.download.category.clone(),
                polled.download.remote_path.clone(),
                unix_timestamp(),
            );
            merge_polled(&mut rec, polled);
            tracing::info!(download = %id, category = %rec.category, "discovered new download");
            registry.insert(rec).await?;
        }
    }

    // Disappearance: count a missed poll for every tracked download of this
    // source the snapshot did not report.
    for id in registry.keys_for_source(&snapshot.source).await {
        if seen.contains(&id.as_key()) {
            continue;
        }
        let marked_removed = registry
            .update(&id, |rec| {
                if rec.removed {
                    return false;
                }
                rec.missed_polls += 1;
                if rec.missed_polls < policy.missed_polls_before_removed {
                    return false;
                }
                rec.removed = true;
                // Cleanup only makes sense once an app actually took the
                // content; an unimported copy is kept.
                if policy.cleanup_on_remove.contains(&rec.category) && rec.any_app_imported() {
                    rec.cleanup_pending = true;
                }
                true
            })
            .await?
            .unwrap_or(false);
        if marked_removed {
            tracing::info!(download = %id, "remote no longer reports download; marked removed");
            control.request_abort(&id);
        }
    }

    Ok(())
}

/// Merge one polled download into its record. Runs under the registry lock.
fn merge_polled(rec: &mut DownloadRecord, polled: &PolledDownload) {
    rec.missed_polls = 0;
    rec.removed = false;
    // A successful poll recovers the download from a transient error state.
    rec.last_error = None;
    rec.remote_path = polled.download.remote_path.clone();

    let new_category = &polled.download.category;
    if &rec.category != new_category {
        let imported_elsewhere = rec.apps.iter().any(|a| {
            a.status == AppJobStatus::Sent && a.category.as_deref() != Some(new_category.as_str())
        });
        if imported_elsewhere {
            tracing::info!(
                download = %rec.id,
                from = %rec.category,
                to = %new_category,
                "category changed after import; cleanup pending"
            );
            rec.cleanup_pending = true;
        }
        rec.category = new_category.clone();
    }

    if let Some(files) = &polled.files {
        merge_files(rec, files);
    }
    refresh_sync_eligibility(rec);
}

fn merge_files(rec: &mut DownloadRecord, files: &[crate::remote::RemoteFile]) {
    for rf in files {
        let done = rf.done.min(rf.size);
        match rec.files.iter_mut().find(|f| f.path == rf.path) {
            None => rec.files.push(DownloadFile {
                path: rf.path.clone(),
                size: rf.size,
                remote_done: done,
                priority: rf.priority,
            }),
            Some(existing) if existing.size != rf.size => {
                // Same path, different size: the remote re-seeded a new
                // revision. Treat as a new file and discard local progress.
                tracing::warn!(
                    download = %rec.id,
                    path = %rf.path,
                    old_size = existing.size,
                    new_size = rf.size,
                    "file size changed between polls; forcing resync"
                );
                existing.size = rf.size;
                existing.remote_done = done;
                existing.priority = rf.priority;
                if let Some(sync) = rec.sync.as_mut() {
                    if let Some(sf) = sync.file_mut(&rf.path) {
                        sf.size = rf.size;
                        sf.transferred = 0;
                        sf.status = SyncFileStatus::Pending;
                        sf.error = None;
                        sf.speed_bps = 0;
                    }
                }
            }
            Some(existing) => {
                // Completed bytes are monotone per revision.
                existing.remote_done = existing.remote_done.max(done);
                existing.priority = rf.priority;
            }
        }
    }
}

/// Recompute which files belong in the sync job and retry errored ones.
/// Idempotent: a file already synced or in flight is never re-enqueued.
fn refresh_sync_eligibility(rec: &mut DownloadRecord) {
    let eligible: Vec<(String, u64)> = rec
        .files
        .iter()
        .filter(|f| f.syncable())
        .map(|f| (f.path.clone(), f.size))
        .collect();
    if eligible.is_empty() && rec.sync.is_none() {
        return;
    }
    let selected: HashSet<&str> = rec
        .files
        .iter()
        .filter(|f| f.selected())
        .map(|f| f.path.as_str())
        .collect();

    let sync = rec
        .sync
        .get_or_insert_with(|| SyncJob::new(unix_timestamp()));

    let mut reopened = false;
    for (path, size) in eligible {
        match sync.file_mut(&path) {
            None => {
                sync.files.push(SyncFile::new(path, size));
                reopened = true;
            }
            Some(sf) if sf.status == SyncFileStatus::Errored => {
                // Per-file errors are retried on the next eligible poll.
                sf.status = SyncFileStatus::Pending;
                sf.transferred = 0;
                sf.error = None;
                sf.speed_bps = 0;
                reopened = true;
            }
            Some(_) => {}
        }
    }

    // A file deselected after it was enqueued must not be claimed; bytes
    // already transferring or staged are kept.
    let before = sync.files.len();
    sync.files.retain(|sf| {
        selected.contains(sf.path.as_str())
            || matches!(
                sf.status,
                SyncFileStatus::Transferring | SyncFileStatus::Complete
            )
    });
    if sync.files.len() != before {
        tracing::debug!(
            download = %rec.id,
            dropped = before - sync.files.len(),
            "deselected files removed from sync job"
        );
    }

    if reopened && sync.status != SyncJobStatus::Running {
        sync.status = SyncJobStatus::Running;
        sync.finished_at = None;
    }
    if sync.status == SyncJobStatus::Running && sync.all_complete() {
        sync.status = SyncJobStatus::Complete;
        sync.finished_at = Some(unix_timestamp());
    }
}
