//! Sub-job status enums and the aggregate-state computation.

use serde::{Deserialize, Serialize};

use super::{AppJob, DownloadRecord, MoveJob, SyncJob};

/// Per-file transfer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncFileStatus {
    Pending,
    Transferring,
    Complete,
    Errored,
}

/// Sync job status. `Errored` is only reached under the
/// `fail_job_on_file_error` policy; by default a file failure keeps the job
/// `Running` so the next poll can retry that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncJobStatus {
    Running,
    Complete,
    Errored,
}

/// Move job status. `Pending` means claimed by an in-flight move attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveStatus {
    Pending,
    Done,
    Failed,
}

/// App notification status. `Pending` means claimed by an in-flight attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppJobStatus {
    Pending,
    Sent,
    Failed,
}

/// Aggregate pipeline state exposed for every tracked download.
///
/// `discovered → syncing → synced → moving → moved → notifying → imported →
/// (cleaned | removed)`, with `error` reachable from any non-terminal state
/// and recoverable on the next successful poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateState {
    Discovered,
    Syncing,
    Synced,
    Moving,
    Moved,
    Notifying,
    Imported,
    Cleaned,
    Removed,
    Error,
}

impl AggregateState {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregateState::Discovered => "discovered",
            AggregateState::Syncing => "syncing",
            AggregateState::Synced => "synced",
            AggregateState::Moving => "moving",
            AggregateState::Moved => "moved",
            AggregateState::Notifying => "notifying",
            AggregateState::Imported => "imported",
            AggregateState::Cleaned => "cleaned",
            AggregateState::Removed => "removed",
            AggregateState::Error => "error",
        }
    }
}

/// Deterministic aggregate state from sub-job statuses.
/// Precedence: error > in-progress stage > complete > discovered.
pub fn aggregate_state(rec: &DownloadRecord) -> AggregateState {
    if rec.cleaned {
        return AggregateState::Cleaned;
    }
    if rec.last_error.is_some() {
        return AggregateState::Error;
    }
    if rec.removed {
        return AggregateState::Removed;
    }
    if let Some(state) = app_stage_state(&rec.apps) {
        return state;
    }
    if let Some(state) = move_stage_state(rec.move_job.as_ref()) {
        return state;
    }
    if let Some(state) = sync_stage_state(rec.sync.as_ref()) {
        return state;
    }
    AggregateState::Discovered
}

fn app_stage_state(apps: &[AppJob]) -> Option<AggregateState> {
    if apps.is_empty() {
        return None;
    }
    if apps.iter().any(|a| a.status == AppJobStatus::Failed) {
        return Some(AggregateState::Error);
    }
    if apps.iter().any(|a| a.status == AppJobStatus::Pending) {
        return Some(AggregateState::Notifying);
    }
    Some(AggregateState::Imported)
}

fn move_stage_state(move_job: Option<&MoveJob>) -> Option<AggregateState> {
    match move_job?.status {
        MoveStatus::Failed => Some(AggregateState::Error),
        MoveStatus::Pending => Some(AggregateState::Moving),
        MoveStatus::Done => Some(AggregateState::Moved),
    }
}

fn sync_stage_state(sync: Option<&SyncJob>) -> Option<AggregateState> {
    let job = sync?;
    match job.status {
        SyncJobStatus::Errored => Some(AggregateState::Error),
        SyncJobStatus::Complete => Some(AggregateState::Synced),
        SyncJobStatus::Running => Some(AggregateState::Syncing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DownloadFile, DownloadId, SyncFile};

    fn record() -> DownloadRecord {
        DownloadRecord::new(
            DownloadId::new("seedbox", "Show.S01"),
            "tv-sonarr".into(),
            "/downloads/Show.S01".into(),
            0,
        )
    }

    fn sync_with(files: Vec<SyncFile>) -> SyncJob {
        let mut job = SyncJob::new(0);
        job.files = files;
        job
    }

    #[test]
    fn fresh_record_is_discovered() {
        assert_eq!(record().state(), AggregateState::Discovered);
    }

    #[test]
    fn partial_remote_completion_stays_syncing() {
        // 3 files, 2 complete remotely, 1 still downloading: the download is
        // syncing, never synced.
        let mut rec = record();
        for (path, done) in [("a", 10u64), ("b", 10), ("c", 4)] {
            rec.files.push(DownloadFile {
                path: path.into(),
                size: 10,
                remote_done: done,
                priority: 1,
            });
        }
        let mut a = SyncFile::new("a", 10);
        a.status = SyncFileStatus::Complete;
        a.transferred = 10;
        let mut b = SyncFile::new("b", 10);
        b.status = SyncFileStatus::Complete;
        b.transferred = 10;
        rec.sync = Some(sync_with(vec![a, b]));
        assert_eq!(rec.state(), AggregateState::Syncing);
    }

    #[test]
    fn pipeline_progression() {
        let mut rec = record();
        let mut job = sync_with(vec![SyncFile::new("a", 10)]);
        job.files[0].status = SyncFileStatus::Complete;
        job.status = SyncJobStatus::Complete;
        rec.sync = Some(job);
        assert_eq!(rec.state(), AggregateState::Synced);

        rec.move_job = Some(MoveJob {
            from: "/stage".into(),
            to: "/dest".into(),
            status: MoveStatus::Pending,
            started_at: 0,
            finished_at: None,
            error: None,
        });
        assert_eq!(rec.state(), AggregateState::Moving);

        rec.move_job.as_mut().unwrap().status = MoveStatus::Done;
        assert_eq!(rec.state(), AggregateState::Moved);

        rec.apps.push(AppJob {
            app: "sonarr".into(),
            status: AppJobStatus::Pending,
            path: None,
            category: None,
            error: None,
        });
        assert_eq!(rec.state(), AggregateState::Notifying);

        rec.apps[0].status = AppJobStatus::Sent;
        assert_eq!(rec.state(), AggregateState::Imported);

        rec.cleaned = true;
        assert_eq!(rec.state(), AggregateState::Cleaned);
    }

    #[test]
    fn error_takes_precedence_and_recovers() {
        let mut rec = record();
        rec.sync = Some(sync_with(vec![SyncFile::new("a", 10)]));
        rec.last_error = Some("source unreachable".into());
        assert_eq!(rec.state(), AggregateState::Error);
        // Next successful poll clears the error; prior state shows again.
        rec.last_error = None;
        assert_eq!(rec.state(), AggregateState::Syncing);
    }

    #[test]
    fn failed_move_is_error() {
        let mut rec = record();
        rec.move_job = Some(MoveJob {
            from: "a".into(),
            to: "b".into(),
            status: MoveStatus::Failed,
            started_at: 0,
            finished_at: Some(1),
            error: Some("verify failed".into()),
        });
        assert_eq!(rec.state(), AggregateState::Error);
    }

    #[test]
    fn removed_download_reports_removed() {
        let mut rec = record();
        rec.removed = true;
        assert_eq!(rec.state(), AggregateState::Removed);
        rec.cleaned = true;
        assert_eq!(rec.state(), AggregateState::Cleaned);
    }
}
