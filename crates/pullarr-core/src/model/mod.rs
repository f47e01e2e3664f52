//! Data model for tracked downloads and their pipeline sub-jobs.
//!
//! A `DownloadRecord` is the unit of orchestration: one remotely-tracked item
//! (e.g. a torrent) plus its sync, move, and app-notification sub-jobs. The
//! registry owns the records; stages mutate them through it.

pub mod status;

pub use status::{
    AggregateState, AppJobStatus, MoveStatus, SyncFileStatus, SyncJobStatus,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a download: source name plus download name.
///
/// Remote ids (torrent hashes) are not guaranteed stable across client
/// restarts, so identity is derived from what is stable in practice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadId {
    pub source: String,
    pub name: String,
}

impl DownloadId {
    pub fn new(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
        }
    }

    /// Key used in the registry map and the database primary key.
    pub fn as_key(&self) -> String {
        format!("{}/{}", self.source, self.name)
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.name)
    }
}

/// One file of a download as reported by the remote source.
///
/// `path` and `size` are fixed once observed; a size change on the same path
/// means a different revision and is handled by the reconciler as a new file.
/// `remote_done` is monotonically non-decreasing per revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadFile {
    /// Path relative to the download's remote content root.
    pub path: String,
    pub size: u64,
    /// Bytes the remote client has completed for this file.
    pub remote_done: u64,
    /// Selection priority; 0 means deselected (never transferred).
    pub priority: u8,
}

impl DownloadFile {
    pub fn selected(&self) -> bool {
        self.priority > 0
    }

    /// Fully completed on the remote side.
    pub fn remote_complete(&self) -> bool {
        self.remote_done >= self.size
    }

    /// Eligible for local transfer: selected and remote-complete.
    pub fn syncable(&self) -> bool {
        self.selected() && self.remote_complete()
    }
}

/// Local transfer record for one file, mirroring a `DownloadFile` by path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncFile {
    pub path: String,
    pub size: u64,
    /// Bytes transferred locally; never exceeds `size` (mismatch errors the file).
    pub transferred: u64,
    pub status: SyncFileStatus,
    /// Rolling transfer speed in bytes/sec while in flight.
    pub speed_bps: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl SyncFile {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            transferred: 0,
            status: SyncFileStatus::Pending,
            speed_bps: 0,
            error: None,
        }
    }
}

/// Local transfer job for a download; exists from the first eligible file
/// until every selected file reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub status: SyncJobStatus,
    pub files: Vec<SyncFile>,
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub finished_at: Option<i64>,
}

impl SyncJob {
    pub fn new(started_at: i64) -> Self {
        Self {
            status: SyncJobStatus::Running,
            files: Vec::new(),
            started_at,
            finished_at: None,
        }
    }

    pub fn file(&self, path: &str) -> Option<&SyncFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn file_mut(&mut self, path: &str) -> Option<&mut SyncFile> {
        self.files.iter_mut().find(|f| f.path == path)
    }

    /// True when every tracked file is `Complete`.
    pub fn all_complete(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(|f| f.status == SyncFileStatus::Complete)
    }

    /// True while any file is still pending or transferring.
    pub fn has_open_files(&self) -> bool {
        self.files.iter().any(|f| {
            matches!(
                f.status,
                SyncFileStatus::Pending | SyncFileStatus::Transferring
            )
        })
    }
}

/// Relocation of a fully-synced download from staging to final storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveJob {
    pub from: String,
    pub to: String,
    pub status: MoveStatus,
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub finished_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// One notification attempt to one downstream app for one download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppJob {
    pub app: String,
    pub status: AppJobStatus,
    /// Final library path handed to the app.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<String>,
    /// Remote category at the time of a successful notification; a later
    /// category mismatch marks the download eligible for cleanup.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// Full pipeline state of one tracked download. Sub-jobs are created and
/// mutated in place by their owning stage and retained after terminal status
/// for API visibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: DownloadId,
    pub category: String,
    /// Content root on the remote side, as reported by the source.
    pub remote_path: String,
    pub first_seen: i64,
    pub updated_at: i64,
    pub files: Vec<DownloadFile>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sync: Option<SyncJob>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub move_job: Option<MoveJob>,
    #[serde(default)]
    pub apps: Vec<AppJob>,
    /// Consecutive successful polls of this source that did not report it.
    #[serde(default)]
    pub missed_polls: u32,
    #[serde(default)]
    pub removed: bool,
    #[serde(default)]
    pub cleanup_pending: bool,
    #[serde(default)]
    pub cleaned: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_error: Option<String>,
}

impl DownloadRecord {
    pub fn new(id: DownloadId, category: String, remote_path: String, now: i64) -> Self {
        Self {
            id,
            category,
            remote_path,
            first_seen: now,
            updated_at: now,
            files: Vec::new(),
            sync: None,
            move_job: None,
            apps: Vec::new(),
            missed_polls: 0,
            removed: false,
            cleanup_pending: false,
            cleaned: false,
            last_error: None,
        }
    }

    pub fn file(&self, path: &str) -> Option<&DownloadFile> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Aggregate pipeline state computed from sub-job statuses.
    pub fn state(&self) -> AggregateState {
        status::aggregate_state(self)
    }

    /// Every pipeline stage terminal (or never started); safe to drop from
    /// active tracking once the remote no longer reports the download.
    pub fn is_settled(&self) -> bool {
        let sync_open = self
            .sync
            .as_ref()
            .is_some_and(|s| s.status == SyncJobStatus::Running && s.has_open_files());
        let move_open = self
            .move_job
            .as_ref()
            .is_some_and(|m| m.status == MoveStatus::Pending);
        let app_open = self.apps.iter().any(|a| a.status == AppJobStatus::Pending);
        !sync_open && !move_open && !app_open && !self.cleanup_pending
    }

    pub fn app_job(&self, app: &str) -> Option<&AppJob> {
        self.apps.iter().find(|a| a.app == app)
    }

    /// At least one app import succeeded; precondition for any cleanup.
    pub fn any_app_imported(&self) -> bool {
        self.apps.iter().any(|a| a.status == AppJobStatus::Sent)
    }
}
