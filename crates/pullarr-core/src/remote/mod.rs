//! Remote download sources: the capability interface and polled snapshots.
//!
//! The orchestrator depends only on `RemoteSource`; concrete client
//! integrations (`qbittorrent`) implement it. A snapshot is one consistent
//! observation of one source, produced by the poller each cycle.

pub mod poller;
pub mod qbittorrent;

pub use poller::{poll_sources, SourcePoll};
pub use qbittorrent::QbitSource;

use anyhow::Result;
use async_trait::async_trait;

/// One download as listed by a remote client.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDownload {
    pub name: String,
    pub category: String,
    /// Content root on the remote side (save path of the download).
    pub remote_path: String,
}

/// One file of a remote download with its remote completion progress.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFile {
    /// Path relative to the download's content root.
    pub path: String,
    pub size: u64,
    /// Bytes completed on the remote side.
    pub done: u64,
    /// Selection priority; 0 = excluded from transfer.
    pub priority: u8,
}

/// Capability contract for a remote download client.
///
/// Identities must be stable within a session; sizes and progress are bytes.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    fn name(&self) -> &str;

    /// Current downloads in the given categories.
    async fn list_downloads(&self, categories: &[String]) -> Result<Vec<RemoteDownload>>;

    /// Per-file detail for one download.
    async fn get_files(&self, name: &str) -> Result<Vec<RemoteFile>>;
}

/// One download inside a snapshot. `files` is `None` when the poller skipped
/// detail (download already fully synced locally).
#[derive(Debug, Clone)]
pub struct PolledDownload {
    pub download: RemoteDownload,
    pub files: Option<Vec<RemoteFile>>,
}

/// Consistent observation of one source for one poll cycle.
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    pub source: String,
    pub downloads: Vec<PolledDownload>,
}
