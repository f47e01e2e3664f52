//! Transfer capability: the contract the sync scheduler invokes to copy
//! one remote file into staging, plus the error taxonomy workers use to
//! decide whether a failure is an abort, a size problem, or plain I/O.

pub mod mount;

pub use mount::MountTransfer;

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error from one file transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Stopped by cancellation; the partial local file is resumable.
    #[error("transfer aborted")]
    Aborted,
    /// Bytes seen disagree with the expected file size. Never clamped; the
    /// file is errored so the mismatch is visible.
    #[error("size mismatch: expected {expected} bytes, got {received}")]
    SizeMismatch { expected: u64, received: u64 },
    #[error("transfer i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Copies one remote file to a local path.
///
/// Implementations resume from `offset` (bytes already present locally),
/// may use up to `streams` internal parallel streams, report cumulative
/// local bytes on `progress`, and stop promptly when `abort` is set,
/// leaving the partial file on disk.
#[async_trait]
pub trait Transfer: Send + Sync {
    async fn fetch(
        &self,
        remote_path: &Path,
        local_path: &Path,
        size: u64,
        offset: u64,
        streams: usize,
        progress: mpsc::Sender<u64>,
        abort: Arc<AtomicBool>,
    ) -> Result<u64, TransferError>;
}
