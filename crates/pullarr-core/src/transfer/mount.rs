//! Transfer backend for remotes mounted on the local filesystem
//! (sshfs, NFS, rclone mount). Chunked copy on the blocking pool with
//! per-chunk abort checks and cumulative progress reports.

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{Transfer, TransferError};

const DEFAULT_CHUNK: usize = 1 << 20;

/// Mounted-filesystem `Transfer` backend.
pub struct MountTransfer {
    chunk_size: usize,
}

impl MountTransfer {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK,
        }
    }

    #[cfg(test)]
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self { chunk_size }
    }
}

impl Default for MountTransfer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transfer for MountTransfer {
    async fn fetch(
        &self,
        remote_path: &Path,
        local_path: &Path,
        size: u64,
        offset: u64,
        _streams: usize,
        progress: mpsc::Sender<u64>,
        abort: Arc<AtomicBool>,
    ) -> Result<u64, TransferError> {
        // Mounted reads are sequential; the stream count is advisory here.
        let remote = remote_path.to_path_buf();
        let local = local_path.to_path_buf();
        let chunk = self.chunk_size;
        tokio::task::spawn_blocking(move || {
            copy_resumable(&remote, &local, size, offset, chunk, &progress, &abort)
        })
        .await
        .map_err(|e| TransferError::Other(anyhow::anyhow!("transfer task join: {e}")))?
    }
}

fn copy_resumable(
    remote: &Path,
    local: &Path,
    size: u64,
    offset: u64,
    chunk: usize,
    progress: &mpsc::Sender<u64>,
    abort: &AtomicBool,
) -> Result<u64, TransferError> {
    let src_len = std::fs::metadata(remote)?.len();
    if src_len != size {
        return Err(TransferError::SizeMismatch {
            expected: size,
            received: src_len,
        });
    }

    let mut src = File::open(remote)?;
    let mut dst = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(local)?;
    // Anything past the resume point is untrusted.
    dst.set_len(offset)?;
    dst.seek(SeekFrom::Start(offset))?;
    src.seek(SeekFrom::Start(offset))?;

    let mut done = offset;
    let mut buf = vec![0u8; chunk.max(1)];
    loop {
        if abort.load(Ordering::Relaxed) {
            let _ = dst.sync_all();
            return Err(TransferError::Aborted);
        }
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])?;
        done += n as u64;
        if done > size {
            return Err(TransferError::SizeMismatch {
                expected: size,
                received: done,
            });
        }
        let _ = progress.try_send(done);
    }
    dst.sync_all()?;

    if done != size {
        return Err(TransferError::SizeMismatch {
            expected: size,
            received: done,
        });
    }
    Ok(done)
}
