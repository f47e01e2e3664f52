//! Move stage: relocate a fully-synced download from staging to the library.
//!
//! Same-filesystem moves are a single atomic rename. Across filesystems the
//! fallback is copy, verify (SHA-256), then delete the staged original; a
//! verification failure fails the whole move rather than leaving a silently
//! partial library entry. Re-invocation after a partial failure detects
//! already-moved files by size and checksum and skips them.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::checksum::sha256_path;

/// Relocate `src` (file or directory) to `dest` on the blocking pool.
pub async fn relocate(src: PathBuf, dest: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || move_tree(&src, &dest))
        .await
        .context("move task join")?
}

/// Blocking move with rename-first and verified-copy fallback.
pub fn move_tree(src: &Path, dest: &Path) -> Result<()> {
    if !src.exists() {
        if dest.exists() {
            // A prior attempt finished after recording a failure; done.
            return Ok(());
        }
        bail!("move source missing: {}", src.display());
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create destination parent: {}", parent.display()))?;
    }

    match fs::rename(src, dest) {
        Ok(()) => return Ok(()),
        Err(e) if is_cross_device(&e) => {
            tracing::debug!(
                src = %src.display(),
                dest = %dest.display(),
                "cross-filesystem move; falling back to verified copy"
            );
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!("rename {} to {}", src.display(), dest.display())
            });
        }
    }

    copy_verified(src, dest)?;
    if src.is_dir() {
        fs::remove_dir_all(src)
            .with_context(|| format!("remove staged source: {}", src.display()))?;
    } else {
        fs::remove_file(src)
            .with_context(|| format!("remove staged source: {}", src.display()))?;
    }
    Ok(())
}

#[cfg(unix)]
fn is_cross_device(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(e: &std::io::Error) -> bool {
    // 17 = ERROR_NOT_SAME_DEVICE on Windows.
    e.raw_os_error() == Some(17)
}

/// Copy `src` into `dest`, skipping files already present with matching
/// size and checksum, and verifying every copied file.
pub(crate) fn copy_verified(src: &Path, dest: &Path) -> Result<()> {
    if src.is_file() {
        return copy_file_verified(src, dest);
    }
    fs::create_dir_all(dest)
        .with_context(|| format!("create destination dir: {}", dest.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("read dir {}", src.display()))? {
        let entry = entry?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        if from.is_dir() {
            copy_verified(&from, &to)?;
        } else {
            copy_file_verified(&from, &to)?;
        }
    }
    Ok(())
}

fn copy_file_verified(src: &Path, dest: &Path) -> Result<()> {
    let src_len = fs::metadata(src)
        .with_context(|| format!("stat {}", src.display()))?
        .len();
    if dest.exists() {
        let dest_len = fs::metadata(dest)
            .with_context(|| format!("stat {}", dest.display()))?
            .len();
        if dest_len == src_len && sha256_path(dest)? == sha256_path(src)? {
            tracing::debug!(path = %dest.display(), "already moved; skipping");
            return Ok(());
        }
        // Mismatched leftover from an interrupted attempt; replace it.
        fs::remove_file(dest)
            .with_context(|| format!("remove stale copy {}", dest.display()))?;
    }
    fs::copy(src, dest)
        .with_context(|| format!("copy {} to {}", src.display(), dest.display()))?;
    if sha256_path(dest)? != sha256_path(src)? {
        bail!(
            "verification failed after copy: {} differs from {}",
            dest.display(),
            src.display()
        );
    }
    Ok(())
}
