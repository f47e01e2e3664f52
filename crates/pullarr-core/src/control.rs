//! Cancellation plumbing for in-flight transfers.
//!
//! Each download with files transferring holds one abort token shared by all
//! of its workers. The reconciler aborts a download's transfers when the
//! remote drops it; shutdown aborts everything and waits up to a grace
//! period. Aborted files are left resumable on disk, never deleted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::model::DownloadId;

struct Entry {
    token: Arc<AtomicBool>,
    refs: usize,
}

/// Shared registry of download key -> abort token with per-worker refcounts.
/// A token outlives individual workers of the same download so cancelling a
/// download stops every file it still has in flight.
#[derive(Default)]
pub struct SyncControl {
    entries: RwLock<HashMap<String, Entry>>,
}

impl SyncControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one worker for a download; returns the shared abort token.
    /// Call `release` with the same id when the worker finishes.
    pub fn register(&self, id: &DownloadId) -> Arc<AtomicBool> {
        let mut entries = self.entries.write().unwrap();
        let entry = entries.entry(id.as_key()).or_insert_with(|| Entry {
            token: Arc::new(AtomicBool::new(false)),
            refs: 0,
        });
        entry.refs += 1;
        Arc::clone(&entry.token)
    }

    /// Release one worker's hold; the token is dropped when the last worker
    /// of the download releases.
    pub fn release(&self, id: &DownloadId) {
        let mut entries = self.entries.write().unwrap();
        let key = id.as_key();
        if let Some(entry) = entries.get_mut(&key) {
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs == 0 {
                entries.remove(&key);
            }
        }
    }

    /// Request abort for every in-flight transfer of one download.
    pub fn request_abort(&self, id: &DownloadId) {
        if let Some(entry) = self.entries.read().unwrap().get(&id.as_key()) {
            entry.token.store(true, Ordering::Relaxed);
        }
    }

    /// Request abort for everything (graceful shutdown).
    pub fn abort_all(&self) {
        for entry in self.entries.read().unwrap().values() {
            entry.token.store(true, Ordering::Relaxed);
        }
    }

    /// Number of downloads with at least one registered worker.
    pub fn active_downloads(&self) -> usize {
        self.entries.read().unwrap().len()
    }
}
