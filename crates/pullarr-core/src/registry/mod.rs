//! Job registry: the single authoritative map of tracked downloads.
//!
//! Every stage reads records from here before acting and writes results back
//! after acting. One async mutex over the map serializes all mutations, so a
//! reader never sees a record mixing pre- and post-transition fields. Each
//! mutation is persisted to SQLite before the lock is dropped.

pub mod db;

pub use db::{unix_timestamp, StateDb};

use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::model::{
    AppJobStatus, DownloadId, DownloadRecord, MoveStatus, SyncFileStatus,
};

/// One claimed file handed to a sync worker: enough to locate the remote
/// bytes and size-check the result.
#[derive(Debug, Clone)]
pub struct SyncClaim {
    pub id: DownloadId,
    /// Remote content root of the download (unmapped).
    pub remote_path: String,
    /// File path relative to the content root.
    pub path: String,
    pub size: u64,
    /// Bytes already staged locally; the transfer resumes from here.
    pub resume: u64,
}

/// Authoritative registry of downloads keyed by `DownloadId::as_key()`.
pub struct JobRegistry {
    db: StateDb,
    records: Mutex<HashMap<String, DownloadRecord>>,
}

impl JobRegistry {
    /// Load persisted records and rehydrate. In-flight statuses from a prior
    /// run are demoted so eligibility is re-derived from the next poll rather
    /// than trusted as still accurate.
    pub async fn open(db: StateDb) -> Result<Self> {
        let mut map = HashMap::new();
        for mut rec in db.load_all().await? {
            rehydrate(&mut rec);
            db.upsert(&rec).await?;
            map.insert(rec.id.as_key(), rec);
        }
        if !map.is_empty() {
            tracing::info!("rehydrated {} tracked download(s)", map.len());
        }
        Ok(Self {
            db,
            records: Mutex::new(map),
        })
    }

    /// Insert a newly discovered download and persist it.
    pub async fn insert(&self, rec: DownloadRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        self.db.upsert(&rec).await?;
        records.insert(rec.id.as_key(), rec);
        Ok(())
    }

    /// Clone of one record (consistent snapshot).
    pub async fn get(&self, id: &DownloadId) -> Option<DownloadRecord> {
        self.records.lock().await.get(&id.as_key()).cloned()
    }

    /// Consistent snapshot of every tracked download, ordered by key.
    pub async fn snapshot(&self) -> Vec<DownloadRecord> {
        let records = self.records.lock().await;
        let mut all: Vec<DownloadRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.id.as_key().cmp(&b.id.as_key()));
        all
    }

    /// Keys of all records belonging to one source.
    pub async fn keys_for_source(&self, source: &str) -> Vec<DownloadId> {
        self.records
            .lock()
            .await
            .values()
            .filter(|r| r.id.source == source)
            .map(|r| r.id.clone())
            .collect()
    }

    /// Mutate one record under the lock and persist the result. Returns the
    /// closure's value, or `None` if the download is not tracked.
    pub async fn update<F, R>(&self, id: &DownloadId, f: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut DownloadRecord) -> R,
    {
        let mut records = self.records.lock().await;
        let Some(rec) = records.get_mut(&id.as_key()) else {
            return Ok(None);
        };
        let out = f(rec);
        rec.updated_at = unix_timestamp();
        self.db.upsert(rec).await?;
        Ok(Some(out))
    }

    /// Drop a download from active tracking (registry and database).
    pub async fn remove(&self, id: &DownloadId) -> Result<()> {
        let mut records = self.records.lock().await;
        records.remove(&id.as_key());
        self.db.delete(&id.as_key()).await?;
        Ok(())
    }

    /// Claim up to `limit` pending sync files, marking them `Transferring`
    /// under the lock so repeated calls never double-assign a file.
    pub async fn claim_sync_files(&self, limit: usize) -> Result<Vec<SyncClaim>> {
        let mut claims = Vec::new();
        if limit == 0 {
            return Ok(claims);
        }
        let mut records = self.records.lock().await;
        let mut keys: Vec<String> = records.keys().cloned().collect();
        keys.sort();
        'outer: for key in keys {
            let rec = records.get_mut(&key).expect("key from same map");
            if rec.removed {
                continue;
            }
            let remote_path = rec.remote_path.clone();
            let id = rec.id.clone();
            let mut dirty = false;
            if let Some(sync) = rec.sync.as_mut() {
                for file in sync.files.iter_mut() {
                    if file.status != SyncFileStatus::Pending {
                        continue;
                    }
                    file.status = SyncFileStatus::Transferring;
                    file.speed_bps = 0;
                    dirty = true;
                    claims.push(SyncClaim {
                        id: id.clone(),
                        remote_path: remote_path.clone(),
                        path: file.path.clone(),
                        size: file.size,
                        resume: file.transferred,
                    });
                    if claims.len() >= limit {
                        break;
                    }
                }
            }
            if dirty {
                rec.updated_at = unix_timestamp();
                self.db.upsert(rec).await?;
            }
            if claims.len() >= limit {
                break 'outer;
            }
        }
        Ok(claims)
    }
}

/// Demote statuses that claim in-flight work from a previous process run.
fn rehydrate(rec: &mut DownloadRecord) {
    if let Some(sync) = rec.sync.as_mut() {
        for file in sync.files.iter_mut() {
            if file.status == SyncFileStatus::Transferring {
                file.status = SyncFileStatus::Pending;
                file.speed_bps = 0;
            }
        }
    }
    // An interrupted move or notification is re-derived from scratch.
    if rec
        .move_job
        .as_ref()
        .is_some_and(|m| m.status == MoveStatus::Pending)
    {
        rec.move_job = None;
    }
    rec.apps.retain(|a| a.status != AppJobStatus::Pending);
}
