//! Notification stage: tell downstream importers about moved downloads, and
//! clean up local copies the remote has dropped.
//!
//! An app job is retried on later cycles as long as it has not reached
//! `Sent`; a failed trigger never blocks other apps for the same download.

pub mod arr;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::model::{AppJob, AppJobStatus, DownloadId, MoveStatus};
use crate::registry::JobRegistry;

/// A downstream application that imports finished downloads from the library.
#[async_trait]
pub trait Importer: Send + Sync {
    fn name(&self) -> &str;
    /// Categories this importer handles.
    fn categories(&self) -> &[String];
    /// Ask the app to scan and import the given library path.
    async fn trigger_import(&self, path: &Path) -> Result<()>;
    /// Cheap reachability/auth check, used by `pullarr check`.
    async fn test_connection(&self) -> Result<()>;
}

fn handles(importer: &dyn Importer, category: &str) -> bool {
    importer.categories().iter().any(|c| c == category)
}

/// Notify every matching importer that has not yet been successfully told
/// about this download. The move must have completed first.
pub async fn notify_download(
    registry: &JobRegistry,
    importers: &[Arc<dyn Importer>],
    id: &DownloadId,
    timeout: Duration,
) -> Result<()> {
    let Some(rec) = registry.get(id).await else {
        return Ok(());
    };
    let Some(move_job) = rec.move_job.as_ref() else {
        return Ok(());
    };
    if move_job.status != MoveStatus::Done {
        return Ok(());
    }
    let library_path = PathBuf::from(&move_job.to);
    let category = rec.category.clone();

    for importer in importers {
        if !handles(importer.as_ref(), &category) {
            continue;
        }
        let already_sent = rec
            .app_job(importer.name())
            .is_some_and(|a| a.status == AppJobStatus::Sent);
        if already_sent {
            continue;
        }

        let app = importer.name().to_string();
        registry
            .update(id, |r| {
                upsert_app_job(r, &app, AppJobStatus::Pending, &library_path, None);
            })
            .await?;

        let outcome = match tokio::time::timeout(timeout, importer.trigger_import(&library_path))
            .await
        {
            Ok(res) => res,
            Err(_) => Err(anyhow!("import trigger timed out after {:?}", timeout)),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(download = %id, app = %app, "import triggered");
                let cat = category.clone();
                registry
                    .update(id, |r| {
                        upsert_app_job(r, &app, AppJobStatus::Sent, &library_path, None);
                        if let Some(job) = r.apps.iter_mut().find(|a| a.app == app) {
                            job.category = Some(cat);
                        }
                    })
                    .await?;
            }
            Err(e) => {
                tracing::warn!(download = %id, app = %app, error = %e, "import trigger failed");
                let msg = e.to_string();
                registry
                    .update(id, |r| {
                        upsert_app_job(r, &app, AppJobStatus::Failed, &library_path, Some(msg));
                    })
                    .await?;
            }
        }
    }
    Ok(())
}

fn upsert_app_job(
    rec: &mut crate::model::DownloadRecord,
    app: &str,
    status: AppJobStatus,
    path: &Path,
    error: Option<String>,
) {
    let path = Some(path.to_string_lossy().into_owned());
    match rec.apps.iter_mut().find(|a| a.app == app) {
        Some(job) => {
            job.status = status;
            job.path = path;
            job.error = error;
        }
        None => rec.apps.push(AppJob {
            app: app.to_string(),
            status,
            path,
            category: None,
            error,
        }),
    }
}

/// Delete the library copy of a download the remote has dropped.
///
/// Only runs once at least one importer confirmed the import, so the app had
/// its chance to hard-link or copy the content out.
pub async fn cleanup_download(
    registry: &JobRegistry,
    id: &DownloadId,
    library_dir: PathBuf,
) -> Result<()> {
    let Some(rec) = registry.get(id).await else {
        return Ok(());
    };
    if rec.cleaned || !rec.cleanup_pending || !rec.any_app_imported() {
        return Ok(());
    }

    let dir = library_dir.clone();
    let removed = tokio::task::spawn_blocking(move || match std::fs::remove_dir_all(&dir) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    })
    .await??;

    if removed {
        tracing::info!(download = %id, dir = %library_dir.display(), "cleaned library copy");
    } else {
        tracing::debug!(download = %id, "library copy already gone");
    }
    registry
        .update(id, |r| {
            r.cleaned = true;
            r.cleanup_pending = false;
        })
        .await?;
    Ok(())
}
