//! The orchestration engine: one reconciliation cycle per poll interval.
//!
//! A cycle polls every source, merges the snapshots into the registry,
//! dispatches sync workers up to the concurrency bound, and spawns move,
//! notify, and cleanup tasks for records that have become eligible. Stage
//! tasks run detached from the cycle, so a slow move or importer never
//! delays the next poll.

use anyhow::Result;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::config::PullarrConfig;
use crate::control::SyncControl;
use crate::layout;
use crate::model::{AppJob, AppJobStatus, DownloadRecord, MoveJob, MoveStatus, SyncJobStatus};
use crate::notify::{self, Importer};
use crate::reconcile::{self, ReconcilePolicy};
use crate::registry::{unix_timestamp, JobRegistry};
use crate::relocate;
use crate::remote::{poll_sources, RemoteSource, SourcePoll};
use crate::sync::SyncScheduler;
use crate::transfer::Transfer;

pub struct Engine {
    cfg: PullarrConfig,
    registry: Arc<JobRegistry>,
    control: Arc<SyncControl>,
    sources: Vec<Arc<dyn RemoteSource>>,
    importers: Vec<Arc<dyn Importer>>,
    scheduler: SyncScheduler,
    policy: ReconcilePolicy,
    /// Detached move/notify/cleanup tasks, reaped each cycle.
    stages: JoinSet<()>,
}

impl Engine {
    pub fn new(
        cfg: PullarrConfig,
        registry: Arc<JobRegistry>,
        sources: Vec<Arc<dyn RemoteSource>>,
        importers: Vec<Arc<dyn Importer>>,
        transfer: Arc<dyn Transfer>,
    ) -> Self {
        let control = Arc::new(SyncControl::new());
        let scheduler = SyncScheduler::new(
            Arc::clone(&registry),
            transfer,
            Arc::clone(&control),
            &cfg,
        );
        let policy = ReconcilePolicy {
            cleanup_on_remove: cfg.cleanup_on_remove_categories().into_iter().collect(),
            ..ReconcilePolicy::default()
        };
        Self {
            cfg,
            registry,
            control,
            sources,
            importers,
            scheduler,
            policy,
            stages: JoinSet::new(),
        }
    }

    /// Run cycles until `shutdown` resolves, then stop gracefully.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.cfg.poll_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.cycle().await {
                        tracing::error!("cycle failed: {e:#}");
                    }
                }
                _ = &mut shutdown => break,
            }
        }
        tracing::info!("shutting down");
        self.scheduler
            .shutdown(Duration::from_secs(self.cfg.shutdown_grace_secs))
            .await;
        while self.stages.join_next().await.is_some() {}
        Ok(())
    }

    /// One full reconciliation cycle.
    pub async fn cycle(&mut self) -> Result<()> {
        let records = self.registry.snapshot().await;
        let skip_detail = skip_detail_keys(&records);
        let polls = poll_sources(
            &self.sources,
            |name| {
                self.cfg
                    .source(name)
                    .map(|s| s.categories.clone())
                    .unwrap_or_default()
            },
            &skip_detail,
            Duration::from_secs(self.cfg.remote_timeout_secs),
        )
        .await;
        for poll in &polls {
            match poll {
                SourcePoll::Snapshot(snapshot) => {
                    reconcile::apply_snapshot(
                        &self.registry,
                        &self.control,
                        snapshot,
                        &self.policy,
                    )
                    .await?;
                }
                SourcePoll::Unreachable { source, error } => {
                    // Downloads of an unreachable source stay in their
                    // current state; the failure is surfaced on each record
                    // and cleared again by the next successful poll.
                    for id in self.registry.keys_for_source(source).await {
                        self.registry
                            .update(&id, |rec| rec.last_error = Some(error.clone()))
                            .await?;
                    }
                }
            }
        }

        self.scheduler.dispatch().await?;
        while self.stages.try_join_next().is_some() {}
        self.dispatch_stages().await?;
        self.prune_settled().await?;
        Ok(())
    }

    /// Spawn move, notify, and cleanup tasks for newly eligible records.
    async fn dispatch_stages(&mut self) -> Result<()> {
        for rec in self.registry.snapshot().await {
            if wants_move(&rec) {
                self.spawn_move(&rec).await?;
            } else if wants_notify(&rec, &self.importers) {
                self.spawn_notify(&rec).await?;
            }
            if wants_cleanup(&rec) {
                self.spawn_cleanup(&rec);
            }
        }
        Ok(())
    }

    async fn spawn_move(&mut self, rec: &DownloadRecord) -> Result<()> {
        let from = layout::staging_dir(&self.cfg.staging_dir, &rec.id);
        let to = layout::library_dir(&self.cfg.destination_dir, &rec.id, &rec.category);
        let id = rec.id.clone();
        // Pending marks the move in flight; a later cycle will not re-spawn.
        self.registry
            .update(&id, |r| {
                r.move_job = Some(MoveJob {
                    from: from.to_string_lossy().into_owned(),
                    to: to.to_string_lossy().into_owned(),
                    status: MoveStatus::Pending,
                    started_at: unix_timestamp(),
                    finished_at: None,
                    error: None,
                });
            })
            .await?;
        tracing::info!(download = %id, to = %to.display(), "moving to library");
        let registry = Arc::clone(&self.registry);
        self.stages.spawn(async move {
            let outcome = relocate::relocate(from, to).await;
            let now = unix_timestamp();
            let update = registry
                .update(&id, |r| {
                    let Some(job) = r.move_job.as_mut() else {
                        return;
                    };
                    job.finished_at = Some(now);
                    match &outcome {
                        Ok(()) => job.status = MoveStatus::Done,
                        Err(e) => {
                            job.status = MoveStatus::Failed;
                            job.error = Some(format!("{e:#}"));
                        }
                    }
                })
                .await;
            if let Err(e) = &outcome {
                tracing::warn!(download = %id, "move failed: {e:#}");
            }
            if let Err(e) = update {
                tracing::error!(download = %id, "persist move result: {e:#}");
            }
        });
        Ok(())
    }

    async fn spawn_notify(&mut self, rec: &DownloadRecord) -> Result<()> {
        let apps: Vec<String> = self
            .importers
            .iter()
            .filter(|imp| {
                imp.categories().iter().any(|c| c == &rec.category)
                    && !rec
                        .app_job(imp.name())
                        .is_some_and(|a| a.status == AppJobStatus::Sent)
            })
            .map(|imp| imp.name().to_string())
            .collect();
        let id = rec.id.clone();
        // Pending marks the notify in flight; a later cycle will not re-spawn.
        self.registry
            .update(&id, |r| {
                for app in &apps {
                    match r.apps.iter_mut().find(|a| &a.app == app) {
                        Some(job) => job.status = AppJobStatus::Pending,
                        None => r.apps.push(AppJob {
                            app: app.clone(),
                            status: AppJobStatus::Pending,
                            path: None,
                            category: None,
                            error: None,
                        }),
                    }
                }
            })
            .await?;
        let registry = Arc::clone(&self.registry);
        let importers = self.importers.clone();
        let timeout = Duration::from_secs(self.cfg.notify_timeout_secs);
        self.stages.spawn(async move {
            if let Err(e) = notify::notify_download(&registry, &importers, &id, timeout).await {
                tracing::error!(download = %id, "notify stage failed: {e:#}");
            }
        });
        Ok(())
    }

    fn spawn_cleanup(&mut self, rec: &DownloadRecord) {
        let Some(to) = rec.move_job.as_ref().map(|m| m.to.clone()) else {
            return;
        };
        let registry = Arc::clone(&self.registry);
        let id = rec.id.clone();
        self.stages.spawn(async move {
            if let Err(e) = notify::cleanup_download(&registry, &id, to.into()).await {
                tracing::error!(download = %id, "cleanup failed: {e:#}");
            }
        });
    }

    /// Drop records the remote no longer reports once every stage is settled.
    async fn prune_settled(&mut self) -> Result<()> {
        for rec in self.registry.snapshot().await {
            if rec.removed && rec.is_settled() {
                tracing::info!(download = %rec.id, state = rec.state().as_str(), "pruning");
                self.registry.remove(&rec.id).await?;
            }
        }
        Ok(())
    }

    /// Transfers currently running (for status reporting and tests).
    pub fn syncs_in_flight(&mut self) -> usize {
        self.scheduler.in_flight()
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Wait for all in-flight sync workers and stage tasks (tests).
    pub async fn settle(&mut self) {
        self.scheduler.drain().await;
        while self.stages.join_next().await.is_some() {}
    }
}

/// Every selected file is complete both remotely and in staging. A closed
/// sync job alone is not enough: the remote may still be finishing files
/// that will reopen the job on a later poll.
fn fully_synced(rec: &DownloadRecord) -> bool {
    let Some(sync) = rec.sync.as_ref() else {
        return false;
    };
    if sync.status != SyncJobStatus::Complete {
        return false;
    }
    let mut any_selected = false;
    for file in rec.files.iter().filter(|f| f.selected()) {
        any_selected = true;
        let staged = file.remote_complete()
            && sync
                .file(&file.path)
                .is_some_and(|s| s.status == crate::model::SyncFileStatus::Complete);
        if !staged {
            return false;
        }
    }
    any_selected
}

/// `source/name` keys whose file detail need not be re-fetched: everything
/// selected is already synced, so per-file progress no longer matters.
fn skip_detail_keys(records: &[DownloadRecord]) -> HashSet<String> {
    records
        .iter()
        .filter(|r| fully_synced(r))
        .map(|r| r.id.as_key())
        .collect()
}

/// Sync finished and no move recorded (or the last one failed).
fn wants_move(rec: &DownloadRecord) -> bool {
    let move_open = match rec.move_job.as_ref() {
        None => true,
        Some(m) => m.status == MoveStatus::Failed,
    };
    fully_synced(rec) && move_open
}

/// Moved, and some importer for this category has not been told yet.
/// A `Pending` app job means a notify task is already in flight.
fn wants_notify(rec: &DownloadRecord, importers: &[Arc<dyn Importer>]) -> bool {
    if !rec
        .move_job
        .as_ref()
        .is_some_and(|m| m.status == MoveStatus::Done)
    {
        return false;
    }
    if rec
        .apps
        .iter()
        .any(|a| a.status == AppJobStatus::Pending)
    {
        return false;
    }
    importers.iter().any(|imp| {
        imp.categories().iter().any(|c| c == &rec.category)
            && !rec
                .app_job(imp.name())
                .is_some_and(|a| a.status == AppJobStatus::Sent)
    })
}

fn wants_cleanup(rec: &DownloadRecord) -> bool {
    rec.cleanup_pending && !rec.cleaned && rec.any_app_imported()
}
