//! `pullarr run` – the long-running reconciliation loop.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;

use pullarr_core::config::{PullarrConfig, SourceKind};
use pullarr_core::engine::Engine;
use pullarr_core::notify::arr::ArrImporter;
use pullarr_core::notify::Importer;
use pullarr_core::registry::{JobRegistry, StateDb};
use pullarr_core::remote::{QbitSource, RemoteSource};
use pullarr_core::transfer::MountTransfer;

pub async fn run_engine(cfg: PullarrConfig, once: bool) -> Result<()> {
    if cfg.sources.is_empty() {
        bail!("no [[source]] configured; edit the config file and retry");
    }

    let db = StateDb::open_default().await?;
    let registry = Arc::new(JobRegistry::open(db).await?);
    let sources = build_sources(&cfg);
    let importers = build_importers(&cfg);
    let transfer = Arc::new(MountTransfer::new());

    tracing::info!(
        sources = sources.len(),
        apps = importers.len(),
        interval = cfg.poll_interval_secs,
        "engine starting"
    );
    let mut engine = Engine::new(cfg, registry, sources, importers, transfer);

    if once {
        engine.cycle().await?;
        engine.settle().await;
        return Ok(());
    }

    engine
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("ctrl-c handler failed: {e:#}");
                // Without a signal handler the loop would be unstoppable.
                std::future::pending::<()>().await;
            }
            tracing::info!("interrupt received");
        })
        .await
        .context("engine loop")
}

pub fn build_sources(cfg: &PullarrConfig) -> Vec<Arc<dyn RemoteSource>> {
    let timeout = Duration::from_secs(cfg.remote_timeout_secs);
    cfg.sources
        .iter()
        .map(|s| match s.kind {
            SourceKind::Qbittorrent => Arc::new(QbitSource::new(
                &s.name,
                &s.url,
                s.username.clone(),
                s.password.clone(),
                timeout,
            )) as Arc<dyn RemoteSource>,
        })
        .collect()
}

pub fn build_importers(cfg: &PullarrConfig) -> Vec<Arc<dyn Importer>> {
    let timeout = Duration::from_secs(cfg.notify_timeout_secs);
    cfg.apps
        .iter()
        .map(|a| Arc::new(ArrImporter::new(a, timeout)) as Arc<dyn Importer>)
        .collect()
}
