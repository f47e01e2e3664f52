//! Integration test: full pipeline against a tempdir standing in for the
//! seedbox mount. Drives the engine cycle by cycle through discovery, sync,
//! move, import notification, relabel-triggered cleanup, and pruning.

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use pullarr_core::config::{AppConfig, AppKind, PullarrConfig, SourceConfig, SourceKind};
use pullarr_core::engine::Engine;
use pullarr_core::model::{AggregateState, DownloadId};
use pullarr_core::notify::Importer;
use pullarr_core::registry::{JobRegistry, StateDb};
use pullarr_core::remote::RemoteSource;
use pullarr_core::transfer::MountTransfer;
use tempfile::tempdir;

use common::{file, FakeSource, RecordingImporter};

fn test_config(staging: &Path, library: &Path, categories: &[&str]) -> PullarrConfig {
    PullarrConfig {
        staging_dir: staging.to_path_buf(),
        destination_dir: library.to_path_buf(),
        poll_interval_secs: 1,
        remote_timeout_secs: 5,
        notify_timeout_secs: 5,
        shutdown_grace_secs: 2,
        sources: vec![SourceConfig {
            name: "seedbox".into(),
            kind: SourceKind::Qbittorrent,
            url: "http://unused".into(),
            username: None,
            password: None,
            categories: categories.iter().map(|c| c.to_string()).collect(),
            remote_path_prefix: None,
            local_path_prefix: None,
        }],
        apps: vec![AppConfig {
            name: "sonarr".into(),
            kind: AppKind::Sonarr,
            url: "http://unused".into(),
            api_key: "k".into(),
            categories: vec!["tv-sonarr".into()],
            cleanup_on_remove: true,
        }],
        ..PullarrConfig::default()
    }
}

async fn build_engine(
    cfg: PullarrConfig,
    state_dir: &Path,
    source: Arc<FakeSource>,
    importer: Arc<RecordingImporter>,
) -> Engine {
    let db = StateDb::open_at(state_dir.join("state.db")).await.unwrap();
    let registry = Arc::new(JobRegistry::open(db).await.unwrap());
    Engine::new(
        cfg,
        registry,
        vec![source as Arc<dyn RemoteSource>],
        vec![importer as Arc<dyn Importer>],
        Arc::new(MountTransfer::new()),
    )
}

/// One poll cycle plus a wait for every spawned worker and stage task.
async fn cycle_and_settle(engine: &mut Engine, n: usize) {
    for _ in 0..n {
        engine.cycle().await.unwrap();
        engine.settle().await;
    }
}

fn write_remote(remote: &Path, rel: &str, content: &[u8]) {
    let path = remote.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

async fn state_of(engine: &mut Engine, id: &DownloadId) -> AggregateState {
    engine
        .registry()
        .get(id)
        .await
        .map(|r| r.state())
        .expect("record tracked")
}

#[tokio::test]
async fn download_flows_from_discovery_to_cleanup() {
    let remote = tempdir().unwrap();
    let staging = tempdir().unwrap();
    let library = tempdir().unwrap();
    let state = tempdir().unwrap();

    let e1: Vec<u8> = vec![1u8; 3000];
    let e2: Vec<u8> = vec![2u8; 2000];
    write_remote(remote.path(), "Show.S01/e1.mkv", &e1);
    write_remote(remote.path(), "Show.S01/e2.mkv", &e2);

    let source = Arc::new(FakeSource::new("seedbox"));
    source.add(
        "Show.S01",
        "tv-sonarr",
        remote.path(),
        vec![
            file("Show.S01/e1.mkv", 3000, 3000),
            file("Show.S01/e2.mkv", 2000, 500),
        ],
    );
    let importer = Arc::new(RecordingImporter::new("sonarr", "tv-sonarr"));
    let cfg = test_config(
        staging.path(),
        library.path(),
        &["tv-sonarr", "tv-sonarr-done"],
    );
    let mut engine = build_engine(cfg, state.path(), source.clone(), importer.clone()).await;

    let id = DownloadId::new("seedbox", "Show.S01");

    // First cycle: only e1 is remote-complete. Its transfer finishes and the
    // job closes, but the pending e2 keeps the move from dispatching.
    cycle_and_settle(&mut engine, 1).await;
    assert_eq!(state_of(&mut engine, &id).await, AggregateState::Synced);
    let rec = engine.registry().get(&id).await.unwrap();
    assert!(rec.move_job.is_none());
    let staged_e1 = staging.path().join("seedbox/Show.S01/Show.S01/e1.mkv");
    assert_eq!(fs::read(&staged_e1).unwrap(), e1);
    assert!(!staging
        .path()
        .join("seedbox/Show.S01/Show.S01/e2.mkv")
        .exists());

    // Remote finishes e2; sync completes, then move and notify follow.
    source.set_done("Show.S01", "Show.S01/e2.mkv", 2000);
    cycle_and_settle(&mut engine, 3).await;
    assert_eq!(state_of(&mut engine, &id).await, AggregateState::Imported);

    let lib_dir = library.path().join("seedbox/tv-sonarr/Show.S01");
    assert_eq!(fs::read(lib_dir.join("Show.S01/e1.mkv")).unwrap(), e1);
    assert_eq!(fs::read(lib_dir.join("Show.S01/e2.mkv")).unwrap(), e2);
    assert!(!staging.path().join("seedbox/Show.S01").exists());
    assert_eq!(importer.call_count(), 1);
    assert_eq!(importer.calls.lock().unwrap()[0], lib_dir);

    // Importer relabels the category once it has taken the content; the
    // mismatch against the recorded import category schedules cleanup.
    source.set_category("Show.S01", "tv-sonarr-done");
    cycle_and_settle(&mut engine, 2).await;
    assert_eq!(state_of(&mut engine, &id).await, AggregateState::Cleaned);
    assert!(!lib_dir.exists());
    // Cleanup never re-triggers the importer.
    assert_eq!(importer.call_count(), 1);

    // The remote drops the download; after two missed polls the settled
    // record is pruned.
    source.remove("Show.S01");
    cycle_and_settle(&mut engine, 3).await;
    assert!(engine.registry().get(&id).await.is_none());
}

#[tokio::test]
async fn errored_file_is_retried_without_touching_siblings() {
    let remote = tempdir().unwrap();
    let staging = tempdir().unwrap();
    let library = tempdir().unwrap();
    let state = tempdir().unwrap();

    let e1: Vec<u8> = vec![7u8; 1000];
    write_remote(remote.path(), "Show.S02/e1.mkv", &e1);
    // e2 is truncated on the mount: the transfer size-checks and errors.
    write_remote(remote.path(), "Show.S02/e2.mkv", &vec![8u8; 400]);

    let source = Arc::new(FakeSource::new("seedbox"));
    source.add(
        "Show.S02",
        "tv-sonarr",
        remote.path(),
        vec![
            file("Show.S02/e1.mkv", 1000, 1000),
            file("Show.S02/e2.mkv", 1000, 1000),
        ],
    );
    let importer = Arc::new(RecordingImporter::new("sonarr", "tv-sonarr"));
    let cfg = test_config(staging.path(), library.path(), &["tv-sonarr"]);
    let mut engine = build_engine(cfg, state.path(), source.clone(), importer.clone()).await;

    let id = DownloadId::new("seedbox", "Show.S02");

    cycle_and_settle(&mut engine, 1).await;
    // The job stays open: the errored file is retried, its sibling is done.
    assert_eq!(state_of(&mut engine, &id).await, AggregateState::Syncing);
    let rec = engine.registry().get(&id).await.unwrap();
    let sync = rec.sync.as_ref().unwrap();
    assert!(sync
        .file("Show.S02/e2.mkv")
        .unwrap()
        .error
        .as_deref()
        .unwrap()
        .contains("size mismatch"));

    // The mount catches up; the next poll re-queues only the errored file
    // and the pipeline runs through to import.
    let e2: Vec<u8> = vec![8u8; 1000];
    write_remote(remote.path(), "Show.S02/e2.mkv", &e2);
    cycle_and_settle(&mut engine, 4).await;
    assert_eq!(state_of(&mut engine, &id).await, AggregateState::Imported);
    let lib_dir = library.path().join("seedbox/tv-sonarr/Show.S02");
    assert_eq!(fs::read(lib_dir.join("Show.S02/e1.mkv")).unwrap(), e1);
    assert_eq!(fs::read(lib_dir.join("Show.S02/e2.mkv")).unwrap(), e2);
    assert_eq!(importer.call_count(), 1);
}

#[tokio::test]
async fn unreachable_source_surfaces_error_and_recovers() {
    let remote = tempdir().unwrap();
    let staging = tempdir().unwrap();
    let library = tempdir().unwrap();
    let state = tempdir().unwrap();

    write_remote(remote.path(), "Show.S04/e1.mkv", &[3u8; 100]);
    let source = Arc::new(FakeSource::new("seedbox"));
    source.add(
        "Show.S04",
        "tv-sonarr",
        remote.path(),
        vec![file("Show.S04/e1.mkv", 100, 50)],
    );
    let importer = Arc::new(RecordingImporter::new("sonarr", "tv-sonarr"));
    let cfg = test_config(staging.path(), library.path(), &["tv-sonarr"]);
    let mut engine = build_engine(cfg, state.path(), source.clone(), importer.clone()).await;

    let id = DownloadId::new("seedbox", "Show.S04");
    cycle_and_settle(&mut engine, 1).await;
    assert_eq!(state_of(&mut engine, &id).await, AggregateState::Discovered);

    // The seedbox goes away: the record keeps its progress but shows the
    // failure, and no missed polls are counted.
    source.set_unreachable(true);
    cycle_and_settle(&mut engine, 2).await;
    let rec = engine.registry().get(&id).await.unwrap();
    assert_eq!(rec.state(), AggregateState::Error);
    assert!(rec.last_error.as_deref().unwrap().contains("connection refused"));
    assert_eq!(rec.missed_polls, 0);
    assert!(!rec.removed);

    // Back up: the next successful poll clears the error.
    source.set_unreachable(false);
    cycle_and_settle(&mut engine, 1).await;
    assert_eq!(state_of(&mut engine, &id).await, AggregateState::Discovered);
}

#[tokio::test]
async fn removal_before_import_is_pruned_without_cleanup() {
    let remote = tempdir().unwrap();
    let staging = tempdir().unwrap();
    let library = tempdir().unwrap();
    let state = tempdir().unwrap();

    write_remote(remote.path(), "Show.S03/e1.mkv", &[9u8; 100]);
    let source = Arc::new(FakeSource::new("seedbox"));
    source.add(
        "Show.S03",
        "tv-sonarr",
        remote.path(),
        // Remote never finishes, so no transfer starts.
        vec![file("Show.S03/e1.mkv", 100, 50)],
    );
    let importer = Arc::new(RecordingImporter::new("sonarr", "tv-sonarr"));
    let cfg = test_config(staging.path(), library.path(), &["tv-sonarr"]);
    let mut engine = build_engine(cfg, state.path(), source.clone(), importer.clone()).await;

    let id = DownloadId::new("seedbox", "Show.S03");
    cycle_and_settle(&mut engine, 1).await;
    assert_eq!(state_of(&mut engine, &id).await, AggregateState::Discovered);

    source.remove("Show.S03");
    // One missed poll keeps the record; the second marks it removed and the
    // settled record is pruned the same cycle.
    cycle_and_settle(&mut engine, 1).await;
    assert!(engine.registry().get(&id).await.is_some());
    cycle_and_settle(&mut engine, 2).await;
    assert!(engine.registry().get(&id).await.is_none());
    assert_eq!(importer.call_count(), 0);
}
