//! Shared fakes for engine integration tests: a scriptable remote source and
//! a recording importer. Transfers use the real mounted-filesystem backend
//! against a tempdir standing in for the seedbox mount.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use pullarr_core::notify::Importer;
use pullarr_core::remote::{RemoteDownload, RemoteFile, RemoteSource};

pub struct FakeDownload {
    pub download: RemoteDownload,
    pub files: Vec<RemoteFile>,
}

/// In-memory remote client whose contents tests mutate between cycles.
pub struct FakeSource {
    name: String,
    downloads: Mutex<Vec<FakeDownload>>,
    unreachable: std::sync::atomic::AtomicBool,
}

impl FakeSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            downloads: Mutex::new(Vec::new()),
            unreachable: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_unreachable(&self, down: bool) {
        self.unreachable
            .store(down, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn add(&self, name: &str, category: &str, remote_path: &Path, files: Vec<RemoteFile>) {
        self.downloads.lock().unwrap().push(FakeDownload {
            download: RemoteDownload {
                name: name.into(),
                category: category.into(),
                remote_path: remote_path.to_string_lossy().into_owned(),
            },
            files,
        });
    }

    pub fn set_done(&self, name: &str, path: &str, done: u64) {
        let mut downloads = self.downloads.lock().unwrap();
        let d = downloads
            .iter_mut()
            .find(|d| d.download.name == name)
            .unwrap();
        d.files.iter_mut().find(|f| f.path == path).unwrap().done = done;
    }

    pub fn set_category(&self, name: &str, category: &str) {
        let mut downloads = self.downloads.lock().unwrap();
        downloads
            .iter_mut()
            .find(|d| d.download.name == name)
            .unwrap()
            .download
            .category = category.into();
    }

    pub fn remove(&self, name: &str) {
        self.downloads
            .lock()
            .unwrap()
            .retain(|d| d.download.name != name);
    }
}

#[async_trait]
impl RemoteSource for FakeSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_downloads(&self, categories: &[String]) -> Result<Vec<RemoteDownload>> {
        if self.unreachable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        Ok(self
            .downloads
            .lock()
            .unwrap()
            .iter()
            .filter(|d| categories.iter().any(|c| c == &d.download.category))
            .map(|d| d.download.clone())
            .collect())
    }

    async fn get_files(&self, name: &str) -> Result<Vec<RemoteFile>> {
        self.downloads
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.download.name == name)
            .map(|d| d.files.clone())
            .ok_or_else(|| anyhow!("unknown download {name:?}"))
    }
}

/// Importer that records every triggered path and always succeeds.
pub struct RecordingImporter {
    name: String,
    categories: Vec<String>,
    pub calls: Mutex<Vec<PathBuf>>,
}

impl RecordingImporter {
    pub fn new(name: &str, category: &str) -> Self {
        Self {
            name: name.into(),
            categories: vec![category.into()],
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Importer for RecordingImporter {
    fn name(&self) -> &str {
        &self.name
    }

    fn categories(&self) -> &[String] {
        &self.categories
    }

    async fn trigger_import(&self, path: &Path) -> Result<()> {
        self.calls.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }
}

pub fn file(path: &str, size: u64, done: u64) -> RemoteFile {
    RemoteFile {
        path: path.into(),
        size,
        done,
        priority: 1,
    }
}
