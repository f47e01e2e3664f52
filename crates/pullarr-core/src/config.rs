use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Which download-client integration a source entry uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Qbittorrent,
}

/// One remote download client to poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Name used in download identities and staging paths.
    pub name: String,
    pub kind: SourceKind,
    /// Base URL of the client's web API, e.g. `http://seedbox:8080`.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Categories to poll; a download outside these is never tracked.
    pub categories: Vec<String>,
    /// Prefix of remote content paths to rewrite for the transfer backend
    /// (e.g. the client reports `/downloads`, mounted locally elsewhere).
    #[serde(default)]
    pub remote_path_prefix: Option<String>,
    /// Replacement for `remote_path_prefix`, e.g. `/mnt/seedbox/downloads`.
    #[serde(default)]
    pub local_path_prefix: Option<String>,
}

impl SourceConfig {
    /// Rewrite a remote content path into one the transfer backend can read.
    pub fn map_remote_path(&self, path: &str) -> String {
        match (&self.remote_path_prefix, &self.local_path_prefix) {
            (Some(from), Some(to)) => match path.strip_prefix(from.as_str()) {
                Some(rest) => format!("{}{}", to, rest),
                None => path.to_string(),
            },
            _ => path.to_string(),
        }
    }
}

/// Which importer integration an app entry uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppKind {
    Sonarr,
    Radarr,
}

/// One downstream importer notified after a successful move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub kind: AppKind,
    /// Base URL, e.g. `http://localhost:8989`.
    pub url: String,
    pub api_key: String,
    /// Categories this app imports; routes a download to its importer.
    pub categories: Vec<String>,
    /// If true, a download removed from the remote schedules cleanup of the
    /// synced local copy (only ever after a successful import).
    #[serde(default)]
    pub cleanup_on_remove: bool,
}

/// Global configuration loaded from `~/.config/pullarr/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullarrConfig {
    /// Seconds between reconciliation cycles.
    pub poll_interval_secs: u64,
    /// Maximum files transferring at once across all downloads.
    pub max_concurrent_syncs: usize,
    /// Parallel streams the transfer backend may use per file.
    pub streams_per_file: usize,
    /// Local holding area for files mid-sync.
    pub staging_dir: PathBuf,
    /// Final library root; downloads land at `<dest>/<source>/<category>/<name>`.
    pub destination_dir: PathBuf,
    /// Timeout for each remote source poll.
    pub remote_timeout_secs: u64,
    /// Timeout for each app import trigger.
    pub notify_timeout_secs: u64,
    /// How long shutdown waits for in-flight transfers to acknowledge abort.
    pub shutdown_grace_secs: u64,
    /// If true, one errored file fails the whole sync job; default keeps the
    /// job open so later polls retry just the errored file.
    #[serde(default)]
    pub fail_job_on_file_error: bool,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceConfig>,
    #[serde(default, rename = "app")]
    pub apps: Vec<AppConfig>,
}

impl Default for PullarrConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            max_concurrent_syncs: 4,
            streams_per_file: 4,
            staging_dir: default_data_dir().join("staging"),
            destination_dir: default_data_dir().join("library"),
            remote_timeout_secs: 30,
            notify_timeout_secs: 30,
            shutdown_grace_secs: 20,
            fail_job_on_file_error: false,
            sources: Vec::new(),
            apps: Vec::new(),
        }
    }
}

impl PullarrConfig {
    /// Apps configured for the given category.
    pub fn apps_for_category<'a>(&'a self, category: &str) -> Vec<&'a AppConfig> {
        self.apps
            .iter()
            .filter(|a| a.categories.iter().any(|c| c == category))
            .collect()
    }

    /// Categories whose app wants cleanup when the remote drops a download.
    pub fn cleanup_on_remove_categories(&self) -> Vec<String> {
        self.apps
            .iter()
            .filter(|a| a.cleanup_on_remove)
            .flat_map(|a| a.categories.iter().cloned())
            .collect()
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}

fn default_data_dir() -> PathBuf {
    xdg::BaseDirectories::with_prefix("pullarr")
        .map(|d| d.get_data_home())
        .unwrap_or_else(|_| PathBuf::from("/var/lib/pullarr"))
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("pullarr")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<PullarrConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = PullarrConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: PullarrConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = PullarrConfig::default();
        assert_eq!(cfg.poll_interval_secs, 60);
        assert_eq!(cfg.max_concurrent_syncs, 4);
        assert_eq!(cfg.streams_per_file, 4);
        assert!(!cfg.fail_job_on_file_error);
        assert!(cfg.sources.is_empty());
        assert!(cfg.apps.is_empty());
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = PullarrConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: PullarrConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.poll_interval_secs, cfg.poll_interval_secs);
        assert_eq!(parsed.max_concurrent_syncs, cfg.max_concurrent_syncs);
        assert_eq!(parsed.staging_dir, cfg.staging_dir);
    }

    #[test]
    fn config_toml_sources_and_apps() {
        let toml = r#"
            poll_interval_secs = 30
            max_concurrent_syncs = 2
            streams_per_file = 8
            staging_dir = "/srv/staging"
            destination_dir = "/srv/library"
            remote_timeout_secs = 10
            notify_timeout_secs = 10
            shutdown_grace_secs = 5

            [[source]]
            name = "seedbox"
            kind = "qbittorrent"
            url = "http://seedbox:8080"
            username = "admin"
            password = "secret"
            categories = ["tv-sonarr", "movies-radarr"]
            remote_path_prefix = "/downloads"
            local_path_prefix = "/mnt/seedbox/downloads"

            [[app]]
            name = "sonarr"
            kind = "sonarr"
            url = "http://localhost:8989"
            api_key = "abc"
            categories = ["tv-sonarr"]
            cleanup_on_remove = true
        "#;
        let cfg: PullarrConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.sources[0].kind, SourceKind::Qbittorrent);
        assert_eq!(cfg.apps.len(), 1);
        assert!(cfg.apps[0].cleanup_on_remove);
        assert_eq!(cfg.apps_for_category("tv-sonarr").len(), 1);
        assert!(cfg.apps_for_category("music").is_empty());
        assert_eq!(cfg.cleanup_on_remove_categories(), vec!["tv-sonarr"]);
    }

    #[test]
    fn source_path_mapping() {
        let src = SourceConfig {
            name: "seedbox".into(),
            kind: SourceKind::Qbittorrent,
            url: "http://seedbox:8080".into(),
            username: None,
            password: None,
            categories: vec![],
            remote_path_prefix: Some("/downloads".into()),
            local_path_prefix: Some("/mnt/seedbox".into()),
        };
        assert_eq!(src.map_remote_path("/downloads/x"), "/mnt/seedbox/x");
        assert_eq!(src.map_remote_path("/other/x"), "/other/x");
    }
}
