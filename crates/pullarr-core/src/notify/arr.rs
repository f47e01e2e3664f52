//! Sonarr/Radarr importer (api/v3).
//!
//! Import is triggered through the command endpoint with a downloaded-scan
//! command pointed at the moved library directory. Auth is a static API key
//! header. HTTP runs through curl on the blocking pool.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use curl::easy::{Easy, List};
use std::path::Path;
use std::time::Duration;

use crate::config::{AppConfig, AppKind};

use super::Importer;

/// Sonarr- or Radarr-backed `Importer`.
pub struct ArrImporter {
    name: String,
    kind: AppKind,
    base_url: String,
    api_key: String,
    categories: Vec<String>,
    timeout: Duration,
}

impl ArrImporter {
    pub fn new(cfg: &AppConfig, timeout: Duration) -> Self {
        Self {
            name: cfg.name.clone(),
            kind: cfg.kind,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            categories: cfg.categories.clone(),
            timeout,
        }
    }

    fn command_name(&self) -> &'static str {
        match self.kind {
            AppKind::Sonarr => "DownloadedEpisodesScan",
            AppKind::Radarr => "DownloadedMoviesScan",
        }
    }
}

#[async_trait]
impl Importer for ArrImporter {
    fn name(&self) -> &str {
        &self.name
    }

    fn categories(&self) -> &[String] {
        &self.categories
    }

    async fn trigger_import(&self, path: &Path) -> Result<()> {
        let url = format!("{}/api/v3/command", self.base_url);
        let body = serde_json::json!({
            "name": self.command_name(),
            "path": path.to_string_lossy(),
            "importMode": "Move",
        })
        .to_string();
        let api_key = self.api_key.clone();
        let timeout = self.timeout;
        let (code, text) =
            tokio::task::spawn_blocking(move || http_post_json(&url, &body, &api_key, timeout))
                .await
                .context("join import task")??;
        // The command endpoint answers 201 Created with the queued command.
        if !(200..300).contains(&code) {
            bail!("command rejected (HTTP {code}: {})", text.trim());
        }
        Ok(())
    }

    async fn test_connection(&self) -> Result<()> {
        let url = format!("{}/api/v3/system/status", self.base_url);
        let api_key = self.api_key.clone();
        let timeout = self.timeout;
        let (code, _) = tokio::task::spawn_blocking(move || http_get(&url, &api_key, timeout))
            .await
            .context("join status task")??;
        if code == 401 {
            bail!("authentication failed (check api_key)");
        }
        if code != 200 {
            bail!("status check failed: HTTP {code}");
        }
        Ok(())
    }
}

fn http_get(url: &str, api_key: &str, timeout: Duration) -> Result<(u32, String)> {
    let mut easy = Easy::new();
    easy.url(url)?;
    easy.timeout(timeout)?;
    let mut headers = List::new();
    headers.append(&format!("X-Api-Key: {api_key}"))?;
    easy.http_headers(headers)?;
    let mut body = Vec::new();
    {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| {
            body.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer.perform()?;
    }
    let code = easy.response_code()?;
    Ok((code, String::from_utf8_lossy(&body).into_owned()))
}

fn http_post_json(url: &str, json: &str, api_key: &str, timeout: Duration) -> Result<(u32, String)> {
    let mut easy = Easy::new();
    easy.url(url)?;
    easy.timeout(timeout)?;
    easy.post(true)?;
    easy.post_fields_copy(json.as_bytes())?;
    let mut headers = List::new();
    headers.append("Content-Type: application/json")?;
    headers.append(&format!("X-Api-Key: {api_key}"))?;
    easy.http_headers(headers)?;
    let mut body = Vec::new();
    {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| {
            body.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer.perform()?;
    }
    let code = easy.response_code()?;
    Ok((code, String::from_utf8_lossy(&body).into_owned()))
}
