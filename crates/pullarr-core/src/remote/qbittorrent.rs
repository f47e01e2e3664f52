//! qBittorrent Web API source (api/v2).
//!
//! Auth is cookie-based: login once, cache the SID, re-login on a 403.
//! All HTTP runs through curl on the blocking pool so the poll task itself
//! never blocks the runtime.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use curl::easy::{Easy, List};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{RemoteDownload, RemoteFile, RemoteSource};

#[derive(Debug, Deserialize)]
struct QbtTorrent {
    name: String,
    hash: String,
    #[serde(default)]
    category: String,
    save_path: String,
}

#[derive(Debug, Deserialize)]
struct QbtFile {
    name: String,
    size: u64,
    /// Completion fraction in [0, 1].
    progress: f64,
    priority: i64,
}

/// qBittorrent-backed `RemoteSource`.
pub struct QbitSource {
    name: String,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
    /// Cached SID cookie; None until the first login.
    session: Mutex<Option<String>>,
    /// Torrent name -> hash, filled by `list_downloads` for `get_files`.
    hashes: StdMutex<HashMap<String, String>>,
}

impl QbitSource {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        username: Option<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
            timeout,
            session: Mutex::new(None),
            hashes: StdMutex::new(HashMap::new()),
        }
    }

    async fn login(&self) -> Result<String> {
        let url = format!("{}/api/v2/auth/login", self.base_url);
        let body = format!(
            "username={}&password={}",
            encode_query(self.username.as_deref().unwrap_or("")),
            encode_query(self.password.as_deref().unwrap_or("")),
        );
        let timeout = self.timeout;
        let (code, text, sid) =
            tokio::task::spawn_blocking(move || http_post_form(&url, &body, timeout))
                .await
                .context("join login task")??;
        if code != 200 || text.trim() != "Ok." {
            bail!("qbittorrent login rejected (HTTP {code}: {})", text.trim());
        }
        sid.context("qbittorrent login returned no SID cookie")
    }

    /// GET an API path, logging in (or re-logging-in on 403) as needed.
    async fn api_get(&self, path_and_query: &str) -> Result<String> {
        let mut session = self.session.lock().await;
        if session.is_none() {
            *session = Some(self.login().await?);
        }
        let url = format!("{}{}", self.base_url, path_and_query);
        let sid = session.clone().unwrap_or_default();
        let timeout = self.timeout;
        let (code, text) = {
            let url = url.clone();
            tokio::task::spawn_blocking(move || http_get(&url, &sid, timeout))
                .await
                .context("join api task")??
        };
        if code == 403 {
            // Session expired; one re-login attempt.
            let fresh = self.login().await?;
            *session = Some(fresh.clone());
            let timeout = self.timeout;
            let (code, text) =
                tokio::task::spawn_blocking(move || http_get(&url, &fresh, timeout))
                    .await
                    .context("join api task")??;
            if code != 200 {
                bail!("qbittorrent API error after re-login: HTTP {code}");
            }
            return Ok(text);
        }
        if code != 200 {
            bail!("qbittorrent API error: HTTP {code}");
        }
        Ok(text)
    }
}

#[async_trait]
impl RemoteSource for QbitSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_downloads(&self, categories: &[String]) -> Result<Vec<RemoteDownload>> {
        let mut out = Vec::new();
        for category in categories {
            let text = self
                .api_get(&format!(
                    "/api/v2/torrents/info?category={}",
                    encode_query(category)
                ))
                .await?;
            let torrents: Vec<QbtTorrent> =
                serde_json::from_str(&text).context("parse torrents/info response")?;
            let mut hashes = self.hashes.lock().unwrap();
            for t in torrents {
                hashes.insert(t.name.clone(), t.hash.clone());
                out.push(RemoteDownload {
                    remote_path: t.save_path.trim_end_matches('/').to_string(),
                    name: t.name,
                    category: t.category,
                });
            }
        }
        Ok(out)
    }

    async fn get_files(&self, name: &str) -> Result<Vec<RemoteFile>> {
        let hash = self
            .hashes
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .with_context(|| format!("no hash known for torrent {name:?}"))?;
        let text = self
            .api_get(&format!(
                "/api/v2/torrents/files?hash={}",
                encode_query(&hash)
            ))
            .await?;
        let files: Vec<QbtFile> =
            serde_json::from_str(&text).context("parse torrents/files response")?;
        Ok(files
            .into_iter()
            .map(|f| {
                let done = if f.progress >= 1.0 {
                    f.size
                } else {
                    (f.progress.max(0.0) * f.size as f64) as u64
                };
                RemoteFile {
                    path: f.name,
                    size: f.size,
                    done,
                    priority: if f.priority <= 0 { 0 } else { 1 },
                }
            })
            .collect())
    }
}

fn http_get(url: &str, sid: &str, timeout: Duration) -> Result<(u32, String)> {
    let mut easy = Easy::new();
    easy.url(url)?;
    easy.timeout(timeout)?;
    if !sid.is_empty() {
        easy.cookie(&format!("SID={sid}"))?;
    }
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

fn http_post_form(url: &str, form: &str, timeout: Duration) -> Result<(u32, String, Option<String>)> {
    let mut easy = Easy::new();
    easy.url(url)?;
    easy.timeout(timeout)?;
    easy.post(true)?;
    easy.post_fields_copy(form.as_bytes())?;
    let mut headers = List::new();
    headers.append("Content-Type: application/x-www-form-urlencoded")?;
    easy.http_headers(headers)?;
    let mut body = Vec::new();
    let mut sid = None;
    {
        let mut transfer = easy.transfer();
        transfer.header_function(|header| {
            if let Ok(line) = std::str::from_utf8(header) {
                if let Some(rest) = line
                    .strip_prefix("Set-Cookie:")
                    .or_else(|| line.strip_prefix("set-cookie:"))
                {
                    if let Some(value) = rest.trim().strip_prefix("SID=") {
                        let end = value.find(';').unwrap_or(value.len());
                        sid = Some(value[..end].to_string());
                    }
                }
            }
            true
        })?;
        transfer.write_function(|data| {
            body.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer.perform()?;
    }
    let code = easy.response_code()?;
    Ok((code, String::from_utf8_lossy(&body).into_owned(), sid))
}

/// Percent-encode a query value (minimal set; enough for categories, hashes,
/// and credentials).
fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
