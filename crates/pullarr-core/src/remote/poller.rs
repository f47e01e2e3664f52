//! Per-cycle snapshot collection across all configured sources.
//!
//! A source that fails or times out contributes no snapshot this cycle:
//! stale-but-not-erroring. Its downloads are neither updated nor counted as
//! missing, and the failure is logged, never fatal.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::{PolledDownload, RemoteSource, SourceSnapshot};

/// Result of polling one source: either a consistent snapshot, or the
/// failure that produced none. The failure case leaves the source's
/// downloads stale-but-not-erroring; only the error string is surfaced.
pub enum SourcePoll {
    Snapshot(SourceSnapshot),
    Unreachable { source: String, error: String },
}

/// Poll every source for its current downloads and per-file detail.
///
/// `categories(source)` supplies the category filter per source;
/// `skip_detail` holds `source/name` keys of downloads already fully synced,
/// for which file detail is not re-fetched.
pub async fn poll_sources(
    sources: &[Arc<dyn RemoteSource>],
    categories: impl Fn(&str) -> Vec<String>,
    skip_detail: &HashSet<String>,
    timeout: Duration,
) -> Vec<SourcePoll> {
    let mut polls = Vec::with_capacity(sources.len());
    for source in sources {
        let cats = categories(source.name());
        let poll =
            match tokio::time::timeout(timeout, poll_one(source.as_ref(), &cats, skip_detail))
                .await
            {
                Ok(Ok(snapshot)) => SourcePoll::Snapshot(snapshot),
                Ok(Err(e)) => {
                    tracing::warn!(source = source.name(), "poll failed: {e:#}");
                    SourcePoll::Unreachable {
                        source: source.name().to_string(),
                        error: format!("{e:#}"),
                    }
                }
                Err(_) => {
                    tracing::warn!(
                        source = source.name(),
                        "poll timed out after {}s",
                        timeout.as_secs()
                    );
                    SourcePoll::Unreachable {
                        source: source.name().to_string(),
                        error: format!("poll timed out after {}s", timeout.as_secs()),
                    }
                }
            };
        polls.push(poll);
    }
    polls
}

async fn poll_one(
    source: &dyn RemoteSource,
    categories: &[String],
    skip_detail: &HashSet<String>,
) -> anyhow::Result<SourceSnapshot> {
    let listed = source.list_downloads(categories).await?;
    let mut downloads = Vec::with_capacity(listed.len());
    for download in listed {
        let key = format!("{}/{}", source.name(), download.name);
        let files = if skip_detail.contains(&key) {
            None
        } else {
            Some(source.get_files(&download.name).await?)
        };
        downloads.push(PolledDownload { download, files });
    }
    tracing::debug!(
        source = source.name(),
        downloads = downloads.len(),
        "polled source"
    );
    Ok(SourceSnapshot {
        source: source.name().to_string(),
        downloads,
    })
}
