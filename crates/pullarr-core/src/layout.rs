//! On-disk layout of the staging and library trees.
//!
//! Staged files mirror the remote content root per download; the move stage
//! relocates the whole staged directory under
//! `destination/<source>/<category>/<name>`.

use std::path::{Path, PathBuf};

use crate::model::DownloadId;

/// Staging directory for one download.
pub fn staging_dir(root: &Path, id: &DownloadId) -> PathBuf {
    root.join(&id.source).join(&id.name)
}

/// Final library directory for one download.
pub fn library_dir(root: &Path, id: &DownloadId, category: &str) -> PathBuf {
    root.join(&id.source).join(category).join(&id.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let id = DownloadId::new("seedbox", "Show.S01");
        assert_eq!(
            staging_dir(Path::new("/stage"), &id),
            PathBuf::from("/stage/seedbox/Show.S01")
        );
        assert_eq!(
            library_dir(Path::new("/lib"), &id, "tv-sonarr"),
            PathBuf::from("/lib/seedbox/tv-sonarr/Show.S01")
        );
    }
}
