//! `pullarr check` – verify connectivity to configured sources and apps.

use anyhow::{bail, Result};
use pullarr_core::config::PullarrConfig;

use super::run::{build_importers, build_sources};

pub async fn run_check(cfg: &PullarrConfig) -> Result<()> {
    let mut failures = 0;

    for source in build_sources(cfg) {
        let categories = cfg
            .source(source.name())
            .map(|s| s.categories.clone())
            .unwrap_or_default();
        match source.list_downloads(&categories).await {
            Ok(downloads) => {
                println!(
                    "source {:<16} ok ({} download(s) in {} category(ies))",
                    source.name(),
                    downloads.len(),
                    categories.len()
                );
            }
            Err(e) => {
                failures += 1;
                println!("source {:<16} FAILED: {e:#}", source.name());
            }
        }
    }

    for importer in build_importers(cfg) {
        match importer.test_connection().await {
            Ok(()) => println!("app    {:<16} ok", importer.name()),
            Err(e) => {
                failures += 1;
                println!("app    {:<16} FAILED: {e:#}", importer.name());
            }
        }
    }

    if failures > 0 {
        bail!("{failures} connection check(s) failed");
    }
    println!("All checks passed.");
    Ok(())
}
