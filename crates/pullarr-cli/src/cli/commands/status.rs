//! `pullarr status` – show the pipeline state of every tracked download.

use anyhow::Result;
use pullarr_core::registry::{JobRegistry, StateDb};

pub async fn run_status() -> Result<()> {
    let db = StateDb::open_default().await?;
    let registry = JobRegistry::open(db).await?;
    let records = registry.snapshot().await;
    if records.is_empty() {
        println!("No tracked downloads.");
        return Ok(());
    }

    println!(
        "{:<12} {:<18} {:<10} {:<8} {}",
        "STATE", "CATEGORY", "SYNCED", "FILES", "NAME"
    );
    for rec in records {
        let (done, total) = rec
            .sync
            .as_ref()
            .map(|s| {
                let done: u64 = s.files.iter().map(|f| f.transferred.min(f.size)).sum();
                let total: u64 = s.files.iter().map(|f| f.size).sum();
                (done, total)
            })
            .unwrap_or((0, 0));
        let synced = if total > 0 {
            format!("{}%", done * 100 / total)
        } else {
            "-".to_string()
        };
        println!(
            "{:<12} {:<18} {:<10} {:<8} {}",
            rec.state().as_str(),
            rec.category,
            synced,
            rec.files.len(),
            rec.id
        );
        if let Some(err) = &rec.last_error {
            println!("  error: {err}");
        }
    }
    Ok(())
}
