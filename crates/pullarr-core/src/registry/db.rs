//! SQLite-backed persistence for the job registry.
//!
//! One row per tracked download: identity/summary columns for queries plus
//! the full record as JSON, rewritten after every mutation.

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::DownloadRecord;

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Handle to the SQLite-backed registry database.
///
/// The database file is stored under the XDG state directory:
/// `~/.local/state/pullarr/state.db`.
#[derive(Clone)]
pub struct StateDb {
    pool: Pool<Sqlite>,
}

impl StateDb {
    /// Open (or create) the default registry database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("pullarr")?;
        let state_dir = xdg_dirs.get_state_home();
        let db_path = state_dir.join("state.db");

        tokio::fs::create_dir_all(&state_dir).await?;

        let uri = path_to_sqlite_uri(&db_path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await?;

        let db = StateDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Open (or create) the database at a specific path. Creates parent dirs
    /// if needed. Intended for tests so the DB can live in a temp directory.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await?;
        let db = StateDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        // Summary columns serve the status query; `record_json` is the full
        // record and survives schema growth without migrations.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                name TEXT NOT NULL,
                category TEXT NOT NULL,
                state TEXT NOT NULL,
                last_error TEXT,
                first_seen INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                record_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or fully replace one download row.
    pub async fn upsert(&self, rec: &DownloadRecord) -> Result<()> {
        let json = serde_json::to_string(rec).context("serialize download record")?;
        sqlx::query(
            r#"
            INSERT INTO downloads
                (id, source, name, category, state, last_error, first_seen, updated_at, record_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                category = excluded.category,
                state = excluded.state,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at,
                record_json = excluded.record_json
            "#,
        )
        .bind(rec.id.as_key())
        .bind(&rec.id.source)
        .bind(&rec.id.name)
        .bind(&rec.category)
        .bind(rec.state().as_str())
        .bind(rec.last_error.as_deref())
        .bind(rec.first_seen)
        .bind(rec.updated_at)
        .bind(json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load every stored record. Rows with unreadable JSON are skipped with a
    /// warning rather than failing rehydration.
    pub async fn load_all(&self) -> Result<Vec<DownloadRecord>> {
        let rows = sqlx::query("SELECT id, record_json FROM downloads ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let json: String = row.get("record_json");
            match serde_json::from_str::<DownloadRecord>(&json) {
                Ok(rec) => records.push(rec),
                Err(e) => tracing::warn!(id = %id, "skipping unreadable registry row: {e}"),
            }
        }
        Ok(records)
    }

    /// Drop one download row.
    pub async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM downloads WHERE id = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Current time as Unix seconds (for record timestamps).
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
/// Open an in-memory database for tests (no disk I/O).
pub(crate) async fn open_memory() -> Result<StateDb> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let db = StateDb { pool };
    db.migrate().await?;
    Ok(db)
}
