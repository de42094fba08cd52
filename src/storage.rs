//! SQLite cache of fetched call facts
//!
//! Uses WAL mode so the viewer's worker threads and a CLI run can share the
//! file. Pull requests are keyed by the hash of their URL.

use crate::calls::MethodCall;
use crate::client::ReviewId;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS reviews (
    id INTEGER PRIMARY KEY,
    pr_hash TEXT NOT NULL UNIQUE,
    pr_url TEXT NOT NULL,
    review_id INTEGER NOT NULL,
    call_count INTEGER NOT NULL DEFAULT 0,
    calls_json TEXT NOT NULL,
    fetched_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Calls of a pull request as last fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCalls {
    pub review_id: ReviewId,
    pub calls: Vec<MethodCall>,
}

/// One cached pull request, without its calls
#[derive(Debug, Clone)]
pub struct CachedReview {
    pub pr_url: String,
    pub review_id: ReviewId,
    pub call_count: usize,
    pub fetched_at: String,
}

/// Directory for the cache database and the viewer's log file
pub fn data_dir() -> Result<PathBuf> {
    let dir = dirs::data_dir()
        .context("Could not determine data directory")?
        .join("callmap");
    std::fs::create_dir_all(&dir).context("Failed to create data directory")?;
    Ok(dir)
}

pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Opens or creates the cache at the default location
    pub fn open_default() -> Result<Self> {
        Self::open(&data_dir()?.join("cache.db"))
    }

    /// Opens or creates the cache at the specified path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open cache database")?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize cache schema")?;

        Ok(Self { conn })
    }

    pub fn hash_pr_url(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.trim().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn cached_calls(&self, pr_url: &str) -> Result<Option<CachedCalls>> {
        let row: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT review_id, calls_json FROM reviews WHERE pr_hash = ?1",
                params![Self::hash_pr_url(pr_url)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((review_id, json)) = row else {
            return Ok(None);
        };
        let calls: Vec<MethodCall> =
            serde_json::from_str(&json).context("Corrupt cache entry")?;
        debug!(pr = pr_url, calls = calls.len(), "cache hit");

        Ok(Some(CachedCalls {
            review_id: ReviewId(review_id),
            calls,
        }))
    }

    /// Stores the calls of a pull request, replacing any earlier entry
    pub fn store_calls(&self, pr_url: &str, review_id: ReviewId, calls: &[MethodCall]) -> Result<()> {
        let json = serde_json::to_string(calls)?;
        self.conn.execute(
            r#"
            INSERT INTO reviews (pr_hash, pr_url, review_id, call_count, calls_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(pr_hash) DO UPDATE SET
                pr_url = excluded.pr_url,
                review_id = excluded.review_id,
                call_count = excluded.call_count,
                calls_json = excluded.calls_json,
                fetched_at = CURRENT_TIMESTAMP
            "#,
            params![
                Self::hash_pr_url(pr_url),
                pr_url.trim(),
                review_id.0,
                calls.len() as i64,
                json
            ],
        )?;
        Ok(())
    }

    pub fn list_reviews(&self) -> Result<Vec<CachedReview>> {
        let mut stmt = self.conn.prepare(
            "SELECT pr_url, review_id, call_count, fetched_at FROM reviews ORDER BY fetched_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CachedReview {
                pr_url: row.get(0)?,
                review_id: ReviewId(row.get(1)?),
                call_count: row.get::<_, i64>(2)? as usize,
                fetched_at: row.get(3)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list cached reviews")
    }

    /// Removes one pull request; false if it was not cached
    pub fn remove(&self, pr_url: &str) -> Result<bool> {
        let count = self.conn.execute(
            "DELETE FROM reviews WHERE pr_hash = ?1",
            params![Self::hash_pr_url(pr_url)],
        )?;
        Ok(count > 0)
    }

    pub fn clear_all(&self) -> Result<usize> {
        let count = self.conn.execute("DELETE FROM reviews", [])?;
        Ok(count)
    }
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}
