//! Embedded lock store backed by SQLite.
//!
//! One daemon process owns the database file (`<data_dir>/atlantis.db`).
//! Acquisition is a conditional insert: `ON CONFLICT(key) DO NOTHING`
//! guarantees exactly one winner when two tasks race on the same key, and
//! the loser then reads back whoever holds the row.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::Row;

use crate::models::{Project, ProjectLock};

use super::LockBackend;

pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .context("creating data dir")?;
        let db_path = data_dir.join("atlantis.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);
        let pool = SqlitePool::connect_with(opts)
            .await
            .context("opening lock database")?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS locks (
                 key  TEXT PRIMARY KEY,
                 data TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await
        .context("creating locks table")?;
        Ok(Self { pool })
    }

    fn key(project: &Project, workspace: &str) -> String {
        format!("{}/{}/{}", project.repo_full_name, project.path, workspace)
    }
}

#[async_trait]
impl LockBackend for SqliteBackend {
    async fn try_lock(&self, lock: ProjectLock) -> Result<(bool, ProjectLock)> {
        let key = Self::key(&lock.project, &lock.workspace);
        let data = serde_json::to_string(&lock).context("serializing lock")?;

        // Conditional write first; losers read back the holder. Looping
        // covers the window where the holder unlocks between our insert
        // attempt and the read-back.
        loop {
            let inserted = sqlx::query("INSERT INTO locks (key, data) VALUES (?, ?) ON CONFLICT(key) DO NOTHING")
                .bind(&key)
                .bind(&data)
                .execute(&self.pool)
                .await
                .context("inserting lock")?;
            if inserted.rows_affected() == 1 {
                return Ok((true, lock));
            }

            let row = sqlx::query("SELECT data FROM locks WHERE key = ?")
                .bind(&key)
                .fetch_optional(&self.pool)
                .await
                .context("reading current lock")?;
            let Some(row) = row else {
                // holder vanished between insert and read; retry the insert
                continue;
            };
            let current: ProjectLock = serde_json::from_str(row.get::<String, _>("data").as_str())
                .context("deserializing current lock")?;
            // same-pull re-entrancy
            let acquired = current.pull.num == lock.pull.num;
            return Ok((acquired, current));
        }
    }

    async fn unlock(&self, project: &Project, workspace: &str) -> Result<Option<ProjectLock>> {
        let key = Self::key(project, workspace);
        let row = sqlx::query("DELETE FROM locks WHERE key = ? RETURNING data")
            .bind(&key)
            .fetch_optional(&self.pool)
            .await
            .context("deleting lock")?;
        match row {
            Some(row) => {
                let lock = serde_json::from_str(row.get::<String, _>("data").as_str())
                    .context("deserializing deleted lock")?;
                Ok(Some(lock))
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<ProjectLock>> {
        let rows = sqlx::query("SELECT data FROM locks ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .context("listing locks")?;
        rows.into_iter()
            .map(|row| {
                serde_json::from_str(row.get::<String, _>("data").as_str())
                    .context("deserializing lock")
            })
            .collect()
    }

    async fn unlock_by_pull(
        &self,
        repo_full_name: &str,
        pull_num: u64,
    ) -> Result<Vec<ProjectLock>> {
        // Prefix scan over the repo's keys, then point deletes for the
        // matching pull. ESCAPE so `_` in repo names stays literal.
        let prefix = format!("{}/", repo_full_name);
        let pattern = format!("{}%", like_escape(&prefix));
        let rows = sqlx::query("SELECT data FROM locks WHERE key LIKE ? ESCAPE '\\'")
            .bind(&pattern)
            .fetch_all(&self.pool)
            .await
            .context("scanning repo locks")?;

        let mut deleted = Vec::new();
        for row in rows {
            let lock: ProjectLock =
                serde_json::from_str(row.get::<String, _>("data").as_str())
                    .context("deserializing lock")?;
            if lock.pull.num == pull_num {
                self.unlock(&lock.project, &lock.workspace).await?;
                deleted.push(lock);
            }
        }
        Ok(deleted)
    }

    async fn get_lock(&self, project: &Project, workspace: &str) -> Result<Option<ProjectLock>> {
        let key = Self::key(project, workspace);
        let row = sqlx::query("SELECT data FROM locks WHERE key = ?")
            .bind(&key)
            .fetch_optional(&self.pool)
            .await
            .context("reading lock")?;
        match row {
            Some(row) => Ok(Some(
                serde_json::from_str(row.get::<String, _>("data").as_str())
                    .context("deserializing lock")?,
            )),
            None => Ok(None),
        }
    }
}

/// Escape SQL LIKE metacharacters so a repo name is matched literally.
fn like_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
