//! Remote lock table backed by Postgres.
//!
//! For deployments that want locks to survive the host: the contract is the
//! same as the SQLite backend, with acquisition expressed as a conditional
//! write (`ON CONFLICT DO NOTHING`) so the database linearizes racing
//! acquirers, and `unlock_by_pull` as a prefix-filtered scan plus point
//! deletes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::models::{Project, ProjectLock};

use super::LockBackend;

pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub async fn new(dsn: &str) -> Result<Self> {
        let pool = PgPool::connect(dsn)
            .await
            .context("connecting to lock database")?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS locks (
                 key  TEXT PRIMARY KEY,
                 data JSONB NOT NULL
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
impl LockBackend for PostgresBackend {
    async fn try_lock(&self, lock: ProjectLock) -> Result<(bool, ProjectLock)> {
        let key = Self::key(&lock.project, &lock.workspace);
        let data = serde_json::to_value(&lock).context("serializing lock")?;

        loop {
            let inserted =
                sqlx::query("INSERT INTO locks (key, data) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING")
                    .bind(&key)
                    .bind(&data)
                    .execute(&self.pool)
                    .await
                    .context("inserting lock")?;
            if inserted.rows_affected() == 1 {
                return Ok((true, lock));
            }

            let row = sqlx::query("SELECT data FROM locks WHERE key = $1")
                .bind(&key)
                .fetch_optional(&self.pool)
                .await
                .context("reading current lock")?;
            let Some(row) = row else {
                continue;
            };
            let current: ProjectLock =
                serde_json::from_value(row.get::<serde_json::Value, _>("data"))
                    .context("deserializing current lock")?;
            let acquired = current.pull.num == lock.pull.num;
            return Ok((acquired, current));
        }
    }

    async fn unlock(&self, project: &Project, workspace: &str) -> Result<Option<ProjectLock>> {
        let key = Self::key(project, workspace);
        let row = sqlx::query("DELETE FROM locks WHERE key = $1 RETURNING data")
            .bind(&key)
            .fetch_optional(&self.pool)
            .await
            .context("deleting lock")?;
        match row {
            Some(row) => Ok(Some(
                serde_json::from_value(row.get::<serde_json::Value, _>("data"))
                    .context("deserializing deleted lock")?,
            )),
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
                serde_json::from_value(row.get::<serde_json::Value, _>("data"))
                    .context("deserializing lock")
            })
            .collect()
    }

    async fn unlock_by_pull(
        &self,
        repo_full_name: &str,
        pull_num: u64,
    ) -> Result<Vec<ProjectLock>> {
        let prefix = format!("{}/", repo_full_name);
        let rows = sqlx::query("SELECT data FROM locks WHERE starts_with(key, $1)")
            .bind(&prefix)
            .fetch_all(&self.pool)
            .await
            .context("scanning repo locks")?;

        let mut deleted = Vec::new();
        for row in rows {
            let lock: ProjectLock =
                serde_json::from_value(row.get::<serde_json::Value, _>("data"))
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
        let row = sqlx::query("SELECT data FROM locks WHERE key = $1")
            .bind(&key)
            .fetch_optional(&self.pool)
            .await
            .context("reading lock")?;
        match row {
            Some(row) => Ok(Some(
                serde_json::from_value(row.get::<serde_json::Value, _>("data"))
                    .context("deserializing lock")?,
            )),
            None => Ok(None),
        }
    }
}
