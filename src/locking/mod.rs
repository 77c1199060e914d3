//! Durable per-project locks.
//!
//! A lock claims `(repo, path, workspace)` for one pull request from the
//! moment its plan succeeds until the plan is applied and the pull is
//! closed, or the lock is discarded through the web UI. Two interchangeable
//! backends implement the store: an embedded SQLite database (single
//! daemon, the default) and a remote Postgres table.
//!
//! Keys are `repo_full_name/path/workspace` with literal `/` separators so
//! that all locks for a repo share the `repo_full_name/` prefix and must
//! round-trip through the store byte-for-byte.

pub mod postgres;
pub mod sqlite;

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Project, ProjectLock, PullRequest, User};

/// Storage contract for project locks. Implementations must linearize
/// operations on the same key: concurrent `try_lock` calls on one key have
/// exactly one winner.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Atomically acquire `lock` if its key is free, or re-acquire it if the
    /// current holder is the same pull. Returns `(acquired, current)` where
    /// `current` is the lock now holding the key.
    async fn try_lock(&self, lock: ProjectLock) -> Result<(bool, ProjectLock)>;

    /// Delete the lock for `(project, workspace)`, returning the previous
    /// holder if there was one. Missing keys are not an error.
    async fn unlock(&self, project: &Project, workspace: &str) -> Result<Option<ProjectLock>>;

    /// Snapshot of all held locks.
    async fn list(&self) -> Result<Vec<ProjectLock>>;

    /// Delete every lock in `repo_full_name` held by `pull_num`, returning
    /// the locks that were deleted.
    async fn unlock_by_pull(&self, repo_full_name: &str, pull_num: u64)
        -> Result<Vec<ProjectLock>>;

    /// The lock for `(project, workspace)`, if held.
    async fn get_lock(&self, project: &Project, workspace: &str) -> Result<Option<ProjectLock>>;
}

/// Outcome of a lock attempt, as consumed by the executors.
#[derive(Debug, Clone)]
pub struct TryLockResponse {
    pub acquired: bool,
    /// The lock currently holding the key (ours when acquired).
    pub current: ProjectLock,
    /// Store key of the lock, used to build unlock URLs.
    pub key: String,
}

// Matches {repoFullName}/{path}/{workspace} where path may itself contain
// slashes. The first group is non-greedy so it stops at owner/name.
static KEY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?/.*?)/(.*)/(.*)$").expect("static regex"));

/// Façade over a [`LockBackend`] that owns key formatting and parsing.
pub struct LockingClient {
    backend: Box<dyn LockBackend>,
}

impl LockingClient {
    pub fn new(backend: Box<dyn LockBackend>) -> Self {
        Self { backend }
    }

    pub async fn try_lock(
        &self,
        project: &Project,
        workspace: &str,
        pull: &PullRequest,
        user: &User,
    ) -> Result<TryLockResponse> {
        let lock = ProjectLock {
            project: project.clone(),
            workspace: workspace.to_string(),
            pull: pull.clone(),
            user: user.clone(),
            time: Utc::now(),
        };
        let (acquired, current) = self.backend.try_lock(lock).await?;
        Ok(TryLockResponse {
            acquired,
            current,
            key: Self::key(project, workspace),
        })
    }

    /// Unlock by store key (as used by the `/locks` endpoint). Returns the
    /// deleted lock, if any.
    pub async fn unlock(&self, key: &str) -> Result<Option<ProjectLock>> {
        let (project, workspace) = Self::parse_key(key)?;
        self.backend.unlock(&project, &workspace).await
    }

    /// All held locks, keyed by store key. `BTreeMap` so the web index is
    /// rendered in a stable order.
    pub async fn list(&self) -> Result<BTreeMap<String, ProjectLock>> {
        let mut map = BTreeMap::new();
        for lock in self.backend.list().await? {
            map.insert(Self::key(&lock.project, &lock.workspace), lock);
        }
        Ok(map)
    }

    pub async fn unlock_by_pull(
        &self,
        repo_full_name: &str,
        pull_num: u64,
    ) -> Result<Vec<ProjectLock>> {
        self.backend.unlock_by_pull(repo_full_name, pull_num).await
    }

    pub async fn get_lock(&self, key: &str) -> Result<Option<ProjectLock>> {
        let (project, workspace) = Self::parse_key(key)?;
        self.backend.get_lock(&project, &workspace).await
    }

    pub fn key(project: &Project, workspace: &str) -> String {
        format!("{}/{}/{}", project.repo_full_name, project.path, workspace)
    }

    fn parse_key(key: &str) -> Result<(Project, String)> {
        let caps = KEY_REGEX
            .captures(key)
            .ok_or_else(|| anyhow!("invalid lock key format {key:?}"))?;
        let project = Project {
            repo_full_name: caps[1].to_string(),
            path: caps[2].to_string(),
        };
        Ok((project, caps[3].to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trips_with_nested_paths() {
        let project = Project::new("owner/repo", "parent/child");
        let key = LockingClient::key(&project, "staging");
        assert_eq!(key, "owner/repo/parent/child/staging");
        let (parsed, workspace) = LockingClient::parse_key(&key).unwrap();
        assert_eq!(parsed, project);
        assert_eq!(workspace, "staging");
    }

    #[test]
    fn key_round_trips_for_root_project() {
        let project = Project::new("owner/repo", ".");
        let key = LockingClient::key(&project, "default");
        let (parsed, workspace) = LockingClient::parse_key(&key).unwrap();
        assert_eq!(parsed, project);
        assert_eq!(workspace, "default");
    }

    #[test]
    fn malformed_key_is_rejected() {
        assert!(LockingClient::parse_key("no-slashes").is_err());
    }
}
