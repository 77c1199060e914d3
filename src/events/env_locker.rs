//! In-memory serialization of commands per (repo, pull, workspace).
//!
//! This is deliberately not durable: in-flight commands do not survive a
//! restart, so neither must their serialization slots. The durable project
//! lock (`crate::locking`) is a separate concern: it spans commands, this
//! spans one.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Mutex-protected set of held `(repo, pull, workspace)` slots.
#[derive(Default)]
pub struct EnvLocker {
    locks: Mutex<HashSet<String>>,
}

impl EnvLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot, or return `false` if a command for the same
    /// pull/workspace is already running. Callers are rejected, not queued.
    pub fn try_lock(&self, repo_full_name: &str, workspace: &str, pull_num: u64) -> bool {
        let key = Self::key(repo_full_name, workspace, pull_num);
        self.locks.lock().expect("env locker poisoned").insert(key)
    }

    pub fn unlock(&self, repo_full_name: &str, workspace: &str, pull_num: u64) {
        let key = Self::key(repo_full_name, workspace, pull_num);
        self.locks.lock().expect("env locker poisoned").remove(&key);
    }

    fn key(repo_full_name: &str, workspace: &str, pull_num: u64) -> String {
        format!("{repo_full_name}/{pull_num}/{workspace}")
    }
}

/// Releases the slot on drop, so the coordinator cannot leak it even when
/// dispatch panics.
pub struct EnvLockGuard {
    locker: Arc<EnvLocker>,
    repo_full_name: String,
    workspace: String,
    pull_num: u64,
}

impl EnvLockGuard {
    pub fn new(
        locker: Arc<EnvLocker>,
        repo_full_name: &str,
        workspace: &str,
        pull_num: u64,
    ) -> Self {
        Self {
            locker,
            repo_full_name: repo_full_name.to_string(),
            workspace: workspace.to_string(),
            pull_num,
        }
    }
}

impl Drop for EnvLockGuard {
    fn drop(&mut self) {
        self.locker
            .unlock(&self.repo_full_name, &self.workspace, self.pull_num);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_pull_and_workspace_is_rejected() {
        let locker = EnvLocker::new();
        assert!(locker.try_lock("owner/repo", "default", 1));
        assert!(!locker.try_lock("owner/repo", "default", 1));
        locker.unlock("owner/repo", "default", 1);
        assert!(locker.try_lock("owner/repo", "default", 1));
    }

    #[test]
    fn different_workspaces_proceed_in_parallel() {
        let locker = EnvLocker::new();
        assert!(locker.try_lock("owner/repo", "default", 1));
        assert!(locker.try_lock("owner/repo", "staging", 1));
        assert!(locker.try_lock("owner/repo", "default", 2));
    }

    #[test]
    fn guard_releases_on_drop() {
        let locker = Arc::new(EnvLocker::new());
        assert!(locker.try_lock("owner/repo", "default", 1));
        {
            let _guard = EnvLockGuard::new(locker.clone(), "owner/repo", "default", 1);
        }
        assert!(locker.try_lock("owner/repo", "default", 1));
    }
}
