//! Domain entities shared across the daemon.
//!
//! Everything here is webhook-derived and immutable for the lifetime of a
//! command execution, except [`ProjectLock`] which is persisted by the lock
//! store as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A repository on one of the supported VCS hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    /// `owner/name`.
    pub full_name: String,
    pub owner: String,
    pub name: String,
    /// HTTPS clone URL with the bot user's credentials embedded.
    /// Never logged or persisted; use `sanitized_clone_url` for that.
    pub clone_url: String,
    /// The clone URL as the webhook delivered it, credential-free.
    pub sanitized_clone_url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullState {
    #[default]
    Open,
    Closed,
}

/// A pull request (GitHub) or merge request (GitLab).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Number unique within the repo.
    pub num: u64,
    pub head_commit: String,
    pub url: String,
    pub branch: String,
    pub author: String,
    pub state: PullState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
}

/// A directory within a repository that is planned/applied as a unit.
/// `path` is repo-root-relative with no trailing slash; `"."` for the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Project {
    pub repo_full_name: String,
    pub path: String,
}

impl Project {
    pub fn new(repo_full_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            repo_full_name: repo_full_name.into(),
            path: normalize_path(&path.into()),
        }
    }
}

/// Strip any trailing slash and map the empty path to `"."`.
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        ".".to_string()
    } else {
        trimmed.to_string()
    }
}

/// An exclusive claim on `(project, workspace)` scoped to a pull request.
/// Stored durably; survives restarts. Released only by explicit unlock or
/// pull close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectLock {
    pub project: Project,
    /// Workspace name, e.g. `"default"` or `"staging"`.
    pub workspace: String,
    pub pull: PullRequest,
    pub user: User,
    pub time: DateTime<Utc>,
}
