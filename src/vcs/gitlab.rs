//! GitLab REST client and webhook payload types.
//!
//! Talks to the v4 API of gitlab.com or a self-hosted instance. Project
//! paths in URLs are the URL-encoded `namespace/name`. Merge requests are
//! addressed by IID (the number shown in the UI), matching the pull number
//! used everywhere else in the daemon.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::models::{PullRequest, Repo};
use crate::util::query_escape;

use super::CommitStatus;

const STATUS_CONTEXT: &str = "Atlantis";

// ─── Webhook payloads ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitlabUser {
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitlabProject {
    pub path_with_namespace: Option<String>,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub git_http_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitlabCommit {
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitlabMergeAttributes {
    pub iid: Option<u64>,
    pub url: Option<String>,
    pub state: Option<String>,
    pub source_branch: Option<String>,
    pub last_commit: Option<GitlabCommit>,
}

/// `Merge Request Hook` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitlabMergeEvent {
    pub object_attributes: Option<GitlabMergeAttributes>,
    pub user: Option<GitlabUser>,
    pub project: Option<GitlabProject>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitlabNoteAttributes {
    pub note: Option<String>,
    pub noteable_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitlabCommentMergeRequest {
    pub iid: Option<u64>,
    pub source: Option<GitlabProject>,
}

/// `Note Hook` payload on a merge request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitlabMergeCommentEvent {
    pub object_attributes: Option<GitlabNoteAttributes>,
    pub merge_request: Option<GitlabCommentMergeRequest>,
    pub user: Option<GitlabUser>,
    pub project: Option<GitlabProject>,
}

// ─── API response shapes ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitlabMergeRequest {
    pub iid: Option<u64>,
    pub web_url: Option<String>,
    pub state: Option<String>,
    pub sha: Option<String>,
    pub source_branch: Option<String>,
    pub author: Option<GitlabUser>,
}

#[derive(Debug, Deserialize)]
struct MergeRequestChanges {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    new_path: String,
}

#[derive(Debug, Deserialize)]
struct Approvals {
    #[serde(default)]
    approvals_missing: u64,
}

// ─── Client ──────────────────────────────────────────────────────────────────

pub struct GitlabClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl GitlabClient {
    pub fn new(hostname: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("atlantisd/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building GitLab client")?;
        Ok(Self {
            client,
            base_url: format!("https://{hostname}/api/v4"),
            token: token.trim().to_string(),
        })
    }

    /// Names of files modified in the merge request, new paths relative to
    /// the repo root.
    pub async fn get_modified_files(&self, repo: &Repo, pull: &PullRequest) -> Result<Vec<String>> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}/changes",
            self.base_url,
            query_escape(&repo.full_name),
            pull.num
        );
        let mr: MergeRequestChanges = self
            .client
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?
            .error_for_status()
            .context("listing merge request changes")?
            .json()
            .await?;
        Ok(mr.changes.into_iter().map(|c| c.new_path).collect())
    }

    pub async fn create_comment(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        comment: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}/notes",
            self.base_url,
            query_escape(&repo.full_name),
            pull.num
        );
        self.client
            .post(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .json(&json!({ "body": comment }))
            .send()
            .await?
            .error_for_status()
            .context("creating merge request note")?;
        Ok(())
    }

    /// True when no further approvals are required on the merge request.
    pub async fn pull_is_approved(&self, repo: &Repo, pull: &PullRequest) -> Result<bool> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}/approvals",
            self.base_url,
            query_escape(&repo.full_name),
            pull.num
        );
        let approvals: Approvals = self
            .client
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?
            .error_for_status()
            .context("getting approvals")?
            .json()
            .await?;
        Ok(approvals.approvals_missing == 0)
    }

    pub async fn get_merge_request(
        &self,
        repo_full_name: &str,
        num: u64,
    ) -> Result<GitlabMergeRequest> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}",
            self.base_url,
            query_escape(repo_full_name),
            num
        );
        let mr = self
            .client
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?
            .error_for_status()
            .context("getting merge request")?
            .json()
            .await?;
        Ok(mr)
    }

    /// Update the build status of the merge request's head commit.
    pub async fn update_status(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        status: CommitStatus,
        description: &str,
    ) -> Result<()> {
        let state = match status {
            CommitStatus::Pending => "pending",
            CommitStatus::Success => "success",
            CommitStatus::Failed => "failed",
        };
        let url = format!(
            "{}/projects/{}/statuses/{}",
            self.base_url,
            query_escape(&repo.full_name),
            pull.head_commit
        );
        self.client
            .post(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .json(&json!({
                "state": state,
                "context": STATUS_CONTEXT,
                "description": description,
            }))
            .send()
            .await?
            .error_for_status()
            .context("updating commit status")?;
        Ok(())
    }
}

/// Fetches merge request details; a seam so the command handler can be
/// exercised without the network.
#[async_trait]
pub trait GitlabMergeRequestGetter: Send + Sync {
    async fn get_merge_request(&self, repo_full_name: &str, num: u64)
        -> Result<GitlabMergeRequest>;
}

#[async_trait]
impl GitlabMergeRequestGetter for GitlabClient {
    async fn get_merge_request(
        &self,
        repo_full_name: &str,
        num: u64,
    ) -> Result<GitlabMergeRequest> {
        GitlabClient::get_merge_request(self, repo_full_name, num).await
    }
}
