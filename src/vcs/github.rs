//! GitHub REST client and webhook payload types.
//!
//! The client talks to api.github.com, or `https://<hostname>/api/v3` for
//! GitHub Enterprise. All requests authenticate with the bot user's basic
//! credentials. Webhook payloads deserialize with every field optional;
//! the event parser null-checks what it needs and names the missing field.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::models::{PullRequest, Repo};

use super::CommitStatus;

/// Commit status context shown in the PR checks list.
const STATUS_CONTEXT: &str = "Atlantis";
const PER_PAGE: usize = 100;

// ─── Webhook payloads ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GithubUser {
    pub login: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GithubRepository {
    pub full_name: Option<String>,
    pub name: Option<String>,
    pub owner: Option<GithubUser>,
    pub clone_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GithubIssue {
    pub number: Option<u64>,
    pub user: Option<GithubUser>,
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GithubComment {
    pub user: Option<GithubUser>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GithubIssueCommentEvent {
    pub action: Option<String>,
    pub issue: Option<GithubIssue>,
    pub comment: Option<GithubComment>,
    pub repository: Option<GithubRepository>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GithubBranch {
    pub sha: Option<String>,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    pub repo: Option<GithubRepository>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GithubPullRequest {
    pub number: Option<u64>,
    pub html_url: Option<String>,
    pub state: Option<String>,
    pub user: Option<GithubUser>,
    pub head: Option<GithubBranch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GithubPullRequestEvent {
    pub action: Option<String>,
    pub pull_request: Option<GithubPullRequest>,
    pub repository: Option<GithubRepository>,
}

// ─── API response shapes ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PullFile {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct Review {
    state: Option<String>,
}

// ─── Client ──────────────────────────────────────────────────────────────────

pub struct GithubClient {
    client: reqwest::Client,
    base_url: String,
    user: String,
    token: String,
}

impl GithubClient {
    pub fn new(hostname: &str, user: &str, token: &str) -> Result<Self> {
        // github.com serves its API from a dedicated host; Enterprise nests
        // it under /api/v3.
        let base_url = if hostname == "github.com" {
            "https://api.github.com".to_string()
        } else {
            format!("https://{hostname}/api/v3")
        };
        let client = reqwest::Client::builder()
            .user_agent(concat!("atlantisd/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building GitHub client")?;
        Ok(Self {
            client,
            base_url,
            user: user.trim().to_string(),
            token: token.trim().to_string(),
        })
    }

    /// Names of files modified in the pull request, paths relative to the
    /// repo root. Pages through the list endpoint.
    pub async fn get_modified_files(&self, repo: &Repo, pull: &PullRequest) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut page = 1;
        loop {
            let url = format!(
                "{}/repos/{}/{}/pulls/{}/files",
                self.base_url, repo.owner, repo.name, pull.num
            );
            let batch: Vec<PullFile> = self
                .client
                .get(&url)
                .basic_auth(&self.user, Some(&self.token))
                .query(&[("per_page", PER_PAGE.to_string()), ("page", page.to_string())])
                .send()
                .await?
                .error_for_status()
                .context("listing modified files")?
                .json()
                .await?;
            let batch_len = batch.len();
            files.extend(batch.into_iter().map(|f| f.filename));
            if batch_len < PER_PAGE {
                return Ok(files);
            }
            page += 1;
        }
    }

    pub async fn create_comment(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        comment: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.base_url, repo.owner, repo.name, pull.num
        );
        self.client
            .post(&url)
            .basic_auth(&self.user, Some(&self.token))
            .json(&json!({ "body": comment }))
            .send()
            .await?
            .error_for_status()
            .context("creating comment")?;
        Ok(())
    }

    /// True if any review on the pull request is in the APPROVED state.
    pub async fn pull_is_approved(&self, repo: &Repo, pull: &PullRequest) -> Result<bool> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/reviews",
            self.base_url, repo.owner, repo.name, pull.num
        );
        let reviews: Vec<Review> = self
            .client
            .get(&url)
            .basic_auth(&self.user, Some(&self.token))
            .send()
            .await?
            .error_for_status()
            .context("getting reviews")?
            .json()
            .await?;
        Ok(reviews
            .iter()
            .any(|r| r.state.as_deref() == Some("APPROVED")))
    }

    /// The raw pull request payload; the event parser turns it into models.
    pub async fn get_pull_request(&self, repo: &Repo, num: u64) -> Result<GithubPullRequest> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}",
            self.base_url, repo.owner, repo.name, num
        );
        let pull = self
            .client
            .get(&url)
            .basic_auth(&self.user, Some(&self.token))
            .send()
            .await?
            .error_for_status()
            .context("getting pull request")?
            .json()
            .await?;
        Ok(pull)
    }

    /// Update the status badge on the pull request's head commit.
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
            CommitStatus::Failed => "failure",
        };
        let url = format!(
            "{}/repos/{}/{}/statuses/{}",
            self.base_url, repo.owner, repo.name, pull.head_commit
        );
        self.client
            .post(&url)
            .basic_auth(&self.user, Some(&self.token))
            .json(&json!({
                "state": state,
                "description": description,
                "context": STATUS_CONTEXT,
            }))
            .send()
            .await?
            .error_for_status()
            .context("updating commit status")?;
        Ok(())
    }
}

/// Fetches pull request details; a seam so the command handler can be
/// exercised without the network.
#[async_trait]
pub trait GithubPullGetter: Send + Sync {
    async fn get_pull_request(&self, repo: &Repo, num: u64) -> Result<GithubPullRequest>;
}

#[async_trait]
impl GithubPullGetter for GithubClient {
    async fn get_pull_request(&self, repo: &Repo, num: u64) -> Result<GithubPullRequest> {
        GithubClient::get_pull_request(self, repo, num).await
    }
}
