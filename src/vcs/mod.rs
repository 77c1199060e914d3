//! VCS host capability set.
//!
//! Everything the command engine needs from a hosting platform (modified
//! files, comments, approval state, commit statuses) is one trait with one
//! implementation per platform, plus a router that picks an implementation
//! from the `Host` tag carried by every command context.

pub mod github;
pub mod gitlab;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{PullRequest, Repo};

use github::GithubClient;
use gitlab::GitlabClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Host {
    Github,
    Gitlab,
}

/// The 3-state commit status abstraction over the platform state strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    Pending,
    Success,
    Failed,
}

impl CommitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Capability set implemented per platform and by the router.
#[async_trait]
pub trait VcsClient: Send + Sync {
    async fn get_modified_files(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        host: Host,
    ) -> Result<Vec<String>>;

    async fn create_comment(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        comment: &str,
        host: Host,
    ) -> Result<()>;

    async fn pull_is_approved(&self, repo: &Repo, pull: &PullRequest, host: Host) -> Result<bool>;

    async fn update_status(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        status: CommitStatus,
        description: &str,
        host: Host,
    ) -> Result<()>;
}

/// Routes calls to the configured platform client by `Host` tag.
///
/// A call for a platform that was not configured is a bug in the caller:
/// the events controller rejects webhooks for unsupported hosts up front.
pub struct ClientProxy {
    github: Option<Arc<GithubClient>>,
    gitlab: Option<Arc<GitlabClient>>,
}

impl ClientProxy {
    pub fn new(github: Option<Arc<GithubClient>>, gitlab: Option<Arc<GitlabClient>>) -> Self {
        Self { github, gitlab }
    }

    fn github(&self) -> Result<&GithubClient> {
        match &self.github {
            Some(c) => Ok(c.as_ref()),
            None => bail!("not configured to support GitHub"),
        }
    }

    fn gitlab(&self) -> Result<&GitlabClient> {
        match &self.gitlab {
            Some(c) => Ok(c.as_ref()),
            None => bail!("not configured to support GitLab"),
        }
    }
}

#[async_trait]
impl VcsClient for ClientProxy {
    async fn get_modified_files(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        host: Host,
    ) -> Result<Vec<String>> {
        match host {
            Host::Github => self.github()?.get_modified_files(repo, pull).await,
            Host::Gitlab => self.gitlab()?.get_modified_files(repo, pull).await,
        }
    }

    async fn create_comment(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        comment: &str,
        host: Host,
    ) -> Result<()> {
        match host {
            Host::Github => self.github()?.create_comment(repo, pull, comment).await,
            Host::Gitlab => self.gitlab()?.create_comment(repo, pull, comment).await,
        }
    }

    async fn pull_is_approved(&self, repo: &Repo, pull: &PullRequest, host: Host) -> Result<bool> {
        match host {
            Host::Github => self.github()?.pull_is_approved(repo, pull).await,
            Host::Gitlab => self.gitlab()?.pull_is_approved(repo, pull).await,
        }
    }

    async fn update_status(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        status: CommitStatus,
        description: &str,
        host: Host,
    ) -> Result<()> {
        match host {
            Host::Github => {
                self.github()?
                    .update_status(repo, pull, status, description)
                    .await
            }
            Host::Gitlab => {
                self.gitlab()?
                    .update_status(repo, pull, status, description)
                    .await
            }
        }
    }
}
