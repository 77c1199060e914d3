//! Commit status updates: pending at the start of a command, worst-of the
//! per-project results at the end.

use std::sync::Arc;

use anyhow::Result;

use crate::models::{PullRequest, Repo};
use crate::util::title_case;
use crate::vcs::{CommitStatus, VcsClient};

use super::{CommandContext, CommandName, CommandResponse};

pub struct CommitStatusUpdater {
    client: Arc<dyn VcsClient>,
}

impl CommitStatusUpdater {
    pub fn new(client: Arc<dyn VcsClient>) -> Self {
        Self { client }
    }

    pub async fn update(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        status: CommitStatus,
        command: CommandName,
        host: crate::vcs::Host,
    ) -> Result<()> {
        let description = format!(
            "{} {}",
            title_case(command.as_str()),
            title_case(status.as_str())
        );
        self.client
            .update_status(repo, pull, status, &description, host)
            .await
    }

    /// Set the final status: any error or failure makes the whole command
    /// `failed`, otherwise the worst project result wins.
    pub async fn update_project_result(
        &self,
        ctx: &CommandContext,
        response: &CommandResponse,
    ) -> Result<()> {
        let status = if response.error.is_some() || !response.failure.is_empty() {
            CommitStatus::Failed
        } else {
            worst_status(response.project_results.iter().map(|r| r.status()))
        };
        self.update(&ctx.base_repo, &ctx.pull, status, ctx.command.name, ctx.vcs_host)
            .await
    }
}

fn worst_status(statuses: impl Iterator<Item = CommitStatus>) -> CommitStatus {
    for status in statuses {
        if status == CommitStatus::Failed {
            return CommitStatus::Failed;
        }
    }
    CommitStatus::Success
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_status_fails_when_any_failed() {
        assert_eq!(
            worst_status([CommitStatus::Success, CommitStatus::Failed].into_iter()),
            CommitStatus::Failed
        );
        assert_eq!(
            worst_status([CommitStatus::Success, CommitStatus::Success].into_iter()),
            CommitStatus::Success
        );
        // no project results at all still reads as success
        assert_eq!(worst_status(std::iter::empty()), CommitStatus::Success);
    }
}
