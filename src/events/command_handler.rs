//! The command coordinator: first step when a comment command arrives.
//!
//! Re-fetches the pull request from the VCS (webhook bodies are not
//! trusted for state), claims the in-memory pull/workspace slot, runs the
//! executor, and always finishes by posting the commit status and the
//! result comment. Dispatch runs in its own task so a panic in an executor
//! is caught here, reported on the pull request, and cannot leak the
//! serializer slot.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

use crate::logging::CommandLog;
use crate::models::{PullRequest, PullState, Repo, User};
use crate::vcs::github::GithubPullGetter;
use crate::vcs::gitlab::GitlabMergeRequestGetter;
use crate::vcs::{CommitStatus, Host, VcsClient};

use super::apply_executor::ApplyExecutor;
use super::comment_renderer;
use super::env_locker::{EnvLockGuard, EnvLocker};
use super::event_parser::EventParser;
use super::plan_executor::PlanExecutor;
use super::status_updater::CommitStatusUpdater;
use super::{Command, CommandContext, CommandName, CommandResponse};

const CLOSED_PULL_COMMENT: &str = "Atlantis commands can't be run on closed pull requests";

/// Entry point for accepted webhook commands; a seam so the events
/// controller can be exercised without executing anything.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute_command(
        &self,
        base_repo: Repo,
        head_repo: Option<Repo>,
        user: User,
        pull_num: u64,
        command: Command,
        vcs_host: Host,
    );
}

pub struct CommandHandler {
    pub plan_executor: Arc<PlanExecutor>,
    pub apply_executor: Arc<ApplyExecutor>,
    pub vcs_client: Arc<dyn VcsClient>,
    pub github_pull_getter: Option<Arc<dyn GithubPullGetter>>,
    pub gitlab_mr_getter: Option<Arc<dyn GitlabMergeRequestGetter>>,
    pub event_parser: Arc<EventParser>,
    pub status_updater: Arc<CommitStatusUpdater>,
    pub env_locker: Arc<EnvLocker>,
}

#[async_trait]
impl CommandRunner for CommandHandler {
    async fn execute_command(
        &self,
        base_repo: Repo,
        head_repo: Option<Repo>,
        user: User,
        pull_num: u64,
        command: Command,
        vcs_host: Host,
    ) {
        let fetched = match vcs_host {
            Host::Github => self.github_data(&base_repo, pull_num).await,
            Host::Gitlab => self.gitlab_data(&base_repo, head_repo, pull_num).await,
        };
        let (pull, head_repo) = match fetched {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(
                    repo = %base_repo.full_name,
                    pull = pull_num,
                    "failed fetching pull request: {e:#}"
                );
                return;
            }
        };

        let log = Arc::new(CommandLog::new(&base_repo.full_name, pull.num));
        let ctx = CommandContext {
            base_repo,
            head_repo,
            pull,
            user,
            command,
            log,
            vcs_host,
        };
        self.run(ctx).await;
    }
}

impl CommandHandler {
    async fn github_data(&self, base_repo: &Repo, pull_num: u64) -> Result<(PullRequest, Repo)> {
        let getter = self
            .github_pull_getter
            .as_ref()
            .ok_or_else(|| anyhow!("Atlantis not configured to support GitHub"))?;
        let payload = getter
            .get_pull_request(base_repo, pull_num)
            .await
            .context("making pull request API call to GitHub")?;
        self.event_parser
            .parse_github_pull(&payload)
            .context("extracting required fields from pull request data")
    }

    async fn gitlab_data(
        &self,
        base_repo: &Repo,
        head_repo: Option<Repo>,
        pull_num: u64,
    ) -> Result<(PullRequest, Repo)> {
        let getter = self
            .gitlab_mr_getter
            .as_ref()
            .ok_or_else(|| anyhow!("Atlantis not configured to support GitLab"))?;
        let payload = getter
            .get_merge_request(&base_repo.full_name, pull_num)
            .await
            .context("making merge request API call to GitLab")?;
        let pull = self
            .event_parser
            .parse_gitlab_merge_request(&payload)
            .context("extracting required fields from merge request data")?;
        // the comment event already carried the source repo
        Ok((pull, head_repo.unwrap_or_else(|| base_repo.clone())))
    }

    async fn run(&self, ctx: CommandContext) {
        if ctx.pull.state != PullState::Open {
            ctx.log.info("command was run on closed pull request");
            self.comment(&ctx, CLOSED_PULL_COMMENT).await;
            return;
        }

        if let Err(e) = self
            .status_updater
            .update(
                &ctx.base_repo,
                &ctx.pull,
                CommitStatus::Pending,
                ctx.command.name,
                ctx.vcs_host,
            )
            .await
        {
            ctx.log.warn(format!("failed setting pending status: {e:#}"));
        }

        if !self.env_locker.try_lock(
            &ctx.base_repo.full_name,
            &ctx.command.workspace,
            ctx.pull.num,
        ) {
            let msg = format!(
                "The {} environment is currently locked by another command that is running for \
                 this pull request. Wait until the previous command is complete and try again.",
                ctx.command.workspace
            );
            ctx.log.warn(&msg);
            self.update_pull(&ctx, CommandResponse::failure(msg)).await;
            return;
        }
        let _guard = EnvLockGuard::new(
            self.env_locker.clone(),
            &ctx.base_repo.full_name,
            &ctx.command.workspace,
            ctx.pull.num,
        );

        // run dispatch in a child task: a panicking executor surfaces here
        // as a JoinError instead of tearing down the webhook task
        let dispatch = {
            let ctx = ctx.clone();
            let plan_executor = self.plan_executor.clone();
            let apply_executor = self.apply_executor.clone();
            tokio::spawn(async move {
                match ctx.command.name {
                    CommandName::Plan => plan_executor.execute(&ctx).await,
                    CommandName::Apply => apply_executor.execute(&ctx).await,
                    // nothing to execute; the renderer emits the usage text
                    CommandName::Help => CommandResponse::default(),
                }
            })
        };

        match dispatch.await {
            Ok(response) => self.update_pull(&ctx, response).await,
            Err(join_err) if join_err.is_panic() => {
                let payload = panic_message(join_err);
                ctx.log.err(format!("PANIC during {}: {payload}", ctx.command.name));
                self.comment(
                    &ctx,
                    &format!(
                        "**Error: command task panicked. This is a bug.**\n```\n{payload}\n```"
                    ),
                )
                .await;
            }
            Err(join_err) => {
                ctx.log.err(format!("dispatch task failed: {join_err}"));
                self.update_pull(
                    &ctx,
                    CommandResponse::error(format!("command task failed: {join_err}")),
                )
                .await;
            }
        }
        // _guard drops here, releasing the pull/workspace slot
    }

    async fn update_pull(&self, ctx: &CommandContext, response: CommandResponse) {
        if let Some(error) = &response.error {
            ctx.log.err(error);
        } else if !response.failure.is_empty() {
            ctx.log.warn(&response.failure);
        }

        if let Err(e) = self
            .status_updater
            .update_project_result(ctx, &response)
            .await
        {
            ctx.log.warn(format!("failed updating commit status: {e:#}"));
        }

        let comment = comment_renderer::render(
            &response,
            ctx.command.name,
            &ctx.log.history(),
            ctx.command.verbose,
        );
        self.comment(ctx, &comment).await;
    }

    async fn comment(&self, ctx: &CommandContext, comment: &str) {
        if let Err(e) = self
            .vcs_client
            .create_comment(&ctx.base_repo, &ctx.pull, comment, ctx.vcs_host)
            .await
        {
            ctx.log.err(format!("failed creating comment: {e:#}"));
        }
    }
}

fn panic_message(join_err: tokio::task::JoinError) -> String {
    match join_err.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            }
        }
        Err(join_err) => join_err.to_string(),
    }
}
