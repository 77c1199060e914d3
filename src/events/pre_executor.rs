//! Per-project setup that runs before the tool: config load, durable lock
//! acquisition, pre-hooks, init and workspace selection.
//!
//! The outcome is an explicit state: either everything the stage needs
//! (`Ready`) or a terminal per-project result (`Halt`) that the executor
//! records and moves past; one project halting never stops the others.

use std::path::Path;
use std::sync::Arc;

use semver::Version;

use crate::hooks::HookRunner;
use crate::locking::{LockingClient, TryLockResponse};
use crate::models::Project;
use crate::terraform::TerraformClient;

use super::project_config::ProjectConfig;
use super::{CommandContext, CommandName, ProjectOutcome};

pub enum PreExecute {
    /// Stop this project with the given result.
    Halt(ProjectOutcome),
    Ready(PreExecuteOk),
}

pub struct PreExecuteOk {
    pub config: ProjectConfig,
    pub terraform_version: Version,
    pub lock: TryLockResponse,
}

pub struct ProjectPreExecutor {
    locker: Arc<LockingClient>,
    terraform: Arc<TerraformClient>,
    hooks: Arc<HookRunner>,
}

impl ProjectPreExecutor {
    pub fn new(
        locker: Arc<LockingClient>,
        terraform: Arc<TerraformClient>,
        hooks: Arc<HookRunner>,
    ) -> Self {
        Self {
            locker,
            terraform,
            hooks,
        }
    }

    pub async fn execute(
        &self,
        ctx: &CommandContext,
        repo_dir: &Path,
        project: &Project,
    ) -> PreExecute {
        let project_dir = repo_dir.join(&project.path);

        // optional per-project config
        let config = if ProjectConfig::exists(&project_dir) {
            ctx.log.info(format!("config file found in {:?}", project_dir));
            match ProjectConfig::read(&project_dir).await {
                Ok(config) => config,
                Err(e) => return PreExecute::Halt(ProjectOutcome::Error(format!("{e:#}"))),
            }
        } else {
            ProjectConfig::default()
        };

        let terraform_version = match self
            .terraform
            .resolve_version(config.terraform_version.as_deref())
        {
            Ok(v) => v,
            Err(e) => return PreExecute::Halt(ProjectOutcome::Error(format!("{e:#}"))),
        };

        let workspace = &ctx.command.workspace;
        let lock = match self
            .locker
            .try_lock(project, workspace, &ctx.pull, &ctx.user)
            .await
        {
            Ok(lock) => lock,
            Err(e) => {
                return PreExecute::Halt(ProjectOutcome::Error(format!(
                    "acquiring lock: {e:#}"
                )))
            }
        };
        if !lock.acquired {
            return PreExecute::Halt(ProjectOutcome::Failure(format!(
                "This project is currently locked by an unapplied plan from pull #{}.",
                lock.current.pull.num
            )));
        }
        ctx.log
            .info(format!("acquired lock with id {:?}", lock.key));

        let (hook_commands, stage) = match ctx.command.name {
            CommandName::Apply => (&config.pre_apply.commands, "pre_apply"),
            _ => (&config.pre_plan.commands, "pre_plan"),
        };
        if !hook_commands.is_empty() {
            if let Err(e) = self
                .hooks
                .execute(
                    &ctx.log,
                    hook_commands,
                    &project_dir,
                    workspace,
                    &terraform_version,
                    stage,
                )
                .await
            {
                self.rollback(ctx, &lock).await;
                return PreExecute::Halt(ProjectOutcome::Error(format!(
                    "running {stage} commands: {e:#}"
                )));
            }
        }

        let extra_init_args = config.extra_arguments("init");
        if let Err(e) = self
            .terraform
            .run_init_and_workspace(
                &ctx.log,
                &project_dir,
                workspace,
                &extra_init_args,
                &terraform_version,
            )
            .await
        {
            self.rollback(ctx, &lock).await;
            return PreExecute::Halt(ProjectOutcome::Error(format!("{e:#}")));
        }

        PreExecute::Ready(PreExecuteOk {
            config,
            terraform_version,
            lock,
        })
    }

    /// Release a lock we acquired in this call when setup fails mid-way.
    /// Only during plan: an apply re-entered a lock created by the plan and
    /// must leave it in place for human follow-up. Rollback is best-effort.
    async fn rollback(&self, ctx: &CommandContext, lock: &TryLockResponse) {
        if ctx.command.name == CommandName::Apply {
            return;
        }
        if let Err(e) = self.locker.unlock(&lock.key).await {
            ctx.log
                .err(format!("error unlocking state after setup error: {e:#}"));
        }
    }
}
