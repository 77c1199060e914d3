//! The apply pipeline: approval gate, stored plans copied into the
//! checkout, per-plan `terraform apply`.
//!
//! Apply never releases the durable lock: on success the lock stands
//! until the pull closes, and on failure it stands for human follow-up.

use std::sync::Arc;

use crate::plans::{PlanRef, PlanStore};
use crate::terraform::TerraformClient;
use crate::vcs::VcsClient;
use crate::webhooks::{ApplyResult, WebhooksSender};
use crate::workspace::WorkspaceManager;

use super::pre_executor::{PreExecute, ProjectPreExecutor};
use super::{CommandContext, CommandResponse, ProjectOutcome, ProjectResult};
use crate::vcs::CommitStatus;

pub struct ApplyExecutor {
    pub vcs_client: Arc<dyn VcsClient>,
    pub terraform: Arc<TerraformClient>,
    pub workspace: Arc<dyn WorkspaceManager>,
    pub pre_executor: Arc<ProjectPreExecutor>,
    pub plans: Arc<PlanStore>,
    pub hooks: Arc<crate::hooks::HookRunner>,
    pub webhooks: Arc<WebhooksSender>,
    pub require_approval: bool,
}

impl ApplyExecutor {
    pub async fn execute(&self, ctx: &CommandContext) -> CommandResponse {
        if self.require_approval {
            let approved = match self
                .vcs_client
                .pull_is_approved(&ctx.base_repo, &ctx.pull, ctx.vcs_host)
                .await
            {
                Ok(approved) => approved,
                Err(e) => {
                    return CommandResponse::error(format!(
                        "checking if pull request was approved: {e:#}"
                    ))
                }
            };
            if !approved {
                return CommandResponse::failure(
                    "Pull request must be approved before running apply.",
                );
            }
            ctx.log.info("pull request was approved");
        }

        let repo_dir = match self
            .workspace
            .get_workspace(&ctx.base_repo, &ctx.pull, &ctx.command.workspace)
            .await
        {
            Ok(dir) => dir,
            Err(_) => return CommandResponse::failure("No workspace found. Did you run plan?"),
        };

        let plans = match self
            .plans
            .copy_plans(
                &repo_dir,
                &ctx.base_repo.full_name,
                &ctx.command.workspace,
                ctx.pull.num,
            )
            .await
        {
            Ok(plans) => plans,
            Err(e) => return CommandResponse::error(format!("getting plans: {e:#}")),
        };
        if plans.is_empty() {
            return CommandResponse::failure("No plans found for that environment.");
        }
        ctx.log.info(format!("found {} plan(s) to apply", plans.len()));

        let mut results = Vec::new();
        for plan in &plans {
            ctx.log
                .info(format!("running apply from {:?}", plan.project.path));
            let outcome = self.apply(ctx, &repo_dir, plan).await;
            results.push(ProjectResult {
                path: plan.project.path.clone(),
                outcome,
            });
        }

        let success = results
            .iter()
            .all(|r| r.status() == CommitStatus::Success);
        self.webhooks
            .send(
                &ctx.log,
                &ApplyResult {
                    workspace: ctx.command.workspace.clone(),
                    repo: ctx.base_repo.clone(),
                    pull: ctx.pull.clone(),
                    user: ctx.user.clone(),
                    success,
                },
            )
            .await;

        CommandResponse::results(results)
    }

    async fn apply(
        &self,
        ctx: &CommandContext,
        repo_dir: &std::path::Path,
        plan: &PlanRef,
    ) -> ProjectOutcome {
        let project_dir = repo_dir.join(&plan.project.path);

        // re-acquires the lock created at plan time (same-pull re-entry)
        let pre = match self.pre_executor.execute(ctx, repo_dir, &plan.project).await {
            PreExecute::Halt(outcome) => return outcome,
            PreExecute::Ready(ok) => ok,
        };

        let mut args: Vec<String> = vec![
            "apply".into(),
            "-no-color".into(),
            plan.local_path.to_string_lossy().into_owned(),
        ];
        args.extend(pre.config.extra_arguments("apply"));
        args.extend(ctx.command.flags.iter().cloned());

        let output = match self
            .terraform
            .run_command_with_version(
                &ctx.log,
                &project_dir,
                &args,
                &pre.terraform_version,
                &ctx.command.workspace,
            )
            .await
        {
            Ok(output) => output,
            Err(e) => return ProjectOutcome::Error(format!("{e:#}")),
        };

        if !pre.config.post_apply.commands.is_empty() {
            if let Err(e) = self
                .hooks
                .execute(
                    &ctx.log,
                    &pre.config.post_apply.commands,
                    &project_dir,
                    &ctx.command.workspace,
                    &pre.terraform_version,
                    "post_apply",
                )
                .await
            {
                return ProjectOutcome::Error(format!("running post_apply commands: {e:#}"));
            }
        }

        // the copied plan is spent; okay if the delete fails
        let _ = tokio::fs::remove_file(&plan.local_path).await;
        ProjectOutcome::ApplySuccess(output)
    }
}
