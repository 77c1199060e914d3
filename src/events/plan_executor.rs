//! The plan pipeline: modified files → projects → per-project
//! `terraform plan`, with the plan artifact and its lock created together.

use std::path::Path;
use std::sync::Arc;

use crate::locking::LockingClient;
use crate::models::Project;
use crate::plans::PlanStore;
use crate::terraform::TerraformClient;
use crate::util::query_escape;
use crate::vcs::VcsClient;
use crate::workspace::WorkspaceManager;

use super::pre_executor::{PreExecute, ProjectPreExecutor};
use super::project_finder;
use super::{CommandContext, CommandResponse, PlanSuccess, ProjectOutcome, ProjectResult};

/// Terraform variable carrying the username of whoever ran the command.
const ATLANTIS_USER_TF_VAR: &str = "atlantis_user";

pub struct PlanExecutor {
    pub vcs_client: Arc<dyn VcsClient>,
    pub terraform: Arc<TerraformClient>,
    pub locker: Arc<LockingClient>,
    pub workspace: Arc<dyn WorkspaceManager>,
    pub pre_executor: Arc<ProjectPreExecutor>,
    pub plans: Arc<PlanStore>,
    pub hooks: Arc<crate::hooks::HookRunner>,
    /// Base URL for discard links, e.g. `https://atlantis.example.com`.
    pub atlantis_url: String,
}

impl PlanExecutor {
    pub async fn execute(&self, ctx: &CommandContext) -> CommandResponse {
        let modified_files = match self
            .vcs_client
            .get_modified_files(&ctx.base_repo, &ctx.pull, ctx.vcs_host)
            .await
        {
            Ok(files) => files,
            Err(e) => return CommandResponse::error(format!("getting modified files: {e:#}")),
        };
        ctx.log.info(format!(
            "found {} files modified in this pull request",
            modified_files.len()
        ));

        let terraform_files = project_finder::filter_to_terraform(&modified_files);
        if terraform_files.is_empty() {
            return CommandResponse::failure("No Terraform files were modified.");
        }
        ctx.log.info(format!(
            "filtered modified files to {} non-module .tf files: {terraform_files:?}",
            terraform_files.len()
        ));

        let projects = project_finder::modified_projects(&ctx.base_repo.full_name, &terraform_files);
        let paths: Vec<&str> = projects.iter().map(|p| p.path.as_str()).collect();
        ctx.log.info(format!(
            "determined we have {} modified project(s) at path(s): {}",
            projects.len(),
            paths.join(", ")
        ));

        let clone_dir = match self
            .workspace
            .clone_repo(
                &ctx.log,
                &ctx.base_repo,
                &ctx.head_repo,
                &ctx.pull,
                &ctx.command.workspace,
            )
            .await
        {
            Ok(dir) => dir,
            Err(e) => return CommandResponse::error(format!("{e:#}")),
        };

        let mut results = Vec::new();
        for project in &projects {
            ctx.log
                .info(format!("running plan for project at path {:?}", project.path));
            let outcome = self.plan(ctx, &clone_dir, project).await;
            results.push(ProjectResult {
                path: project.path.clone(),
                outcome,
            });
        }
        CommandResponse::results(results)
    }

    /// Run the steps for one project's `terraform plan`.
    async fn plan(&self, ctx: &CommandContext, repo_dir: &Path, project: &Project) -> ProjectOutcome {
        let pre = match self.pre_executor.execute(ctx, repo_dir, project).await {
            PreExecute::Halt(outcome) => return outcome,
            PreExecute::Ready(ok) => ok,
        };
        let workspace = &ctx.command.workspace;
        let project_dir = repo_dir.join(&project.path);

        let plan_file = project_dir.join(format!("{workspace}.plan"));
        let user_var = format!("{ATLANTIS_USER_TF_VAR}={}", ctx.user.username);
        let mut args: Vec<String> = vec![
            "plan".into(),
            "-refresh".into(),
            "-no-color".into(),
            "-out".into(),
            plan_file.to_string_lossy().into_owned(),
            "-var".into(),
            user_var,
        ];
        args.extend(pre.config.extra_arguments("plan"));
        args.extend(ctx.command.flags.iter().cloned());

        // plan against env/<workspace>.tfvars when the project carries one
        let tfvars_file = Path::new("env").join(format!("{workspace}.tfvars"));
        if project_dir.join(&tfvars_file).exists() {
            args.push("-var-file".into());
            args.push(tfvars_file.to_string_lossy().into_owned());
        }

        let output = match self
            .terraform
            .run_command_with_version(
                &ctx.log,
                &project_dir,
                &args,
                &pre.terraform_version,
                workspace,
            )
            .await
        {
            Ok(output) => output,
            Err(e) => {
                // plan failed, roll the freshly created lock back
                self.unlock_best_effort(ctx, &pre.lock.key).await;
                return ProjectOutcome::Error(format!("{e:#}"));
            }
        };
        ctx.log.info("plan succeeded");

        if let Err(e) = self
            .plans
            .save_plan(&plan_file, project, workspace, ctx.pull.num)
            .await
        {
            self.unlock_best_effort(ctx, &pre.lock.key).await;
            return ProjectOutcome::Error(format!("saving plan: {e:#}"));
        }

        if !pre.config.post_plan.commands.is_empty() {
            if let Err(e) = self
                .hooks
                .execute(
                    &ctx.log,
                    &pre.config.post_plan.commands,
                    &project_dir,
                    workspace,
                    &pre.terraform_version,
                    "post_plan",
                )
                .await
            {
                return ProjectOutcome::Error(format!("running post_plan commands: {e:#}"));
            }
        }

        ProjectOutcome::PlanSuccess(PlanSuccess {
            terraform_output: output,
            lock_url: self.lock_url(&pre.lock.key),
        })
    }

    async fn unlock_best_effort(&self, ctx: &CommandContext, key: &str) {
        if let Err(e) = self.locker.unlock(key).await {
            ctx.log
                .err(format!("error unlocking state after plan error: {e:#}"));
        }
    }

    fn lock_url(&self, key: &str) -> String {
        format!(
            "{}/locks?id={}&method=DELETE",
            self.atlantis_url,
            query_escape(key)
        )
    }
}
