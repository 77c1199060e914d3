//! The command engine: everything between an authenticated webhook and the
//! comment posted back on the pull request.

pub mod apply_executor;
pub mod command_handler;
pub mod comment_renderer;
pub mod env_locker;
pub mod event_parser;
pub mod plan_executor;
pub mod pre_executor;
pub mod project_config;
pub mod pull_cleaner;
pub mod project_finder;
pub mod status_updater;

use std::sync::Arc;

use crate::logging::CommandLog;
use crate::models::{PullRequest, Repo, User};
use crate::vcs::{CommitStatus, Host};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandName {
    Plan,
    Apply,
    Help,
}

impl CommandName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Help => "help",
        }
    }
}

impl std::fmt::Display for CommandName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed comment command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: CommandName,
    /// Terraform workspace (a.k.a. environment); `"default"` when the
    /// comment omitted it.
    pub workspace: String,
    pub verbose: bool,
    /// Flags passed through to the tool verbatim.
    pub flags: Vec<String>,
}

/// Everything a command execution needs; created per ingested event.
#[derive(Clone)]
pub struct CommandContext {
    pub base_repo: Repo,
    pub head_repo: Repo,
    pub pull: PullRequest,
    pub user: User,
    pub command: Command,
    pub log: Arc<CommandLog>,
    pub vcs_host: Host,
}

/// Result of running a command against one project.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectResult {
    /// Repo-root-relative project path.
    pub path: String,
    pub outcome: ProjectOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectOutcome {
    /// Something went wrong running the pipeline; the message includes any
    /// tool output.
    Error(String),
    /// A deliberate stop with a user-facing explanation (e.g. lock held by
    /// another pull).
    Failure(String),
    PlanSuccess(PlanSuccess),
    ApplySuccess(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanSuccess {
    pub terraform_output: String,
    /// Link to discard the plan and its lock.
    pub lock_url: String,
}

impl ProjectResult {
    pub fn status(&self) -> CommitStatus {
        match self.outcome {
            ProjectOutcome::Error(_) | ProjectOutcome::Failure(_) => CommitStatus::Failed,
            ProjectOutcome::PlanSuccess(_) | ProjectOutcome::ApplySuccess(_) => {
                CommitStatus::Success
            }
        }
    }
}

/// Aggregate result of one command execution, rendered into a single
/// comment and one commit status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandResponse {
    /// Setup error: nothing project-specific ran.
    pub error: Option<String>,
    /// Setup failure with a deliberate single-line explanation.
    pub failure: String,
    pub project_results: Vec<ProjectResult>,
}

impl CommandResponse {
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            error: Some(msg.into()),
            ..Default::default()
        }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            failure: msg.into(),
            ..Default::default()
        }
    }

    pub fn results(project_results: Vec<ProjectResult>) -> Self {
        Self {
            project_results,
            ..Default::default()
        }
    }
}
