//! Renders a command's aggregate result into the single markdown comment
//! posted back on the pull request.

use crate::util::title_case;

use super::{CommandName, CommandResponse, ProjectOutcome};

const HELP_USAGE: &str = "```cmake
atlantis <command> [workspace] [--verbose] [flags]

Commands:
  plan   Runs 'terraform plan' for the projects modified in this pull request
  apply  Runs 'terraform apply' for the plans generated by a previous plan command
  help   Shows this usage
```
";

/// Render `response` for a `command` execution. `log_history` is appended
/// in a collapsible section when the command carried `--verbose`.
pub fn render(
    response: &CommandResponse,
    command: CommandName,
    log_history: &str,
    verbose: bool,
) -> String {
    let cmd = title_case(command.as_str());
    let mut body = if let Some(error) = &response.error {
        format!("**{cmd} Error**\n```\n{error}\n```\n")
    } else if !response.failure.is_empty() {
        format!("**{cmd} Failed**: {}\n", response.failure)
    } else if command == CommandName::Help {
        HELP_USAGE.to_string()
    } else {
        render_project_results(response, &cmd)
    };

    if verbose {
        body.push_str(&format!(
            "\n<details><summary>Log</summary>\n\n```\n{log_history}```\n</details>\n"
        ));
    }
    body
}

fn render_project_results(response: &CommandResponse, cmd: &str) -> String {
    if let [only] = response.project_results.as_slice() {
        return render_outcome(&only.outcome, cmd);
    }

    let mut body = format!(
        "Ran {cmd} in {} projects:\n\n",
        response.project_results.len()
    );
    for result in &response.project_results {
        body.push_str(&format!("### `{}`\n", result.path));
        body.push_str(&render_outcome(&result.outcome, cmd));
        body.push_str("\n---\n");
    }
    body
}

fn render_outcome(outcome: &ProjectOutcome, cmd: &str) -> String {
    match outcome {
        ProjectOutcome::Error(error) => format!("**{cmd} Error**\n```\n{error}\n```\n"),
        ProjectOutcome::Failure(failure) => format!("**{cmd} Failed**: {failure}\n"),
        ProjectOutcome::PlanSuccess(plan) => format!(
            "```diff\n{}```\n\n* To **discard** this plan and unlock the state, click \
             [here]({})\n",
            ensure_trailing_newline(&plan.terraform_output),
            plan.lock_url
        ),
        ProjectOutcome::ApplySuccess(output) => {
            format!("```diff\n{}```\n", ensure_trailing_newline(output))
        }
    }
}

fn ensure_trailing_newline(s: &str) -> String {
    if s.ends_with('\n') || s.is_empty() {
        s.to_string()
    } else {
        format!("{s}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{PlanSuccess, ProjectResult};

    #[test]
    fn renders_setup_error() {
        let response = CommandResponse::error("getting modified files: 404");
        let comment = render(&response, CommandName::Plan, "", false);
        assert!(comment.starts_with("**Plan Error**"));
        assert!(comment.contains("getting modified files: 404"));
    }

    #[test]
    fn renders_setup_failure() {
        let response = CommandResponse::failure("No Terraform files were modified.");
        let comment = render(&response, CommandName::Plan, "", false);
        assert_eq!(
            comment,
            "**Plan Failed**: No Terraform files were modified.\n"
        );
    }

    #[test]
    fn renders_single_plan_success_with_discard_link() {
        let response = CommandResponse::results(vec![ProjectResult {
            path: "svc".into(),
            outcome: ProjectOutcome::PlanSuccess(PlanSuccess {
                terraform_output: "+ aws_instance.web".into(),
                lock_url: "http://localhost:4141/locks?id=abc&method=DELETE".into(),
            }),
        }]);
        let comment = render(&response, CommandName::Plan, "", false);
        assert!(comment.contains("```diff\n+ aws_instance.web\n```"));
        assert!(comment.contains("[here](http://localhost:4141/locks?id=abc&method=DELETE)"));
        // a single project gets no header
        assert!(!comment.contains("### "));
    }

    #[test]
    fn renders_multiple_projects_with_headers() {
        let response = CommandResponse::results(vec![
            ProjectResult {
                path: "a".into(),
                outcome: ProjectOutcome::Error("exit status 1".into()),
            },
            ProjectResult {
                path: "b".into(),
                outcome: ProjectOutcome::ApplySuccess("Apply complete!".into()),
            },
        ]);
        let comment = render(&response, CommandName::Apply, "", false);
        assert!(comment.contains("Ran Apply in 2 projects:"));
        assert!(comment.contains("### `a`"));
        assert!(comment.contains("### `b`"));
        assert!(comment.contains("exit status 1"));
        assert!(comment.contains("Apply complete!"));
    }

    #[test]
    fn help_renders_usage() {
        let comment = render(&CommandResponse::default(), CommandName::Help, "", false);
        assert!(comment.contains("atlantis <command>"));
        assert!(comment.contains("help   Shows this usage"));
    }

    #[test]
    fn verbose_appends_collapsible_log() {
        let response = CommandResponse::failure("x");
        let comment = render(&response, CommandName::Plan, "[INFO] line\n", true);
        assert!(comment.contains("<details><summary>Log</summary>"));
        assert!(comment.contains("[INFO] line"));
        let quiet = render(&response, CommandName::Plan, "[INFO] line\n", false);
        assert!(!quiet.contains("<details>"));
    }
}
