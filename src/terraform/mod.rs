//! Runs the terraform executable.
//!
//! The default version is detected from `terraform version` at startup.
//! Projects can pin another version through `atlantis.yaml`; pinned
//! versions resolve to a `terraform<version>` executable on the PATH
//! (e.g. `terraform0.8.8`).

use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;

use crate::logging::CommandLog;

static VERSION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Terraform v(\d+\.\d+\.\d+)").expect("static regex"));

pub struct TerraformClient {
    default_version: Version,
}

impl TerraformClient {
    /// Detect the terraform executable on the PATH and parse its version.
    pub async fn new() -> Result<Self> {
        let output = tokio::process::Command::new("terraform")
            .arg("version")
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    anyhow!(
                        "terraform not found in $PATH. \
                         Download terraform from https://www.terraform.io/downloads.html"
                    )
                } else {
                    anyhow!(e).context("running terraform version")
                }
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let default_version = Self::parse_version(&stdout)?;
        Ok(Self { default_version })
    }

    pub fn with_default_version(default_version: Version) -> Self {
        Self { default_version }
    }

    pub fn default_version(&self) -> &Version {
        &self.default_version
    }

    fn parse_version(version_output: &str) -> Result<Version> {
        let caps = VERSION_REGEX
            .captures(version_output)
            .ok_or_else(|| anyhow!("could not parse terraform version from {version_output:?}"))?;
        Version::parse(&caps[1]).context("parsing terraform version")
    }

    /// Run terraform with `args` in `path`, using `version` to pick the
    /// executable. `workspace` is exported as `ENVIRONMENT` so hook scripts
    /// and wrappers can read it. Returns the combined stdout/stderr; on a
    /// non-zero exit the output is embedded in the error.
    pub async fn run_command_with_version(
        &self,
        log: &CommandLog,
        path: &Path,
        args: &[String],
        version: &Version,
        workspace: &str,
    ) -> Result<String> {
        let mut executable = "terraform".to_string();
        if *version != self.default_version {
            executable = format!("terraform{version}");
        }

        let command_str = format!("{executable} {}", args.join(" "));
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command_str)
            .current_dir(path)
            .env("ENVIRONMENT", workspace)
            .env("ATLANTIS_TERRAFORM_VERSION", version.to_string())
            .env("WORKSPACE", path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("running {command_str:?} in {}", path.display()))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            let err = anyhow!(
                "{}: running {command_str:?} in {:?}: \n{combined}",
                output.status,
                path.display()
            );
            log.debug(format!("error: {err}"));
            return Err(err);
        }
        log.info(format!(
            "successfully ran {command_str:?} in {:?}",
            path.display()
        ));
        Ok(combined)
    }

    /// `terraform init` followed by selecting (or creating) the workspace.
    /// Versions before 0.10 spell the workspace subcommand `env`.
    pub async fn run_init_and_workspace(
        &self,
        log: &CommandLog,
        path: &Path,
        workspace: &str,
        extra_init_args: &[String],
        version: &Version,
    ) -> Result<Vec<String>> {
        let mut outputs = Vec::new();

        let mut init_args = vec!["init".to_string(), "-no-color".to_string()];
        init_args.extend(extra_init_args.iter().cloned());
        outputs.push(
            self.run_command_with_version(log, path, &init_args, version, workspace)
                .await?,
        );

        let workspace_cmd = Self::workspace_command(version);

        let select_args = vec![
            workspace_cmd.to_string(),
            "select".to_string(),
            "-no-color".to_string(),
            workspace.to_string(),
        ];
        match self
            .run_command_with_version(log, path, &select_args, version, workspace)
            .await
        {
            Ok(output) => outputs.push(output),
            Err(_) => {
                // select fails when the workspace doesn't exist yet; create
                // it so users don't have to do that by hand
                let new_args = vec![
                    workspace_cmd.to_string(),
                    "new".to_string(),
                    "-no-color".to_string(),
                    workspace.to_string(),
                ];
                outputs.push(
                    self.run_command_with_version(log, path, &new_args, version, workspace)
                        .await?,
                );
            }
        }
        Ok(outputs)
    }

    fn workspace_command(version: &Version) -> &'static str {
        if *version < Version::new(0, 10, 0) {
            "env"
        } else {
            "workspace"
        }
    }

    /// Resolve the version for a project: config override or the default.
    pub fn resolve_version(&self, configured: Option<&str>) -> Result<Version> {
        match configured {
            Some(raw) => {
                let version = Version::parse(raw)
                    .with_context(|| format!("parsing terraform_version {raw:?}"))?;
                Ok(version)
            }
            None => Ok(self.default_version.clone()),
        }
    }

}
