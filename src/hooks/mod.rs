//! Runs the pre/post command hooks configured in a project's
//! `atlantis.yaml`.
//!
//! The configured commands are written to a temporary `sh -e` script and
//! executed in the project directory with the same environment variables
//! the tool invocations get, so scripts can branch on `ENVIRONMENT` or
//! `ATLANTIS_TERRAFORM_VERSION`.

use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use semver::Version;
use tokio::io::AsyncWriteExt;

use crate::logging::CommandLog;

const INLINE_SHEBANG: &str = "#!/bin/sh -e";

#[derive(Default)]
pub struct HookRunner;

impl HookRunner {
    pub fn new() -> Self {
        Self
    }

    /// Execute `commands` as one script in `path`. `stage` names the hook
    /// for logging (e.g. `"pre_plan"`). Returns the combined output; a
    /// non-zero exit embeds the output in the error.
    pub async fn execute(
        &self,
        log: &CommandLog,
        commands: &[String],
        path: &Path,
        workspace: &str,
        terraform_version: &Version,
        stage: &str,
    ) -> Result<String> {
        if commands.is_empty() {
            return Ok(String::new());
        }

        let script = tempfile::Builder::new()
            .prefix("atlantis-hook")
            .suffix(".sh")
            .tempfile()
            .context("preparing hook script")?;
        {
            let mut file = tokio::fs::File::from_std(script.reopen().context("opening hook script")?);
            let body = format!("{INLINE_SHEBANG}\n{}", commands.join("\n"));
            file.write_all(body.as_bytes())
                .await
                .context("writing hook script")?;
            file.flush().await.context("flushing hook script")?;
        }

        log.info(format!("running {stage} commands: {commands:?}"));
        let output = tokio::process::Command::new("sh")
            .arg("-e")
            .arg(script.path())
            .current_dir(path)
            .env("ENVIRONMENT", workspace)
            .env("ATLANTIS_TERRAFORM_VERSION", terraform_version.to_string())
            .env("WORKSPACE", path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("running {stage} script"))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(anyhow!(
                "{stage} commands exited {}: {combined}",
                output.status
            ));
        }
        Ok(combined)
    }
}
