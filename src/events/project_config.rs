//! Optional per-project configuration read from `atlantis.yaml` in the
//! project directory of the checked-out working tree.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const PROJECT_CONFIG_FILE: &str = "atlantis.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hooks {
    #[serde(default)]
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandArguments {
    pub command_name: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub pre_plan: Hooks,
    #[serde(default)]
    pub post_plan: Hooks,
    #[serde(default)]
    pub pre_apply: Hooks,
    #[serde(default)]
    pub post_apply: Hooks,
    /// Overrides the default terraform version for this project.
    #[serde(default)]
    pub terraform_version: Option<String>,
    /// Extra arguments appended to specific tool subcommands.
    #[serde(default)]
    pub extra_arguments: Vec<CommandArguments>,
}

impl ProjectConfig {
    pub fn exists(project_dir: &Path) -> bool {
        project_dir.join(PROJECT_CONFIG_FILE).exists()
    }

    pub async fn read(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(PROJECT_CONFIG_FILE);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("decoding yaml in config file {}", path.display()))
    }

    /// Extra arguments configured for `command_name` (e.g. `"plan"`).
    pub fn extra_arguments(&self, command_name: &str) -> Vec<String> {
        self.extra_arguments
            .iter()
            .filter(|c| c.command_name == command_name)
            .flat_map(|c| c.arguments.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let yaml = r#"
terraform_version: 0.11.0
pre_plan:
  commands:
    - ./scripts/fmt-check.sh
pre_apply:
  commands:
    - ./scripts/backup.sh
extra_arguments:
  - command_name: plan
    arguments: ["-parallelism=20"]
  - command_name: init
    arguments: ["-backend-config=backend.hcl"]
"#;
        let config: ProjectConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.terraform_version.as_deref(), Some("0.11.0"));
        assert_eq!(config.pre_plan.commands, vec!["./scripts/fmt-check.sh"]);
        assert_eq!(config.extra_arguments("plan"), vec!["-parallelism=20"]);
        assert_eq!(config.extra_arguments("init"), vec!["-backend-config=backend.hcl"]);
        assert!(config.extra_arguments("apply").is_empty());
    }

    #[test]
    fn empty_config_defaults() {
        let config: ProjectConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.pre_plan.commands.is_empty());
        assert!(config.terraform_version.is_none());
        assert!(config.extra_arguments("plan").is_empty());
    }
}
