//! Server configuration: the envelope of CLI flags / environment
//! variables, with the validation rules applied before anything starts.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockingBackendKind {
    Sqlite,
    Postgres,
}

impl std::str::FromStr for LockingBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" => Ok(Self::Postgres),
            other => bail!("invalid locking backend {other:?}: expected sqlite or postgres"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub atlantis_url: Option<String>,
    pub data_dir: PathBuf,
    pub port: u16,
    pub log_level: String,
    pub gh_hostname: String,
    pub gh_user: Option<String>,
    pub gh_token: Option<String>,
    pub gh_webhook_secret: Option<String>,
    pub gitlab_hostname: String,
    pub gitlab_user: Option<String>,
    pub gitlab_token: Option<String>,
    pub gitlab_webhook_secret: Option<String>,
    pub require_approval: bool,
    pub locking_backend: LockingBackendKind,
    pub locking_postgres_dsn: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub slack_workspace_regex: String,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if !["debug", "info", "warn", "error"].contains(&self.log_level.as_str()) {
            bail!(
                "invalid log level {:?}: expected debug, info, warn or error",
                self.log_level
            );
        }
        if self.gh_user.is_some() != self.gh_token.is_some() {
            bail!("--gh-user and --gh-token must be set together");
        }
        if self.gitlab_user.is_some() != self.gitlab_token.is_some() {
            bail!("--gitlab-user and --gitlab-token must be set together");
        }
        if !self.github_enabled() && !self.gitlab_enabled() {
            bail!(
                "at least one VCS host must be configured: set --gh-user/--gh-token or \
                 --gitlab-user/--gitlab-token"
            );
        }
        if self.locking_backend == LockingBackendKind::Postgres
            && self.locking_postgres_dsn.is_none()
        {
            bail!("--locking-postgres-dsn is required with --locking-backend postgres");
        }
        Ok(())
    }

    pub fn github_enabled(&self) -> bool {
        self.gh_user.is_some() && self.gh_token.is_some()
    }

    pub fn gitlab_enabled(&self) -> bool {
        self.gitlab_user.is_some() && self.gitlab_token.is_some()
    }

    /// The externally reachable base URL, defaulting to
    /// `http://<hostname>:<port>`.
    pub fn atlantis_url(&self) -> String {
        match &self.atlantis_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let hostname =
                    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
                format!("http://{hostname}:{}", self.port)
            }
        }
    }

    /// Expand a leading `~/` in the data dir against `$HOME`.
    pub fn expanded_data_dir(&self) -> Result<PathBuf> {
        let raw = self.data_dir.to_string_lossy();
        if let Some(rest) = raw.strip_prefix("~/") {
            let home = std::env::var("HOME").context("expanding ~ in --data-dir: HOME not set")?;
            return Ok(PathBuf::from(home).join(rest));
        }
        Ok(self.data_dir.clone())
    }
}
