//! Forwards apply results to chat.
//!
//! Senders are fire-and-forget: a failed notification is logged on the
//! command's log and never affects the command result. The only sender
//! kind today is a Slack incoming webhook, gated on a workspace regex so
//! production applies can page a channel while staging stays quiet.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use crate::logging::CommandLog;
use crate::models::{PullRequest, Repo, User};

#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub workspace: String,
    pub repo: Repo,
    pub pull: PullRequest,
    pub user: User,
    pub success: bool,
}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, result: &ApplyResult) -> Result<()>;
}

/// Fans an apply result out to every configured sender.
#[derive(Default)]
pub struct WebhooksSender {
    senders: Vec<Box<dyn WebhookSender>>,
}

impl WebhooksSender {
    pub fn new(senders: Vec<Box<dyn WebhookSender>>) -> Self {
        Self { senders }
    }

    pub async fn send(&self, log: &CommandLog, result: &ApplyResult) {
        for sender in &self.senders {
            if let Err(e) = sender.send(result).await {
                log.warn(format!("error sending webhook: {e:#}"));
            }
        }
    }
}

pub struct SlackWebhook {
    client: reqwest::Client,
    webhook_url: String,
    workspace_regex: Regex,
}

impl SlackWebhook {
    pub fn new(webhook_url: &str, workspace_regex: &str) -> Result<Self> {
        let workspace_regex =
            Regex::new(workspace_regex).context("compiling workspace regex")?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("building slack client")?;
        Ok(Self {
            client,
            webhook_url: webhook_url.to_string(),
            workspace_regex,
        })
    }

    fn message(result: &ApplyResult) -> String {
        let verb = if result.success {
            "applied"
        } else {
            "failed to apply"
        };
        format!(
            "{} {} in `{}` for <{}|{}#{}>",
            result.user.username,
            verb,
            result.workspace,
            result.pull.url,
            result.repo.full_name,
            result.pull.num
        )
    }
}

#[async_trait]
impl WebhookSender for SlackWebhook {
    async fn send(&self, result: &ApplyResult) -> Result<()> {
        if !self.workspace_regex.is_match(&result.workspace) {
            return Ok(());
        }
        self.client
            .post(&self.webhook_url)
            .json(&json!({ "text": Self::message(result) }))
            .send()
            .await?
            .error_for_status()
            .context("posting slack webhook")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(workspace: &str, success: bool) -> ApplyResult {
        ApplyResult {
            workspace: workspace.into(),
            repo: Repo {
                full_name: "owner/repo".into(),
                ..Default::default()
            },
            pull: PullRequest {
                num: 7,
                url: "https://example.com/owner/repo/pull/7".into(),
                ..Default::default()
            },
            user: User {
                username: "alice".into(),
            },
            success,
        }
    }

    #[test]
    fn message_names_user_workspace_and_pull() {
        let msg = SlackWebhook::message(&result("production", true));
        assert!(msg.contains("alice applied in `production`"));
        assert!(msg.contains("owner/repo#7"));
        let msg = SlackWebhook::message(&result("production", false));
        assert!(msg.contains("failed to apply"));
    }

    #[test]
    fn invalid_workspace_regex_is_rejected() {
        assert!(SlackWebhook::new("https://hooks.slack.com/x", "(unclosed").is_err());
    }
}
