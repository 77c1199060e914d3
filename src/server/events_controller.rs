//! Webhook ingestion: authenticates each request for its platform, parses
//! the payload, and either rejects (400), ignores (200), hands a command
//! to the coordinator (200 "Processing..."), or cleans up a closed pull.
//!
//! The controller never trusts the webhook body beyond routing; pull
//! request state is re-fetched by the coordinator before anything runs.

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

use crate::events::command_handler::CommandRunner;
use crate::events::event_parser::EventParser;
use crate::events::pull_cleaner::PullCleaner;
use crate::models::PullState;
use crate::vcs::github::{GithubIssueCommentEvent, GithubPullRequestEvent};
use crate::vcs::gitlab::{GitlabMergeCommentEvent, GitlabMergeEvent};
use crate::vcs::Host;

const GITHUB_HEADER: &str = "X-Github-Event";
const GITHUB_SIGNATURE_HEADER: &str = "X-Hub-Signature";
const GITLAB_HEADER: &str = "X-Gitlab-Event";
const GITLAB_TOKEN_HEADER: &str = "X-Gitlab-Token";

type HmacSha1 = Hmac<Sha1>;

pub struct EventsController {
    pub command_runner: Arc<dyn CommandRunner>,
    pub pull_cleaner: Arc<dyn PullCleaner>,
    pub parser: Arc<EventParser>,
    pub supported_hosts: Vec<Host>,
    /// When unset, GitHub requests are accepted unauthenticated.
    pub github_webhook_secret: Option<Vec<u8>>,
    /// When unset, GitLab requests are accepted unauthenticated.
    pub gitlab_webhook_secret: Option<Vec<u8>>,
}

impl EventsController {
    /// Handle one `POST /events` request.
    pub async fn post(&self, headers: &HeaderMap, body: &[u8]) -> (StatusCode, String) {
        if let Some(event_type) = header_str(headers, GITHUB_HEADER) {
            if !self.supported_hosts.contains(&Host::Github) {
                return bad_request("Ignoring request since not configured to support GitHub");
            }
            if let Err(e) = self.validate_github_signature(headers, body) {
                return bad_request(e);
            }
            return self.handle_github_event(&event_type, body).await;
        }

        if let Some(event_type) = header_str(headers, GITLAB_HEADER) {
            if !self.supported_hosts.contains(&Host::Gitlab) {
                return bad_request("Ignoring request since not configured to support GitLab");
            }
            if let Err(e) = self.validate_gitlab_token(headers) {
                return bad_request(e);
            }
            return self.handle_gitlab_event(&event_type, body).await;
        }

        bad_request("Ignoring request")
    }

    // ─── Authentication ──────────────────────────────────────────────────────

    /// HMAC-SHA1 of the raw body, compared constant-time against the
    /// `sha1=<hex>` signature header.
    fn validate_github_signature(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), String> {
        let Some(secret) = &self.github_webhook_secret else {
            return Ok(());
        };
        let signature = header_str(headers, GITHUB_SIGNATURE_HEADER)
            .ok_or_else(|| format!("missing {GITHUB_SIGNATURE_HEADER} header"))?;
        let hex = signature
            .strip_prefix("sha1=")
            .ok_or_else(|| "signature format is not sha1=<hex>".to_string())?;
        let claimed = decode_hex(hex).ok_or_else(|| "signature is not valid hex".to_string())?;

        let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC accepts any key length");
        mac.update(body);
        let expected = mac.finalize().into_bytes();

        if expected.as_slice().ct_eq(claimed.as_slice()).into() {
            Ok(())
        } else {
            Err("payload signature check failed".to_string())
        }
    }

    /// Plaintext shared token, compared constant-time.
    fn validate_gitlab_token(&self, headers: &HeaderMap) -> Result<(), String> {
        let Some(secret) = &self.gitlab_webhook_secret else {
            return Ok(());
        };
        let token = header_str(headers, GITLAB_TOKEN_HEADER)
            .ok_or_else(|| format!("missing {GITLAB_TOKEN_HEADER} header"))?;
        if token.as_bytes().ct_eq(secret.as_slice()).into() {
            Ok(())
        } else {
            Err("header X-Gitlab-Token did not match expected secret".to_string())
        }
    }

    // ─── GitHub ──────────────────────────────────────────────────────────────

    async fn handle_github_event(&self, event_type: &str, body: &[u8]) -> (StatusCode, String) {
        match event_type {
            "issue_comment" => self.handle_github_comment(body).await,
            "pull_request" => self.handle_github_pull_request(body).await,
            _ => ok("Ignoring unsupported event"),
        }
    }

    async fn handle_github_comment(&self, body: &[u8]) -> (StatusCode, String) {
        let event: GithubIssueCommentEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => return bad_request(format!("Failed parsing event: {e}")),
        };
        if event.action.as_deref() != Some("created") {
            return ok("Ignoring comment event since action was not created");
        }

        let (base_repo, user, pull_num) =
            match self.parser.parse_github_issue_comment_event(&event) {
                Ok(parsed) => parsed,
                Err(e) => return bad_request(format!("Failed parsing event: {e}")),
            };

        let comment_body = event
            .comment
            .as_ref()
            .and_then(|c| c.body.clone())
            .unwrap_or_default();
        let command = match self.parser.determine_command(&comment_body, Host::Github) {
            Ok(command) => command,
            Err(e) => return ok(format!("Ignoring: {e}")),
        };

        let runner = self.command_runner.clone();
        tokio::spawn(async move {
            runner
                .execute_command(base_repo, None, user, pull_num, command, Host::Github)
                .await;
        });
        ok("Processing...")
    }

    async fn handle_github_pull_request(&self, body: &[u8]) -> (StatusCode, String) {
        let event: GithubPullRequestEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => return bad_request(format!("Failed parsing event: {e}")),
        };
        if event.action.as_deref() != Some("closed") {
            return ok("Ignoring pull request event since action was not closed");
        }

        let Some(pull_payload) = &event.pull_request else {
            return bad_request("Error parsing pull data: pull_request is null");
        };
        let (pull, _head_repo) = match self.parser.parse_github_pull(pull_payload) {
            Ok(parsed) => parsed,
            Err(e) => return bad_request(format!("Error parsing pull data: {e}")),
        };
        let Some(repo_payload) = &event.repository else {
            return bad_request("Error parsing repo data: repository is null");
        };
        let repo = match self.parser.parse_github_repo(repo_payload) {
            Ok(repo) => repo,
            Err(e) => return bad_request(format!("Error parsing repo data: {e}")),
        };

        if let Err(e) = self.pull_cleaner.clean_up_pull(&repo, &pull).await {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error cleaning pull request: {e:#}\n"),
            );
        }
        ok("Pull request cleaned successfully")
    }

    // ─── GitLab ──────────────────────────────────────────────────────────────

    async fn handle_gitlab_event(&self, event_type: &str, body: &[u8]) -> (StatusCode, String) {
        match event_type {
            "Note Hook" => self.handle_gitlab_comment(body).await,
            "Merge Request Hook" => self.handle_gitlab_merge_request(body).await,
            _ => ok("Ignoring unsupported event"),
        }
    }

    async fn handle_gitlab_comment(&self, body: &[u8]) -> (StatusCode, String) {
        let event: GitlabMergeCommentEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => return bad_request(format!("Failed parsing event: {e}")),
        };
        // notes on commits, issues and snippets share the hook
        let noteable = event
            .object_attributes
            .as_ref()
            .and_then(|a| a.noteable_type.as_deref())
            .unwrap_or_default();
        if noteable != "MergeRequest" {
            return ok("Ignoring non-merge-request note");
        }

        let (base_repo, head_repo, user, pull_num) =
            match self.parser.parse_gitlab_merge_comment_event(&event) {
                Ok(parsed) => parsed,
                Err(e) => return bad_request(format!("Failed parsing event: {e}")),
            };
        let note = event
            .object_attributes
            .as_ref()
            .and_then(|a| a.note.clone())
            .unwrap_or_default();
        let command = match self.parser.determine_command(&note, Host::Gitlab) {
            Ok(command) => command,
            Err(e) => return ok(format!("Ignoring: {e}")),
        };

        let runner = self.command_runner.clone();
        tokio::spawn(async move {
            runner
                .execute_command(
                    base_repo,
                    Some(head_repo),
                    user,
                    pull_num,
                    command,
                    Host::Gitlab,
                )
                .await;
        });
        ok("Processing...")
    }

    async fn handle_gitlab_merge_request(&self, body: &[u8]) -> (StatusCode, String) {
        let event: GitlabMergeEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => return bad_request(format!("Failed parsing event: {e}")),
        };
        let (pull, repo) = match self.parser.parse_gitlab_merge_event(&event) {
            Ok(parsed) => parsed,
            Err(e) => return bad_request(format!("Error parsing merge request data: {e}")),
        };
        if pull.state != PullState::Closed {
            return ok("Ignoring merge request event since state was not closed");
        }

        if let Err(e) = self.pull_cleaner.clean_up_pull(&repo, &pull).await {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error cleaning pull request: {e:#}\n"),
            );
        }
        ok("Merge request cleaned successfully")
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn ok(msg: impl Into<String>) -> (StatusCode, String) {
    (StatusCode::OK, format!("{}\n", msg.into()))
}

fn bad_request(msg: impl Into<String>) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, format!("{}\n", msg.into()))
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
