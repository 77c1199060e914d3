//! Webhook ingestion: authentication, routing and the accept/ignore/reject
//! responses, with the command runner and pull cleaner stubbed out.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use atlantisd::events::command_handler::CommandRunner;
use atlantisd::events::event_parser::EventParser;
use atlantisd::events::pull_cleaner::PullCleaner;
use atlantisd::events::Command;
use atlantisd::models::{PullRequest, Repo, User};
use atlantisd::server::events_controller::EventsController;
use atlantisd::vcs::Host;

const SECRET: &[u8] = b"secret";

#[derive(Default)]
struct RecordingRunner {
    commands: Mutex<Vec<(String, u64, Command, Host)>>,
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn execute_command(
        &self,
        base_repo: Repo,
        _head_repo: Option<Repo>,
        _user: User,
        pull_num: u64,
        command: Command,
        vcs_host: Host,
    ) {
        self.commands
            .lock()
            .unwrap()
            .push((base_repo.full_name, pull_num, command, vcs_host));
    }
}

#[derive(Default)]
struct RecordingCleaner {
    cleaned: Mutex<Vec<(String, u64)>>,
    fail: bool,
}

#[async_trait]
impl PullCleaner for RecordingCleaner {
    async fn clean_up_pull(&self, repo: &Repo, pull: &PullRequest) -> Result<()> {
        if self.fail {
            anyhow::bail!("lock store unreachable");
        }
        self.cleaned
            .lock()
            .unwrap()
            .push((repo.full_name.clone(), pull.num));
        Ok(())
    }
}

struct Setup {
    controller: EventsController,
    runner: Arc<RecordingRunner>,
    cleaner: Arc<RecordingCleaner>,
}

fn setup() -> Setup {
    setup_with_cleaner(RecordingCleaner::default())
}

fn setup_with_cleaner(cleaner: RecordingCleaner) -> Setup {
    let runner = Arc::new(RecordingRunner::default());
    let cleaner = Arc::new(cleaner);
    let parser = Arc::new(EventParser {
        github_user: "bot".into(),
        github_token: "token".into(),
        gitlab_user: "bot".into(),
        gitlab_token: "token".into(),
    });
    let controller = EventsController {
        command_runner: runner.clone(),
        pull_cleaner: cleaner.clone(),
        parser,
        supported_hosts: vec![Host::Github, Host::Gitlab],
        github_webhook_secret: Some(SECRET.to_vec()),
        gitlab_webhook_secret: Some(SECRET.to_vec()),
    };
    Setup {
        controller,
        runner,
        cleaner,
    }
}

fn github_headers(event: &str, body: &[u8]) -> HeaderMap {
    let mut mac = Hmac::<Sha1>::new_from_slice(SECRET).unwrap();
    mac.update(body);
    let signature = mac
        .finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();

    let mut headers = HeaderMap::new();
    headers.insert("X-Github-Event", HeaderValue::from_str(event).unwrap());
    headers.insert(
        "X-Hub-Signature",
        HeaderValue::from_str(&format!("sha1={signature}")).unwrap(),
    );
    headers
}

fn gitlab_headers(event: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("X-Gitlab-Event", HeaderValue::from_str(event).unwrap());
    headers.insert("X-Gitlab-Token", HeaderValue::from_static("secret"));
    headers
}

fn github_comment_body(comment: &str) -> Vec<u8> {
    serde_json::json!({
        "action": "created",
        "issue": {
            "number": 7,
            "user": {"login": "alice"},
            "html_url": "https://github.com/owner/repo/pull/7"
        },
        "comment": {
            "user": {"login": "alice"},
            "body": comment
        },
        "repository": {
            "full_name": "owner/repo",
            "name": "repo",
            "owner": {"login": "owner"},
            "clone_url": "https://github.com/owner/repo.git"
        }
    })
    .to_string()
    .into_bytes()
}

fn github_pull_closed_body() -> Vec<u8> {
    serde_json::json!({
        "action": "closed",
        "pull_request": {
            "number": 7,
            "html_url": "https://github.com/owner/repo/pull/7",
            "state": "closed",
            "user": {"login": "alice"},
            "head": {
                "sha": "abc123",
                "ref": "feature",
                "repo": {
                    "full_name": "alice/repo",
                    "name": "repo",
                    "owner": {"login": "alice"},
                    "clone_url": "https://github.com/alice/repo.git"
                }
            }
        },
        "repository": {
            "full_name": "owner/repo",
            "name": "repo",
            "owner": {"login": "owner"},
            "clone_url": "https://github.com/owner/repo.git"
        }
    })
    .to_string()
    .into_bytes()
}

// ─── Rejections ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn request_without_vcs_header_is_rejected() {
    let s = setup();
    let (status, body) = s.controller.post(&HeaderMap::new(), b"{}").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Ignoring request"));
}

#[tokio::test]
async fn unconfigured_host_is_rejected() {
    let mut s = setup();
    s.controller.supported_hosts = vec![Host::Gitlab];
    let body = github_comment_body("atlantis plan");
    let (status, msg) = s.controller.post(&github_headers("issue_comment", &body), &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(msg.contains("not configured to support GitHub"));
}

#[tokio::test]
async fn bad_github_signature_is_rejected_with_no_side_effects() {
    let s = setup();
    let body = github_comment_body("atlantis plan");
    let mut headers = github_headers("issue_comment", &body);
    headers.insert(
        "X-Hub-Signature",
        HeaderValue::from_static("sha1=deadbeefdeadbeefdeadbeefdeadbeefdeadbeef"),
    );
    let (status, msg) = s.controller.post(&headers, &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(msg.contains("signature"));
    assert!(s.runner.commands.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_github_signature_is_rejected() {
    let s = setup();
    let body = github_comment_body("atlantis plan");
    let mut headers = HeaderMap::new();
    headers.insert("X-Github-Event", HeaderValue::from_static("issue_comment"));
    let (status, _) = s.controller.post(&headers, &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bad_gitlab_token_is_rejected() {
    let s = setup();
    let mut headers = gitlab_headers("Note Hook");
    headers.insert("X-Gitlab-Token", HeaderValue::from_static("wrong"));
    let (status, msg) = s.controller.post(&headers, b"{}").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(msg.contains("did not match expected secret"));
}

#[tokio::test]
async fn malformed_github_comment_payload_is_a_400() {
    let s = setup();
    let body = serde_json::json!({"action": "created"}).to_string().into_bytes();
    let (status, msg) = s.controller.post(&github_headers("issue_comment", &body), &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(msg.contains("Failed parsing event"));
    assert!(msg.contains("is null"));
}

// ─── Ignores ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unsupported_github_event_is_ignored() {
    let s = setup();
    let body = b"{}".to_vec();
    let (status, msg) = s.controller.post(&github_headers("push", &body), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert!(msg.contains("Ignoring unsupported event"));
}

#[tokio::test]
async fn deleted_comment_action_is_ignored() {
    let s = setup();
    let body = serde_json::json!({"action": "deleted"}).to_string().into_bytes();
    let (status, msg) = s.controller.post(&github_headers("issue_comment", &body), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert!(msg.contains("Ignoring comment event since action was not created"));
}

#[tokio::test]
async fn chatter_comment_is_ignored() {
    let s = setup();
    let body = github_comment_body("random talk about atlantis");
    let (status, msg) = s.controller.post(&github_headers("issue_comment", &body), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert!(msg.starts_with("Ignoring:"));
    assert!(s.runner.commands.lock().unwrap().is_empty());
}

#[tokio::test]
async fn open_pull_request_event_is_ignored() {
    let s = setup();
    let body = serde_json::json!({"action": "opened"}).to_string().into_bytes();
    let (status, msg) = s.controller.post(&github_headers("pull_request", &body), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert!(msg.contains("Ignoring pull request event since action was not closed"));
}

// ─── Accepted commands ───────────────────────────────────────────────────────

#[tokio::test]
async fn github_comment_command_is_dispatched() {
    let s = setup();
    let body = github_comment_body("atlantis plan staging --verbose");
    let (status, msg) = s.controller.post(&github_headers("issue_comment", &body), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert!(msg.contains("Processing..."));

    // dispatch happens on a spawned task
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let commands = s.runner.commands.lock().unwrap();
    assert_eq!(commands.len(), 1);
    let (repo, pull_num, command, host) = &commands[0];
    assert_eq!(repo, "owner/repo");
    assert_eq!(*pull_num, 7);
    assert_eq!(command.workspace, "staging");
    assert!(command.verbose);
    assert_eq!(*host, Host::Github);
}

#[tokio::test]
async fn gitlab_note_command_is_dispatched() {
    let s = setup();
    let body = serde_json::json!({
        "object_attributes": {
            "note": "atlantis apply",
            "noteable_type": "MergeRequest"
        },
        "merge_request": {
            "iid": 3,
            "source": {
                "path_with_namespace": "alice/repo",
                "name": "repo",
                "namespace": "alice",
                "git_http_url": "https://gitlab.com/alice/repo.git"
            }
        },
        "user": {"username": "alice"},
        "project": {
            "path_with_namespace": "owner/repo",
            "name": "repo",
            "namespace": "owner",
            "git_http_url": "https://gitlab.com/owner/repo.git"
        }
    })
    .to_string()
    .into_bytes();
    let (status, msg) = s.controller.post(&gitlab_headers("Note Hook"), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert!(msg.contains("Processing..."));

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let commands = s.runner.commands.lock().unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].1, 3);
    assert_eq!(commands[0].3, Host::Gitlab);
}

// ─── Pull close cleanup ──────────────────────────────────────────────────────

#[tokio::test]
async fn closed_pull_request_triggers_cleanup() {
    let s = setup();
    let body = github_pull_closed_body();
    let (status, msg) = s.controller.post(&github_headers("pull_request", &body), &body).await;
    assert_eq!(status, StatusCode::OK);
    assert!(msg.contains("Pull request cleaned successfully"));
    assert_eq!(
        s.cleaner.cleaned.lock().unwrap().as_slice(),
        &[("owner/repo".to_string(), 7)]
    );
}

#[tokio::test]
async fn cleanup_failure_is_a_500() {
    let s = setup_with_cleaner(RecordingCleaner {
        fail: true,
        ..Default::default()
    });
    let body = github_pull_closed_body();
    let (status, msg) = s.controller.post(&github_headers("pull_request", &body), &body).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(msg.contains("Error cleaning pull request"));
}

#[tokio::test]
async fn closed_gitlab_merge_request_triggers_cleanup() {
    let s = setup();
    let body = serde_json::json!({
        "object_attributes": {
            "iid": 3,
            "url": "https://gitlab.com/owner/repo/merge_requests/3",
            "state": "merged",
            "source_branch": "feature",
            "last_commit": {"id": "abc"}
        },
        "user": {"username": "alice"},
        "project": {
            "path_with_namespace": "owner/repo",
            "name": "repo",
            "namespace": "owner",
            "git_http_url": "https://gitlab.com/owner/repo.git"
        }
    })
    .to_string()
    .into_bytes();
    let (status, msg) = s
        .controller
        .post(&gitlab_headers("Merge Request Hook"), &body)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(msg.contains("Merge request cleaned successfully"));
    assert_eq!(
        s.cleaner.cleaned.lock().unwrap().as_slice(),
        &[("owner/repo".to_string(), 3)]
    );
}
