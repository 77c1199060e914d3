//! HTTP surface and component wiring.
//!
//! Routes:
//!   POST /events      webhook ingestion
//!   GET  /            HTML index of held locks
//!   GET  /locks?id={id}&method=DELETE   discard a lock (link-friendly)
//!   DELETE /locks?id={id}               discard a lock
//!   GET  /static/...  embedded assets
//!   GET  /healthz     liveness

pub mod events_controller;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::info;

use crate::config::{LockingBackendKind, ServerConfig};
use crate::events::apply_executor::ApplyExecutor;
use crate::events::command_handler::CommandHandler;
use crate::events::env_locker::EnvLocker;
use crate::events::event_parser::EventParser;
use crate::events::plan_executor::PlanExecutor;
use crate::events::pre_executor::ProjectPreExecutor;
use crate::events::pull_cleaner::DefaultPullCleaner;
use crate::events::status_updater::CommitStatusUpdater;
use crate::hooks::HookRunner;
use crate::locking::postgres::PostgresBackend;
use crate::locking::sqlite::SqliteBackend;
use crate::locking::{LockBackend, LockingClient};
use crate::plans::PlanStore;
use crate::terraform::TerraformClient;
use crate::util::query_escape;
use crate::vcs::github::GithubClient;
use crate::vcs::gitlab::GitlabClient;
use crate::vcs::{ClientProxy, Host};
use crate::webhooks::{SlackWebhook, WebhookSender, WebhooksSender};
use crate::workspace::FileWorkspace;

use events_controller::EventsController;

/// Shared state handed to every request handler.
pub struct AppContext {
    pub locker: Arc<LockingClient>,
    pub plans: Arc<PlanStore>,
    pub events_controller: Arc<EventsController>,
    pub atlantis_url: String,
}

pub struct Server {
    port: u16,
    ctx: Arc<AppContext>,
}

impl Server {
    /// Wire every component from the validated config.
    pub async fn new(config: &ServerConfig) -> Result<Self> {
        let data_dir = config.expanded_data_dir()?;
        let atlantis_url = config.atlantis_url();

        let backend: Box<dyn LockBackend> = match config.locking_backend {
            LockingBackendKind::Sqlite => Box::new(SqliteBackend::new(&data_dir).await?),
            LockingBackendKind::Postgres => Box::new(
                PostgresBackend::new(
                    config
                        .locking_postgres_dsn
                        .as_deref()
                        .context("postgres backend requires a DSN")?,
                )
                .await?,
            ),
        };
        let locker = Arc::new(LockingClient::new(backend));
        let plans = Arc::new(PlanStore::new(&data_dir));
        let workspace = Arc::new(FileWorkspace::new(&data_dir));
        let terraform = Arc::new(TerraformClient::new().await?);
        let hooks = Arc::new(HookRunner::new());

        let mut supported_hosts = Vec::new();
        let github_client = if config.github_enabled() {
            supported_hosts.push(Host::Github);
            Some(Arc::new(GithubClient::new(
                &config.gh_hostname,
                config.gh_user.as_deref().unwrap_or_default(),
                config.gh_token.as_deref().unwrap_or_default(),
            )?))
        } else {
            None
        };
        let gitlab_client = if config.gitlab_enabled() {
            supported_hosts.push(Host::Gitlab);
            Some(Arc::new(GitlabClient::new(
                &config.gitlab_hostname,
                config.gitlab_token.as_deref().unwrap_or_default(),
            )?))
        } else {
            None
        };
        let github_pull_getter = github_client
            .clone()
            .map(|c| c as Arc<dyn crate::vcs::github::GithubPullGetter>);
        let gitlab_mr_getter = gitlab_client
            .clone()
            .map(|c| c as Arc<dyn crate::vcs::gitlab::GitlabMergeRequestGetter>);

        let vcs_client: Arc<ClientProxy> =
            Arc::new(ClientProxy::new(github_client, gitlab_client));

        let parser = Arc::new(EventParser {
            github_user: config.gh_user.clone().unwrap_or_default(),
            github_token: config.gh_token.clone().unwrap_or_default(),
            gitlab_user: config.gitlab_user.clone().unwrap_or_default(),
            gitlab_token: config.gitlab_token.clone().unwrap_or_default(),
        });

        let pre_executor = Arc::new(ProjectPreExecutor::new(
            locker.clone(),
            terraform.clone(),
            hooks.clone(),
        ));

        let mut webhook_senders: Vec<Box<dyn WebhookSender>> = Vec::new();
        if let Some(url) = &config.slack_webhook_url {
            webhook_senders.push(Box::new(SlackWebhook::new(
                url,
                &config.slack_workspace_regex,
            )?));
        }
        let webhooks = Arc::new(WebhooksSender::new(webhook_senders));

        let plan_executor = Arc::new(PlanExecutor {
            vcs_client: vcs_client.clone(),
            terraform: terraform.clone(),
            locker: locker.clone(),
            workspace: workspace.clone(),
            pre_executor: pre_executor.clone(),
            plans: plans.clone(),
            hooks: hooks.clone(),
            atlantis_url: atlantis_url.clone(),
        });
        let apply_executor = Arc::new(ApplyExecutor {
            vcs_client: vcs_client.clone(),
            terraform: terraform.clone(),
            workspace: workspace.clone(),
            pre_executor,
            plans: plans.clone(),
            hooks,
            webhooks,
            require_approval: config.require_approval,
        });

        let command_handler = Arc::new(CommandHandler {
            plan_executor,
            apply_executor,
            vcs_client: vcs_client.clone(),
            github_pull_getter,
            gitlab_mr_getter,
            event_parser: parser.clone(),
            status_updater: Arc::new(CommitStatusUpdater::new(vcs_client)),
            env_locker: Arc::new(EnvLocker::new()),
        });

        let pull_cleaner = Arc::new(DefaultPullCleaner {
            locker: locker.clone(),
            plans: plans.clone(),
            workspace,
        });

        let events_controller = Arc::new(EventsController {
            command_runner: command_handler,
            pull_cleaner,
            parser,
            supported_hosts,
            github_webhook_secret: config
                .gh_webhook_secret
                .as_ref()
                .map(|s| s.as_bytes().to_vec()),
            gitlab_webhook_secret: config
                .gitlab_webhook_secret
                .as_ref()
                .map(|s| s.as_bytes().to_vec()),
        });

        Ok(Self {
            port: config.port,
            ctx: Arc::new(AppContext {
                locker,
                plans,
                events_controller,
                atlantis_url,
            }),
        })
    }

    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = format!("0.0.0.0:{}", self.port).parse()?;
        let router = build_router(self.ctx);
        info!("Atlantis started - listening on port {}", self.port);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;
        Ok(())
    }
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/events", axum::routing::post(post_events))
        .route("/locks", get(delete_lock_via_get).delete(delete_lock))
        .route("/static/*path", get(static_asset))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(ctx)
}

// ─── Handlers ────────────────────────────────────────────────────────────────

async fn post_events(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    ctx.events_controller.post(&headers, &body).await
}

async fn index(State(ctx): State<Arc<AppContext>>) -> Response {
    let locks = match ctx.locker.list().await {
        Ok(locks) => locks,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Could not retrieve locks: {e:#}"),
            )
                .into_response()
        }
    };

    let mut rows = String::new();
    for (id, lock) in &locks {
        rows.push_str(&format!(
            r#"      <div class="twelve columns button content">
        <div class="list-title">{}/{} - <span class="heading-font-size">#{}</span></div>
        <div class="list-unlock"><a class="unlock" href="/locks?id={}&method=DELETE">Unlock</a></div>
        <div class="list-status"><code>Locked</code></div>
        <div class="list-timestamp"><span class="heading-font-size">{}</span></div>
      </div>
"#,
            html_escape(&lock.project.repo_full_name),
            html_escape(&lock.project.path),
            lock.pull.num,
            query_escape(id),
            lock.time.format("%Y-%m-%d %H:%M:%S UTC"),
        ));
    }
    if locks.is_empty() {
        rows = r#"    <p class="placeholder">No locks found.</p>"#.to_string();
    }

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>atlantis</title>
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <link rel="stylesheet" href="/static/css/custom.css">
</head>
<body>
<div class="container">
  <section class="header">
    <p style="font-family: monospace, monospace; font-size: 1.1em; text-align: center;">atlantis</p>
  </section>
  <section>
    <p style="font-family: monospace, monospace; font-size: 1.0em; text-align: center;"><strong>Locks</strong></p>
{rows}  </section>
</div>
<script src="/static/js/unlock.js"></script>
</body>
</html>
"#
    ))
    .into_response()
}

#[derive(Debug, serde::Deserialize)]
struct LockQuery {
    id: Option<String>,
    method: Option<String>,
}

/// GET variant of lock discard: pull request comments can only link, not
/// DELETE, so the method rides in the query string.
async fn delete_lock_via_get(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<LockQuery>,
) -> (StatusCode, String) {
    if query.method.as_deref() != Some("DELETE") {
        return (
            StatusCode::BAD_REQUEST,
            "method=DELETE query parameter is required\n".to_string(),
        );
    }
    discard_lock(&ctx, query.id.as_deref()).await
}

async fn delete_lock(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<LockQuery>,
) -> (StatusCode, String) {
    discard_lock(&ctx, query.id.as_deref()).await
}

async fn discard_lock(ctx: &AppContext, id: Option<&str>) -> (StatusCode, String) {
    let Some(id) = id else {
        return (
            StatusCode::BAD_REQUEST,
            "no lock id in request\n".to_string(),
        );
    };
    let Some(id) = url_unescape(id) else {
        return (StatusCode::BAD_REQUEST, "invalid lock id\n".to_string());
    };
    match ctx.locker.unlock(&id).await {
        Ok(Some(lock)) => {
            // discarding a lock also discards the pull's stored plans
            if let Err(e) = ctx
                .plans
                .delete_plans_for_pull(&lock.project.repo_full_name, lock.pull.num)
                .await
            {
                tracing::warn!("failed deleting plans for discarded lock: {e:#}");
            }
            (StatusCode::OK, "Unlocked successfully\n".to_string())
        }
        Ok(None) => (StatusCode::OK, "Unlocked successfully\n".to_string()),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            format!("Failed to unlock: {e:#}\n"),
        ),
    }
}

async fn static_asset(axum::extract::Path(path): axum::extract::Path<String>) -> Response {
    match path.as_str() {
        "css/custom.css" => (
            [(header::CONTENT_TYPE, "text/css")],
            include_str!("static/custom.css"),
        )
            .into_response(),
        "js/unlock.js" => (
            [(header::CONTENT_TYPE, "application/javascript")],
            include_str!("static/unlock.js"),
        )
            .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Decode a percent-encoded query value; returns `None` on malformed
/// escapes. Axum already decodes once, but lock ids are double-encoded in
/// comment links so the raw id survives the first pass.
fn url_unescape(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes.get(i + 1..i + 3)?;
                let hex = std::str::from_utf8(hex).ok()?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}
