use anyhow::Result;
use clap::Parser;

use atlantisd::config::{LockingBackendKind, ServerConfig};
use atlantisd::server::Server;

#[derive(Parser)]
#[command(
    name = "atlantisd",
    about = "Atlantis — pull-request automation daemon for Terraform",
    version
)]
struct Args {
    /// URL that Atlantis can be reached at. Defaults to http://<hostname>:<port>.
    #[arg(long, env = "ATLANTIS_URL")]
    atlantis_url: Option<String>,

    /// Directory for the lock database, plan artifacts and working trees
    #[arg(long, default_value = "~/.atlantis", env = "ATLANTIS_DATA_DIR")]
    data_dir: std::path::PathBuf,

    /// Port to bind to
    #[arg(long, default_value_t = 4141, env = "ATLANTIS_PORT")]
    port: u16,

    /// Log level (debug, info, warn, error)
    #[arg(long, default_value = "info", env = "ATLANTIS_LOG_LEVEL")]
    log_level: String,

    /// Hostname of a GitHub Enterprise installation; github.com otherwise
    #[arg(long, default_value = "github.com", env = "ATLANTIS_GH_HOSTNAME")]
    gh_hostname: String,

    /// GitHub username of the API user
    #[arg(long, env = "ATLANTIS_GH_USER")]
    gh_user: Option<String>,

    /// GitHub token of the API user
    #[arg(long, env = "ATLANTIS_GH_TOKEN")]
    gh_token: Option<String>,

    /// Secret for validating GitHub webhook signatures
    #[arg(long, env = "ATLANTIS_GH_WEBHOOK_SECRET")]
    gh_webhook_secret: Option<String>,

    /// Hostname of a self-hosted GitLab; gitlab.com otherwise
    #[arg(long, default_value = "gitlab.com", env = "ATLANTIS_GITLAB_HOSTNAME")]
    gitlab_hostname: String,

    /// GitLab username of the API user
    #[arg(long, env = "ATLANTIS_GITLAB_USER")]
    gitlab_user: Option<String>,

    /// GitLab token of the API user
    #[arg(long, env = "ATLANTIS_GITLAB_TOKEN")]
    gitlab_token: Option<String>,

    /// Secret for validating GitLab webhook tokens
    #[arg(long, env = "ATLANTIS_GITLAB_WEBHOOK_SECRET")]
    gitlab_webhook_secret: Option<String>,

    /// Require pull requests to be approved before apply
    #[arg(long, default_value_t = false, env = "ATLANTIS_REQUIRE_APPROVAL")]
    require_approval: bool,

    /// Lock store backend (sqlite or postgres)
    #[arg(long, default_value = "sqlite", env = "ATLANTIS_LOCKING_BACKEND")]
    locking_backend: LockingBackendKind,

    /// Postgres DSN for the postgres locking backend
    #[arg(long, env = "ATLANTIS_LOCKING_POSTGRES_DSN")]
    locking_postgres_dsn: Option<String>,

    /// Slack incoming webhook URL for apply notifications
    #[arg(long, env = "ATLANTIS_SLACK_WEBHOOK_URL")]
    slack_webhook_url: Option<String>,

    /// Only notify for workspaces matching this regex
    #[arg(long, default_value = ".*", env = "ATLANTIS_SLACK_WORKSPACE_REGEX")]
    slack_workspace_regex: String,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            atlantis_url: self.atlantis_url,
            data_dir: self.data_dir,
            port: self.port,
            log_level: self.log_level,
            gh_hostname: self.gh_hostname,
            gh_user: self.gh_user,
            gh_token: self.gh_token,
            gh_webhook_secret: self.gh_webhook_secret,
            gitlab_hostname: self.gitlab_hostname,
            gitlab_user: self.gitlab_user,
            gitlab_token: self.gitlab_token,
            gitlab_webhook_secret: self.gitlab_webhook_secret,
            require_approval: self.require_approval,
            locking_backend: self.locking_backend,
            locking_postgres_dsn: self.locking_postgres_dsn,
            slack_webhook_url: self.slack_webhook_url,
            slack_workspace_regex: self.slack_workspace_regex,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config();
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_level))
        .compact()
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        url = %config.atlantis_url(),
        "atlantisd starting"
    );

    let server = Server::new(&config).await?;
    server.start().await
}
