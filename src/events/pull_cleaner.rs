//! Cleanup when a pull request closes: every lock the pull held is
//! released, its plan artifacts deleted, and its working trees removed.
//!
//! Lock deletion comes first and is the only step whose failure is
//! surfaced (the webhook sender can retry on the resulting 500); plans and
//! workspaces left behind by a later failure are garbage with no
//! correctness impact.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::locking::LockingClient;
use crate::models::{PullRequest, Repo};
use crate::plans::PlanStore;
use crate::workspace::WorkspaceManager;

#[async_trait]
pub trait PullCleaner: Send + Sync {
    async fn clean_up_pull(&self, repo: &Repo, pull: &PullRequest) -> Result<()>;
}

pub struct DefaultPullCleaner {
    pub locker: Arc<LockingClient>,
    pub plans: Arc<PlanStore>,
    pub workspace: Arc<dyn WorkspaceManager>,
}

#[async_trait]
impl PullCleaner for DefaultPullCleaner {
    async fn clean_up_pull(&self, repo: &Repo, pull: &PullRequest) -> Result<()> {
        let deleted = self
            .locker
            .unlock_by_pull(&repo.full_name, pull.num)
            .await
            .context("unlocking locks")?;
        tracing::info!(
            repo = %repo.full_name,
            pull = pull.num,
            count = deleted.len(),
            "deleted locks for closed pull"
        );

        if let Err(e) = self.plans.delete_plans_for_pull(&repo.full_name, pull.num).await {
            tracing::warn!(
                repo = %repo.full_name,
                pull = pull.num,
                "failed deleting plans for closed pull: {e:#}"
            );
        }
        if let Err(e) = self.workspace.delete(repo, pull).await {
            tracing::warn!(
                repo = %repo.full_name,
                pull = pull.num,
                "failed deleting workspaces for closed pull: {e:#}"
            );
        }
        Ok(())
    }
}
