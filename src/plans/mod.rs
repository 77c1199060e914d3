//! Plan artifact storage.
//!
//! Plans produced by a successful `plan` are copied out of the working
//! tree (which is wiped on every command) into
//! `<data_dir>/plans/<repo>/<pull>/<path>/<workspace>.plan`, and copied
//! back into the fresh checkout when `apply` runs. An artifact lives
//! exactly as long as the lock it was planned under; orphans from a crash
//! are reclaimed when the pull closes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::Project;

/// A plan copied into a working tree, ready to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRef {
    pub project: Project,
    /// Absolute path of the copied plan file inside the working tree.
    pub local_path: PathBuf,
}

pub struct PlanStore {
    base_dir: PathBuf,
}

impl PlanStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: data_dir.into().join("plans"),
        }
    }

    /// Copy the plan file at `src` into the store.
    pub async fn save_plan(
        &self,
        src: &Path,
        project: &Project,
        workspace: &str,
        pull_num: u64,
    ) -> Result<()> {
        let save_dir = self
            .pull_dir(&project.repo_full_name, pull_num)
            .join(&project.path);
        tokio::fs::create_dir_all(&save_dir)
            .await
            .context("creating plan save directory")?;
        let dst = save_dir.join(format!("{workspace}.plan"));
        tokio::fs::copy(src, &dst)
            .await
            .with_context(|| format!("saving plan to {:?}", dst))?;
        Ok(())
    }

    /// Copy every stored plan for `(repo, pull, workspace)` into `dst_dir`,
    /// preserving the per-project sub-paths. Returns one [`PlanRef`] per
    /// copied plan; empty when the pull has no plans for that workspace.
    pub async fn copy_plans(
        &self,
        dst_dir: &Path,
        repo_full_name: &str,
        workspace: &str,
        pull_num: u64,
    ) -> Result<Vec<PlanRef>> {
        let root = self.pull_dir(repo_full_name, pull_num);
        if !root.exists() {
            return Ok(Vec::new());
        }

        let plan_name = format!("{workspace}.plan");
        let mut plans = Vec::new();
        // non-recursive walk; plan trees are shallow but project paths can nest
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .with_context(|| format!("listing plans in {:?}", dir))?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if entry.file_name().to_string_lossy() != plan_name {
                    continue;
                }
                let rel = path
                    .strip_prefix(&root)
                    .expect("walked path is under root")
                    .to_path_buf();
                let dst = dst_dir.join(&rel);
                if let Some(parent) = dst.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .context("creating plan destination dir")?;
                }
                tokio::fs::copy(&path, &dst)
                    .await
                    .with_context(|| format!("copying plan {:?}", path))?;
                let project_path = rel
                    .parent()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                plans.push(PlanRef {
                    project: Project::new(repo_full_name, project_path),
                    local_path: dst,
                });
            }
        }
        // stable order regardless of directory iteration order
        plans.sort_by(|a, b| a.local_path.cmp(&b.local_path));
        Ok(plans)
    }

    /// Delete all plans of a pull; called on pull close and lock discard.
    pub async fn delete_plans_for_pull(&self, repo_full_name: &str, pull_num: u64) -> Result<()> {
        let root = self.pull_dir(repo_full_name, pull_num);
        if root.exists() {
            tokio::fs::remove_dir_all(&root)
                .await
                .with_context(|| format!("deleting plans at {:?}", root))?;
        }
        Ok(())
    }

    fn pull_dir(&self, repo_full_name: &str, pull_num: u64) -> PathBuf {
        self.base_dir.join(repo_full_name).join(pull_num.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_file(path: &Path, contents: &str) {
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(path, contents).await.unwrap();
    }

    #[tokio::test]
    async fn save_then_copy_round_trips() {
        let data_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let store = PlanStore::new(data_dir.path());

        let src = work_dir.path().join("staging.plan");
        write_file(&src, "planbytes").await;
        let project = Project::new("owner/repo", "svc");
        store.save_plan(&src, &project, "staging", 7).await.unwrap();

        let dst = tempfile::tempdir().unwrap();
        let plans = store
            .copy_plans(dst.path(), "owner/repo", "staging", 7)
            .await
            .unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].project, project);
        assert_eq!(plans[0].local_path, dst.path().join("svc/staging.plan"));
        let copied = tokio::fs::read_to_string(&plans[0].local_path).await.unwrap();
        assert_eq!(copied, "planbytes");
    }

    #[tokio::test]
    async fn copy_plans_filters_by_workspace() {
        let data_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let store = PlanStore::new(data_dir.path());

        let src = work_dir.path().join("plan");
        write_file(&src, "x").await;
        let project = Project::new("owner/repo", "svc");
        store.save_plan(&src, &project, "staging", 7).await.unwrap();
        store.save_plan(&src, &project, "default", 7).await.unwrap();

        let dst = tempfile::tempdir().unwrap();
        let plans = store
            .copy_plans(dst.path(), "owner/repo", "default", 7)
            .await
            .unwrap();
        assert_eq!(plans.len(), 1);
        assert!(plans[0].local_path.ends_with("svc/default.plan"));
    }

    #[tokio::test]
    async fn copy_plans_with_none_stored_is_empty() {
        let data_dir = tempfile::tempdir().unwrap();
        let store = PlanStore::new(data_dir.path());
        let dst = tempfile::tempdir().unwrap();
        let plans = store
            .copy_plans(dst.path(), "owner/repo", "default", 7)
            .await
            .unwrap();
        assert!(plans.is_empty());
    }

    #[tokio::test]
    async fn delete_plans_for_pull_leaves_other_pulls() {
        let data_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let store = PlanStore::new(data_dir.path());

        let src = work_dir.path().join("plan");
        write_file(&src, "x").await;
        let project = Project::new("owner/repo", "svc");
        store.save_plan(&src, &project, "default", 7).await.unwrap();
        store.save_plan(&src, &project, "default", 8).await.unwrap();

        store.delete_plans_for_pull("owner/repo", 7).await.unwrap();

        let dst = tempfile::tempdir().unwrap();
        assert!(store
            .copy_plans(dst.path(), "owner/repo", "default", 7)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .copy_plans(dst.path(), "owner/repo", "default", 8)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn root_project_plan_round_trips() {
        let data_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let store = PlanStore::new(data_dir.path());

        let src = work_dir.path().join("default.plan");
        write_file(&src, "x").await;
        let project = Project::new("owner/repo", ".");
        store.save_plan(&src, &project, "default", 7).await.unwrap();

        let dst = tempfile::tempdir().unwrap();
        let plans = store
            .copy_plans(dst.path(), "owner/repo", "default", 7)
            .await
            .unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].project.path, ".");
    }
}
