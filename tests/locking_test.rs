//! Lock store invariants against the embedded SQLite backend.

use chrono::Utc;

use atlantisd::locking::sqlite::SqliteBackend;
use atlantisd::locking::{LockBackend, LockingClient};
use atlantisd::models::{Project, ProjectLock, PullRequest, PullState, User};

fn lock(path: &str, workspace: &str, pull_num: u64) -> ProjectLock {
    ProjectLock {
        project: Project::new("owner/repo", path),
        workspace: workspace.to_string(),
        pull: PullRequest {
            num: pull_num,
            head_commit: "abc123".into(),
            url: format!("https://example.com/owner/repo/pull/{pull_num}"),
            branch: "feature".into(),
            author: "alice".into(),
            state: PullState::Open,
        },
        user: User {
            username: "alice".into(),
        },
        time: Utc::now(),
    }
}

async fn backend() -> (tempfile::TempDir, SqliteBackend) {
    let dir = tempfile::tempdir().unwrap();
    let backend = SqliteBackend::new(dir.path()).await.unwrap();
    (dir, backend)
}

#[tokio::test]
async fn try_lock_acquires_when_free() {
    let (_dir, backend) = backend().await;
    let (acquired, current) = backend.try_lock(lock("svc", "default", 1)).await.unwrap();
    assert!(acquired);
    assert_eq!(current.pull.num, 1);
}

#[tokio::test]
async fn second_pull_is_rejected_and_sees_the_holder() {
    let (_dir, backend) = backend().await;
    backend.try_lock(lock("svc", "default", 1)).await.unwrap();
    let (acquired, current) = backend.try_lock(lock("svc", "default", 2)).await.unwrap();
    assert!(!acquired);
    assert_eq!(current.pull.num, 1);
}

#[tokio::test]
async fn same_pull_reacquires_idempotently() {
    let (_dir, backend) = backend().await;
    let first = lock("svc", "default", 1);
    backend.try_lock(first.clone()).await.unwrap();
    let (acquired, current) = backend.try_lock(lock("svc", "default", 1)).await.unwrap();
    assert!(acquired);
    // the original lock is returned, not the new attempt
    assert_eq!(current.time, first.time);
    assert_eq!(backend.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unlock_then_relock_succeeds() {
    let (_dir, backend) = backend().await;
    let l = lock("svc", "default", 1);
    backend.try_lock(l.clone()).await.unwrap();
    let previous = backend
        .unlock(&l.project, &l.workspace)
        .await
        .unwrap()
        .expect("a lock was held");
    assert_eq!(previous.pull.num, 1);

    let (acquired, _) = backend.try_lock(lock("svc", "default", 2)).await.unwrap();
    assert!(acquired);
}

#[tokio::test]
async fn unlock_of_missing_key_is_not_an_error() {
    let (_dir, backend) = backend().await;
    let l = lock("svc", "default", 1);
    assert!(backend
        .unlock(&l.project, &l.workspace)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn different_workspaces_lock_independently() {
    let (_dir, backend) = backend().await;
    let (acquired, _) = backend.try_lock(lock("svc", "default", 1)).await.unwrap();
    assert!(acquired);
    let (acquired, _) = backend.try_lock(lock("svc", "staging", 2)).await.unwrap();
    assert!(acquired);
    assert_eq!(backend.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn list_matches_get_lock() {
    let (_dir, backend) = backend().await;
    backend.try_lock(lock("svc", "default", 1)).await.unwrap();
    backend.try_lock(lock("db", "staging", 2)).await.unwrap();

    for held in backend.list().await.unwrap() {
        let got = backend
            .get_lock(&held.project, &held.workspace)
            .await
            .unwrap()
            .expect("listed lock is gettable");
        assert_eq!(got, held);
    }
    assert!(backend
        .get_lock(&Project::new("owner/repo", "absent"), "default")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn unlock_by_pull_removes_exactly_that_pulls_locks() {
    let (_dir, backend) = backend().await;
    backend.try_lock(lock("svc", "default", 7)).await.unwrap();
    backend.try_lock(lock("db", "staging", 7)).await.unwrap();
    backend.try_lock(lock("svc", "staging", 8)).await.unwrap();

    let deleted = backend.unlock_by_pull("owner/repo", 7).await.unwrap();
    assert_eq!(deleted.len(), 2);
    assert!(deleted.iter().all(|l| l.pull.num == 7));

    let remaining = backend.list().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].pull.num, 8);
}

#[tokio::test]
async fn unlock_by_pull_is_scoped_to_the_repo() {
    let dir = tempfile::tempdir().unwrap();
    let backend = SqliteBackend::new(dir.path()).await.unwrap();
    let mut other = lock("svc", "default", 7);
    other.project = Project::new("owner/other", "svc");
    backend.try_lock(other).await.unwrap();
    backend.try_lock(lock("svc", "default", 7)).await.unwrap();

    let deleted = backend.unlock_by_pull("owner/repo", 7).await.unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].project.repo_full_name, "owner/repo");
    assert_eq!(backend.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_try_locks_have_exactly_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let backend = std::sync::Arc::new(SqliteBackend::new(dir.path()).await.unwrap());

    let mut handles = Vec::new();
    for pull_num in 1..=8u64 {
        let backend = backend.clone();
        handles.push(tokio::spawn(async move {
            backend.try_lock(lock("svc", "default", pull_num)).await
        }));
    }
    let mut winners = 0;
    for handle in handles {
        let (acquired, _) = handle.await.unwrap().unwrap();
        if acquired {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(backend.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn client_keys_round_trip_through_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let client = LockingClient::new(Box::new(SqliteBackend::new(dir.path()).await.unwrap()));

    let project = Project::new("owner/repo", "parent/child");
    let pull = lock("parent/child", "staging", 7).pull;
    let user = User {
        username: "alice".into(),
    };
    let response = client
        .try_lock(&project, "staging", &pull, &user)
        .await
        .unwrap();
    assert!(response.acquired);
    assert_eq!(response.key, "owner/repo/parent/child/staging");

    let listed = client.list().await.unwrap();
    assert!(listed.contains_key(&response.key));
    let got = client.get_lock(&response.key).await.unwrap().unwrap();
    assert_eq!(got.project, project);

    let unlocked = client.unlock(&response.key).await.unwrap().unwrap();
    assert_eq!(unlocked.project, project);
    assert!(client.list().await.unwrap().is_empty());
    assert!(client.get_lock(&response.key).await.unwrap().is_none());
}

#[tokio::test]
async fn locks_survive_reopening_the_store() {
    let dir = tempfile::tempdir().unwrap();
    {
        let backend = SqliteBackend::new(dir.path()).await.unwrap();
        backend.try_lock(lock("svc", "default", 7)).await.unwrap();
    }
    let reopened = SqliteBackend::new(dir.path()).await.unwrap();
    let held = reopened.list().await.unwrap();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].pull.num, 7);
}
