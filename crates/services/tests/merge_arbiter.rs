//! Drives MergeArbiter against a real git2 repository: a clean merge that
//! completes a worker, and a conflicting merge resolved with `ours`.

use std::path::Path;
use std::sync::Arc;

use chkd_db::models::repository::{CreateRepository, Repository};
use chkd_db::models::worker::{CreateWorker, UpdateWorker, Worker, WorkerStatus};
use chkd_db::Store;
use chkd_services::{GitWorktreeDriver, MergeArbiter, MergeOutcome, ResolveStrategy};
use uuid::Uuid;

async fn setup() -> (Store, tempfile::TempDir) {
    let store = Store::open_in_memory().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    (store, dir)
}

/// Initializes a repo at `path` with a `main` branch holding one commit.
fn init_repo(path: &Path) -> git2::Repository {
    let repo = git2::Repository::init(path).unwrap();
    std::fs::write(path.join("README.md"), "hello\n").unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new("README.md")).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = git2::Signature::now("tester", "tester@example.com").unwrap();
    let commit = repo
        .commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
        .unwrap();

    repo.branch("main", &repo.find_commit(commit).unwrap(), false).unwrap();
    repo.set_head("refs/heads/main").unwrap();
    repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force())).unwrap();
    repo
}

fn commit_file(repo: &git2::Repository, relpath: &str, content: &str, message: &str) {
    let workdir = repo.workdir().unwrap().to_path_buf();
    std::fs::write(workdir.join(relpath), content).unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new(relpath)).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = git2::Signature::now("tester", "tester@example.com").unwrap();
    let parent = repo.head().unwrap().peel_to_commit().unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent]).unwrap();
}

async fn tracked_repo(pool: &sqlx::SqlitePool, absolute_path: &Path) -> Repository {
    Repository::create(
        pool,
        &CreateRepository {
            absolute_path: absolute_path.to_string_lossy().to_string(),
            display_name: "merge-test".into(),
            default_branch: Some("main".into()),
        },
    )
    .await
    .unwrap()
}

async fn working_worker(pool: &sqlx::SqlitePool, repo_id: Uuid, branch: &str) -> Worker {
    let worker = Worker::create(
        pool,
        &CreateWorker {
            repo_id,
            username: "alex".into(),
            task_id: Some("SD.1".into()),
            task_title: Some("ship it".into()),
        },
    )
    .await
    .unwrap();

    Worker::update(
        pool,
        &worker.id,
        &UpdateWorker {
            branch_name: Some(branch.to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    Worker::transition(pool, &worker.id, WorkerStatus::Waiting).await.unwrap();
    Worker::transition(pool, &worker.id, WorkerStatus::Working).await.unwrap()
}

#[tokio::test]
async fn complete_worker_merges_cleanly_when_branch_has_no_conflicts() {
    let (store, dir) = setup().await;
    let repo = init_repo(dir.path());

    let head = repo.head().unwrap().peel_to_commit().unwrap();
    repo.branch("feature/alex/sd1-ship-it", &head, false).unwrap();
    {
        let worktree_repo = git2::Repository::open(dir.path()).unwrap();
        worktree_repo
            .set_head("refs/heads/feature/alex/sd1-ship-it")
            .unwrap();
        worktree_repo
            .checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
            .unwrap();
        commit_file(&worktree_repo, "feature.txt", "new feature\n", "add feature");
        worktree_repo.set_head("refs/heads/main").unwrap();
        worktree_repo
            .checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
            .unwrap();
    }

    let tracked = tracked_repo(&store.pool, dir.path()).await;
    let worker = working_worker(&store.pool, tracked.id, "feature/alex/sd1-ship-it").await;

    let arbiter = MergeArbiter::new(store.pool.clone(), Arc::new(GitWorktreeDriver), 4);
    let outcome = arbiter.complete_worker(&worker.id, true).await.unwrap();

    match outcome {
        MergeOutcome::Merged { files_changed, .. } => assert_eq!(files_changed, 1),
        other => panic!("expected a clean merge, got {other:?}"),
    }

    let reloaded = Worker::find_by_id(&store.pool, &worker.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, WorkerStatus::Merged);
}

#[tokio::test]
async fn resolve_worker_ours_applies_over_a_real_conflict() {
    let (store, dir) = setup().await;
    let repo = init_repo(dir.path());

    let head = repo.head().unwrap().peel_to_commit().unwrap();
    repo.branch("feature/alex/sd2-conflict", &head, false).unwrap();
    {
        let worktree_repo = git2::Repository::open(dir.path()).unwrap();
        worktree_repo
            .set_head("refs/heads/feature/alex/sd2-conflict")
            .unwrap();
        worktree_repo
            .checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
            .unwrap();
        commit_file(&worktree_repo, "README.md", "from the branch\n", "branch edit");

        worktree_repo.set_head("refs/heads/main").unwrap();
        worktree_repo
            .checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
            .unwrap();
        commit_file(&worktree_repo, "README.md", "from main\n", "main edit");
    }

    let tracked = tracked_repo(&store.pool, dir.path()).await;
    let worker = working_worker(&store.pool, tracked.id, "feature/alex/sd2-conflict").await;

    let arbiter = MergeArbiter::new(store.pool.clone(), Arc::new(GitWorktreeDriver), 4);
    let outcome = arbiter.complete_worker(&worker.id, true).await.unwrap();
    assert!(matches!(outcome, MergeOutcome::Conflicts { .. }));

    let merging = Worker::find_by_id(&store.pool, &worker.id).await.unwrap().unwrap();
    assert_eq!(merging.status, WorkerStatus::Merging);

    let resolved = arbiter
        .resolve_worker(&worker.id, ResolveStrategy::Ours, None)
        .await
        .unwrap();
    assert!(matches!(resolved, MergeOutcome::Merged { .. }));

    let reloaded = Worker::find_by_id(&store.pool, &worker.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, WorkerStatus::Merged);

    let main_repo = git2::Repository::open(dir.path()).unwrap();
    main_repo.set_head("refs/heads/main").unwrap();
    main_repo
        .checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
        .unwrap();
    let content = std::fs::read_to_string(dir.path().join("README.md")).unwrap();
    assert_eq!(content, "from main\n", "ours must keep the merge target's content");
}

#[tokio::test]
async fn resolve_worker_theirs_applies_over_a_real_conflict() {
    let (store, dir) = setup().await;
    let repo = init_repo(dir.path());

    let head = repo.head().unwrap().peel_to_commit().unwrap();
    repo.branch("feature/alex/sd3-conflict", &head, false).unwrap();
    {
        let worktree_repo = git2::Repository::open(dir.path()).unwrap();
        worktree_repo
            .set_head("refs/heads/feature/alex/sd3-conflict")
            .unwrap();
        worktree_repo
            .checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
            .unwrap();
        commit_file(&worktree_repo, "README.md", "from the branch\n", "branch edit");

        worktree_repo.set_head("refs/heads/main").unwrap();
        worktree_repo
            .checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
            .unwrap();
        commit_file(&worktree_repo, "README.md", "from main\n", "main edit");
    }

    let tracked = tracked_repo(&store.pool, dir.path()).await;
    let worker = working_worker(&store.pool, tracked.id, "feature/alex/sd3-conflict").await;

    let arbiter = MergeArbiter::new(store.pool.clone(), Arc::new(GitWorktreeDriver), 4);
    let outcome = arbiter.complete_worker(&worker.id, true).await.unwrap();
    assert!(matches!(outcome, MergeOutcome::Conflicts { .. }));

    let resolved = arbiter
        .resolve_worker(&worker.id, ResolveStrategy::Theirs, None)
        .await
        .unwrap();
    assert!(matches!(resolved, MergeOutcome::Merged { .. }));

    let reloaded = Worker::find_by_id(&store.pool, &worker.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, WorkerStatus::Merged);

    let main_repo = git2::Repository::open(dir.path()).unwrap();
    main_repo.set_head("refs/heads/main").unwrap();
    main_repo
        .checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
        .unwrap();
    let content = std::fs::read_to_string(dir.path().join("README.md")).unwrap();
    assert_eq!(content, "from the branch\n", "theirs must keep the worker branch's content");
}
