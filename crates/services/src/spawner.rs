use std::sync::Arc;

use chkd_db::models::repository::Repository;
use chkd_db::models::signal::{EmitSignal, Signal, SignalType};
use chkd_db::models::worker::{CreateWorker, UpdateWorker, Worker, WorkerStatus};
use chkd_db::StoreError;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::worktree::{GitError, WorktreeDriver};

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("a non-terminal worker already owns task {0}")]
    TaskAlreadyClaimed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Git(#[from] GitError),
}

/// Composes the Worker Registry with the Worktree Driver so registering a
/// worker always leaves it with a provisioned worktree and branch instead of
/// a bare `pending` row (§4.9). Git work runs on a blocking thread, gated by
/// the same semaphore budget as the merge arbiter (§5).
pub struct WorkerSpawner {
    pool: sqlx::SqlitePool,
    driver: Arc<dyn WorktreeDriver>,
    git_gate: Arc<Semaphore>,
}

impl WorkerSpawner {
    pub fn new(pool: sqlx::SqlitePool, driver: Arc<dyn WorktreeDriver>, git_concurrency: usize) -> Self {
        Self {
            pool,
            driver,
            git_gate: Arc::new(Semaphore::new(git_concurrency.max(1))),
        }
    }

    /// Creates the worker row, provisions its worktree+branch, transitions it
    /// to `waiting`, and emits the "Worker spawned" signal. Rejects a second
    /// non-terminal worker on the same `(repoId, taskId)` pair.
    pub async fn spawn(&self, input: &CreateWorker) -> Result<Worker, SpawnError> {
        if let Some(task_id) = &input.task_id {
            if Worker::has_non_terminal_for_task(&self.pool, input.repo_id, task_id).await? {
                return Err(SpawnError::TaskAlreadyClaimed(task_id.clone()));
            }
        }

        let repo = Repository::find_by_id(&self.pool, input.repo_id)
            .await?
            .ok_or(StoreError::NotFound)?;

        let worker = Worker::create(&self.pool, input).await?;

        let permit = self
            .git_gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| StoreError::Constraint(format!("git concurrency gate closed: {e}")))?;
        let driver = self.driver.clone();
        let repo_path = std::path::PathBuf::from(&repo.absolute_path);
        let default_branch = repo.default_branch.clone();
        let username = worker.username.clone();
        let display_id = worker.task_id.clone().unwrap_or_else(|| worker.id.clone());
        let title = worker.task_title.clone().unwrap_or_else(|| worker.id.clone());
        let created = tokio::task::spawn_blocking(move || {
            let result = driver.create_worktree(&repo_path, &default_branch, &username, &display_id, &title);
            drop(permit);
            result
        })
        .await
        .map_err(|e| StoreError::Constraint(format!("spawn task panicked: {e}")))??;

        let worker = Worker::update(
            &self.pool,
            &worker.id,
            &UpdateWorker {
                worktree_path: Some(created.worktree_path),
                branch_name: Some(created.branch_name),
                ..Default::default()
            },
        )
        .await?;

        let worker = Worker::transition(&self.pool, &worker.id, WorkerStatus::Waiting).await?;

        Signal::emit(
            &self.pool,
            &EmitSignal {
                repo_id: worker.repo_id,
                worker_id: Some(worker.id.clone()),
                kind: SignalType::Info,
                message: "Worker spawned".into(),
                details: None,
                action_required: false,
                action_options: None,
            },
        )
        .await?;

        Ok(worker)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use chkd_db::models::repository::CreateRepository;
    use chkd_db::Store;

    use super::*;
    use crate::worktree::GitWorktreeDriver;

    fn init_repo(path: &Path) {
        let repo = git2::Repository::init(path).unwrap();
        std::fs::write(path.join("README.md"), "hello\n").unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("tester", "tester@example.com").unwrap();
        let commit = repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
        repo.branch("main", &repo.find_commit(commit).unwrap(), false).unwrap();
        repo.set_head("refs/heads/main").unwrap();
        repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force())).unwrap();
    }

    #[tokio::test]
    async fn spawn_provisions_worktree_and_reaches_waiting() {
        let store = Store::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());

        let repo = Repository::create(
            &store.pool,
            &CreateRepository {
                absolute_path: dir.path().to_string_lossy().to_string(),
                display_name: "spawn-test".into(),
                default_branch: Some("main".into()),
            },
        )
        .await
        .unwrap();

        let spawner = WorkerSpawner::new(store.pool.clone(), Arc::new(GitWorktreeDriver), 4);
        let worker = spawner
            .spawn(&CreateWorker {
                repo_id: repo.id,
                username: "alex".into(),
                task_id: Some("SD.1".into()),
                task_title: Some("ship it".into()),
            })
            .await
            .unwrap();

        assert_eq!(worker.status, WorkerStatus::Waiting);
        assert!(worker.worktree_path.is_some());
        assert!(worker.branch_name.is_some());
        assert!(Path::new(worker.worktree_path.as_ref().unwrap()).exists());
    }

    #[tokio::test]
    async fn spawn_rejects_second_worker_for_same_task() {
        let store = Store::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());

        let repo = Repository::create(
            &store.pool,
            &CreateRepository {
                absolute_path: dir.path().to_string_lossy().to_string(),
                display_name: "spawn-test".into(),
                default_branch: Some("main".into()),
            },
        )
        .await
        .unwrap();

        let spawner = WorkerSpawner::new(store.pool.clone(), Arc::new(GitWorktreeDriver), 4);
        spawner
            .spawn(&CreateWorker {
                repo_id: repo.id,
                username: "alex".into(),
                task_id: Some("SD.1".into()),
                task_title: Some("ship it".into()),
            })
            .await
            .unwrap();

        let err = spawner
            .spawn(&CreateWorker {
                repo_id: repo.id,
                username: "sam".into(),
                task_id: Some("SD.1".into()),
                task_title: Some("ship it, again".into()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SpawnError::TaskAlreadyClaimed(_)));
    }
}
