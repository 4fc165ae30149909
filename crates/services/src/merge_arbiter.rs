use std::sync::Arc;

use chkd_db::models::repository::Repository;
use chkd_db::models::signal::{EmitSignal, Signal, SignalType};
use chkd_db::models::worker::{Worker, WorkerStatus};
use chkd_db::models::worker_history::{RecordWorkerHistory, WorkerHistory, WorkerOutcome};
use chkd_db::StoreError;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::worktree::{GitError, MergeConflict, MergeStrategy, WorktreeDriver};

#[derive(Debug, Error)]
pub enum MergeArbiterError {
    #[error("worker is not in a mergeable state: {0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Git(#[from] GitError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveStrategy {
    Ours,
    Theirs,
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mergeStatus", rename_all = "camelCase")]
pub enum MergeOutcome {
    #[serde(rename = "merged")]
    Merged {
        files_changed: i64,
        insertions: i64,
        deletions: i64,
    },
    #[serde(rename = "conflicts")]
    Conflicts { conflicts: Vec<MergeConflict> },
    #[serde(rename = "aborted")]
    Aborted,
}

/// Drives the worker through `merging` to a terminal or resumable outcome,
/// writing the paired `WorkerHistory` row and emitting the matching signal
/// (§4.6). Git work runs on a blocking thread since `WorktreeDriver` is sync.
pub struct MergeArbiter {
    pool: SqlitePool,
    driver: Arc<dyn WorktreeDriver>,
    git_gate: Arc<Semaphore>,
}

impl MergeArbiter {
    /// `git_concurrency` bounds how many git2 calls this arbiter lets run at
    /// once, matching the Worktree Driver's shared subprocess budget (§5).
    pub fn new(pool: SqlitePool, driver: Arc<dyn WorktreeDriver>, git_concurrency: usize) -> Self {
        Self {
            pool,
            driver,
            git_gate: Arc::new(Semaphore::new(git_concurrency.max(1))),
        }
    }

    async fn repo_default_branch(&self, repo_id: uuid::Uuid) -> Result<Repository, MergeArbiterError> {
        Repository::find_by_id(&self.pool, repo_id)
            .await?
            .ok_or(StoreError::NotFound)
            .map_err(MergeArbiterError::from)
    }

    pub async fn complete_worker(
        &self,
        worker_id: &str,
        auto_merge: bool,
    ) -> Result<MergeOutcome, MergeArbiterError> {
        let worker = Worker::find_by_id(&self.pool, worker_id)
            .await?
            .ok_or(StoreError::NotFound)?;

        if !matches!(worker.status, WorkerStatus::Working | WorkerStatus::Paused) {
            return Err(MergeArbiterError::Conflict(format!(
                "worker {worker_id} is {:?}, not working or paused",
                worker.status
            )));
        }

        let repo = self.repo_default_branch(worker.repo_id).await?;
        let branch = worker
            .branch_name
            .clone()
            .ok_or_else(|| MergeArbiterError::Conflict("worker has no branch".into()))?;

        Worker::transition(&self.pool, worker_id, WorkerStatus::Merging).await?;

        let permit = self
            .git_gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| MergeArbiterError::Conflict(format!("git concurrency gate closed: {e}")))?;
        let driver = self.driver.clone();
        let repo_path = std::path::PathBuf::from(&repo.absolute_path);
        let default_branch = repo.default_branch.clone();
        let dry_run_branch = branch.clone();
        let dry_run = tokio::task::spawn_blocking(move || {
            let result = driver.dry_run_merge(&repo_path, &dry_run_branch, &default_branch);
            drop(permit);
            result
        })
        .await
        .map_err(|e| MergeArbiterError::Conflict(format!("merge task panicked: {e}")))?;

        match dry_run {
            Ok(result) if result.clean => {
                match self
                    .apply_and_finalize(worker_id, &repo, &branch, MergeStrategy::Clean, 0)
                    .await
                {
                    Ok(outcome) => Ok(outcome),
                    Err(err) => {
                        self.record_error(worker_id, &worker, &branch, &err).await;
                        Err(err)
                    }
                }
            }
            Ok(result) => {
                if auto_merge {
                    Signal::emit(
                        &self.pool,
                        &EmitSignal {
                            repo_id: worker.repo_id,
                            worker_id: Some(worker_id.to_string()),
                            kind: SignalType::Help,
                            message: "Merge has conflicts; choose a resolution".into(),
                            details: Some(serde_json::json!({
                                "conflicts": result.conflicts,
                                "branchName": branch,
                                "targetBranch": repo.default_branch,
                            })),
                            action_required: true,
                            action_options: Some(vec![
                                "ours".into(),
                                "theirs".into(),
                                "abort".into(),
                            ]),
                        },
                    )
                    .await?;
                }
                Ok(MergeOutcome::Conflicts {
                    conflicts: result.conflicts,
                })
            }
            Err(git_err) => {
                let err = MergeArbiterError::from(git_err);
                self.record_error(worker_id, &worker, &branch, &err).await;
                Err(err)
            }
        }
    }

    pub async fn resolve_worker(
        &self,
        worker_id: &str,
        strategy: ResolveStrategy,
        files: Option<Vec<String>>,
    ) -> Result<MergeOutcome, MergeArbiterError> {
        let worker = Worker::find_by_id(&self.pool, worker_id)
            .await?
            .ok_or(StoreError::NotFound)?;

        if worker.status != WorkerStatus::Merging {
            return Err(MergeArbiterError::Conflict(format!(
                "worker {worker_id} is {:?}, not merging",
                worker.status
            )));
        }

        let repo = self.repo_default_branch(worker.repo_id).await?;
        let branch = worker
            .branch_name
            .clone()
            .ok_or_else(|| MergeArbiterError::Conflict("worker has no branch".into()))?;

        if strategy == ResolveStrategy::Abort {
            let permit = self
                .git_gate
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| MergeArbiterError::Conflict(format!("git concurrency gate closed: {e}")))?;
            let repo_path = std::path::PathBuf::from(&repo.absolute_path);
            let driver = self.driver.clone();
            tokio::task::spawn_blocking(move || {
                let result = driver.abort_merge(&repo_path);
                drop(permit);
                result
            })
            .await
            .map_err(|e| MergeArbiterError::Conflict(format!("abort task panicked: {e}")))??;

            Worker::transition(&self.pool, worker_id, WorkerStatus::Paused).await?;
            WorkerHistory::record(
                &self.pool,
                &RecordWorkerHistory {
                    repo_id: worker.repo_id,
                    worker_id: worker_id.to_string(),
                    task_id: worker.task_id.clone(),
                    task_title: worker.task_title.clone(),
                    branch_name: Some(branch),
                    outcome: WorkerOutcome::Aborted,
                    merge_conflicts: 0,
                    files_changed: 0,
                    insertions: 0,
                    deletions: 0,
                    started_at: worker.started_at,
                },
            )
            .await?;
            return Ok(MergeOutcome::Aborted);
        }

        let permit = self
            .git_gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| MergeArbiterError::Conflict(format!("git concurrency gate closed: {e}")))?;
        let repo_path = std::path::PathBuf::from(&repo.absolute_path);
        let default_branch = repo.default_branch.clone();
        let dry_run_branch = branch.clone();
        let driver = self.driver.clone();
        let dry_run = tokio::task::spawn_blocking(move || {
            let result = driver.dry_run_merge(&repo_path, &dry_run_branch, &default_branch);
            drop(permit);
            result
        })
        .await
        .map_err(|e| MergeArbiterError::Conflict(format!("merge task panicked: {e}")))??;

        if let Some(selected) = &files {
            let conflict_files: Vec<&str> = dry_run.conflicts.iter().map(|c| c.file.as_str()).collect();
            let covers_all = conflict_files.iter().all(|f| selected.iter().any(|s| s == f));
            if selected.is_empty() || !covers_all {
                return Err(MergeArbiterError::Conflict(
                    "files selection does not cover every conflict; resolution left unapplied".into(),
                ));
            }
        }

        let merge_strategy = match strategy {
            ResolveStrategy::Ours => MergeStrategy::Ours,
            ResolveStrategy::Theirs => MergeStrategy::Theirs,
            ResolveStrategy::Abort => unreachable!("handled above"),
        };

        let conflict_count = dry_run.conflicts.len() as i64;
        match self
            .apply_and_finalize(worker_id, &repo, &branch, merge_strategy, conflict_count)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.record_error(worker_id, &worker, &branch, &err).await;
                Err(err)
            }
        }
    }

    async fn apply_and_finalize(
        &self,
        worker_id: &str,
        repo: &Repository,
        branch: &str,
        strategy: MergeStrategy,
        merge_conflicts: i64,
    ) -> Result<MergeOutcome, MergeArbiterError> {
        let worker = Worker::find_by_id(&self.pool, worker_id)
            .await?
            .ok_or(StoreError::NotFound)?;

        let permit = self
            .git_gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| MergeArbiterError::Conflict(format!("git concurrency gate closed: {e}")))?;
        let repo_path = std::path::PathBuf::from(&repo.absolute_path);
        let default_branch = repo.default_branch.clone();
        let driver = self.driver.clone();
        let apply_branch = branch.to_string();
        tokio::task::spawn_blocking(move || {
            let result = driver.apply_merge(&repo_path, &apply_branch, &default_branch, strategy);
            drop(permit);
            result
        })
        .await
        .map_err(|e| MergeArbiterError::Conflict(format!("apply task panicked: {e}")))??;

        let permit = self
            .git_gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| MergeArbiterError::Conflict(format!("git concurrency gate closed: {e}")))?;
        let repo_path = std::path::PathBuf::from(&repo.absolute_path);
        let default_branch = repo.default_branch.clone();
        let driver = self.driver.clone();
        let stats_branch = branch.to_string();
        let stats = tokio::task::spawn_blocking(move || {
            let result = driver.stats(&repo_path, &stats_branch, &default_branch);
            drop(permit);
            result
        })
        .await
        .map_err(|e| MergeArbiterError::Conflict(format!("stats task panicked: {e}")))??;

        if let Some(worktree_path) = &worker.worktree_path {
            let driver = self.driver.clone();
            let path = std::path::PathBuf::from(worktree_path);
            tokio::task::spawn_blocking(move || driver.remove_worktree(&path, true))
                .await
                .map_err(|e| MergeArbiterError::Conflict(format!("cleanup task panicked: {e}")))??;
        }

        Worker::transition(&self.pool, worker_id, WorkerStatus::Merged).await?;
        WorkerHistory::record(
            &self.pool,
            &RecordWorkerHistory {
                repo_id: worker.repo_id,
                worker_id: worker_id.to_string(),
                task_id: worker.task_id.clone(),
                task_title: worker.task_title.clone(),
                branch_name: Some(branch.to_string()),
                outcome: WorkerOutcome::Merged,
                merge_conflicts,
                files_changed: stats.files_changed,
                insertions: stats.insertions,
                deletions: stats.deletions,
                started_at: worker.started_at,
            },
        )
        .await?;

        Signal::emit(
            &self.pool,
            &EmitSignal {
                repo_id: worker.repo_id,
                worker_id: Some(worker_id.to_string()),
                kind: SignalType::Info,
                message: "Worker merged cleanly".into(),
                details: None,
                action_required: false,
                action_options: None,
            },
        )
        .await?;

        Ok(MergeOutcome::Merged {
            files_changed: stats.files_changed,
            insertions: stats.insertions,
            deletions: stats.deletions,
        })
    }

    async fn record_error(&self, worker_id: &str, worker: &Worker, branch: &str, err: &MergeArbiterError) {
        let _ = Worker::transition(&self.pool, worker_id, WorkerStatus::Error).await;
        let _ = WorkerHistory::record(
            &self.pool,
            &RecordWorkerHistory {
                repo_id: worker.repo_id,
                worker_id: worker_id.to_string(),
                task_id: worker.task_id.clone(),
                task_title: worker.task_title.clone(),
                branch_name: Some(branch.to_string()),
                outcome: WorkerOutcome::Error,
                merge_conflicts: 0,
                files_changed: 0,
                insertions: 0,
                deletions: 0,
                started_at: worker.started_at,
            },
        )
        .await;
        let _ = Signal::emit(
            &self.pool,
            &EmitSignal {
                repo_id: worker.repo_id,
                worker_id: Some(worker_id.to_string()),
                kind: SignalType::Warning,
                message: format!("Merge failed: {err}"),
                details: None,
                action_required: false,
                action_options: None,
            },
        )
        .await;
    }
}
