use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Pending,
    Waiting,
    Working,
    Paused,
    Merging,
    Merged,
    Error,
    Cancelled,
}

impl WorkerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerStatus::Merged | WorkerStatus::Error | WorkerStatus::Cancelled)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub repo_id: Uuid,
    pub username: String,
    pub task_id: Option<String>,
    pub task_title: Option<String>,
    pub status: WorkerStatus,
    pub message: Option<String>,
    pub progress: i64,
    pub worktree_path: Option<String>,
    pub branch_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub next_task_id: Option<String>,
    pub next_task_title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateWorker {
    pub repo_id: Uuid,
    pub username: String,
    pub task_id: Option<String>,
    pub task_title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateWorker {
    pub message: Option<String>,
    pub progress: Option<i64>,
    pub worktree_path: Option<String>,
    pub branch_name: Option<String>,
    pub next_task_id: Option<String>,
    pub next_task_title: Option<String>,
}

/// Allowed predecessor statuses per target status (§4.4). `Merging`/`Merged`/
/// `Error` are reachable only through arbiter-only transitions.
fn allowed_predecessors(target: WorkerStatus) -> &'static [WorkerStatus] {
    use WorkerStatus::*;
    match target {
        Pending => &[],
        Waiting => &[Pending],
        Working => &[Waiting, Paused],
        Paused => &[Working],
        Merging => &[Working, Paused],
        Merged => &[Merging],
        Error => &[Working, Paused, Merging],
        Cancelled => &[Pending, Waiting, Working, Paused],
    }
}

impl Worker {
    pub async fn create(pool: &SqlitePool, input: &CreateWorker) -> Result<Self, StoreError> {
        let id = chkd_utils::ids::worker_id(&input.username);
        let now = Utc::now();

        sqlx::query(
            r#"INSERT INTO workers (id, repo_id, username, task_id, task_title, status,
               progress, created_at, heartbeat_at)
               VALUES (?, ?, ?, ?, ?, 'pending', 0, ?, ?)"#,
        )
        .bind(&id)
        .bind(input.repo_id)
        .bind(&input.username)
        .bind(&input.task_id)
        .bind(&input.task_title)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Self::find_by_id(pool, &id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Self>, StoreError> {
        sqlx::query_as::<_, Self>("SELECT * FROM workers WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn by_repo(pool: &SqlitePool, repo_id: Uuid) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>("SELECT * FROM workers WHERE repo_id = ? ORDER BY created_at ASC")
            .bind(repo_id)
            .fetch_all(pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn active(pool: &SqlitePool) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM workers WHERE status IN ('working', 'merging')",
        )
        .fetch_all(pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    /// True when a non-terminal worker already owns `task_id` for `repo_id`
    /// (at most one live worker per task, §4.5).
    pub async fn has_non_terminal_for_task(
        pool: &SqlitePool,
        repo_id: Uuid,
        task_id: &str,
    ) -> Result<bool, StoreError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM workers WHERE repo_id = ? AND task_id = ? \
             AND status NOT IN ('merged', 'error', 'cancelled')",
        )
        .bind(repo_id)
        .bind(task_id)
        .fetch_one(pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(row.0 > 0)
    }

    pub async fn count_active(pool: &SqlitePool, repo_id: Uuid) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM workers WHERE repo_id = ? AND status NOT IN ('merged', 'error', 'cancelled')",
        )
        .bind(repo_id)
        .fetch_one(pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(row.0)
    }

    /// Read-modify-write guarded transition: the `UPDATE ... WHERE status IN
    /// (...)` only ever fires from an allowed predecessor, so a racing writer
    /// observing a stale row cannot smuggle an illegal transition through.
    pub async fn transition(
        pool: &SqlitePool,
        id: &str,
        target: WorkerStatus,
    ) -> Result<Self, StoreError> {
        let predecessors = allowed_predecessors(target);
        if predecessors.is_empty() {
            return Err(StoreError::Constraint(format!(
                "{target:?} is not a reachable transition target"
            )));
        }

        let placeholders = predecessors.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let now = Utc::now();
        let started_at_clause = if target == WorkerStatus::Working {
            ", started_at = COALESCE(started_at, ?)"
        } else {
            ""
        };
        let completed_at_clause = if target.is_terminal() {
            ", completed_at = ?"
        } else {
            ""
        };

        let sql = format!(
            "UPDATE workers SET status = ?, heartbeat_at = ?{started_at_clause}{completed_at_clause} \
             WHERE id = ? AND status IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(target).bind(now);
        if target == WorkerStatus::Working {
            query = query.bind(now);
        }
        if target.is_terminal() {
            query = query.bind(now);
        }
        query = query.bind(id);
        for predecessor in predecessors {
            query = query.bind(*predecessor);
        }

        let result = query.execute(pool).await.map_err(StoreError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "worker {id} is not in a state that allows transitioning to {target:?}"
            )));
        }

        Self::find_by_id(pool, id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn update(pool: &SqlitePool, id: &str, patch: &UpdateWorker) -> Result<Self, StoreError> {
        let existing = Self::find_by_id(pool, id).await?.ok_or(StoreError::NotFound)?;
        let message = patch.message.clone().or(existing.message);
        let progress = patch.progress.unwrap_or(existing.progress);
        let worktree_path = patch.worktree_path.clone().or(existing.worktree_path);
        let branch_name = patch.branch_name.clone().or(existing.branch_name);
        let next_task_id = patch.next_task_id.clone().or(existing.next_task_id);
        let next_task_title = patch.next_task_title.clone().or(existing.next_task_title);
        let now = Utc::now();

        sqlx::query(
            r#"UPDATE workers SET message = ?, progress = ?, worktree_path = ?, branch_name = ?,
               next_task_id = ?, next_task_title = ?, heartbeat_at = ? WHERE id = ?"#,
        )
        .bind(&message)
        .bind(progress)
        .bind(&worktree_path)
        .bind(&branch_name)
        .bind(&next_task_id)
        .bind(&next_task_title)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Self::find_by_id(pool, id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn heartbeat(pool: &SqlitePool, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE workers SET heartbeat_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, id: &str, force: bool) -> Result<(), StoreError> {
        let worker = Self::find_by_id(pool, id).await?.ok_or(StoreError::NotFound)?;
        if !worker.status.is_terminal() && !force {
            return Err(StoreError::Conflict(
                "worker is not terminal; pass force=true to delete anyway".into(),
            ));
        }
        sqlx::query("DELETE FROM workers WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    /// Workers whose `heartbeatAt` is older than `threshold_ms` and still in
    /// a live status (§4.4 liveness sweep).
    pub async fn stale(pool: &SqlitePool, threshold_ms: i64) -> Result<Vec<Self>, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(threshold_ms);
        sqlx::query_as::<_, Self>(
            "SELECT * FROM workers WHERE status IN ('working', 'merging') AND heartbeat_at < ?",
        )
        .bind(cutoff)
        .fetch_all(pool)
        .await
        .map_err(StoreError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    async fn repo(store: &Store) -> Uuid {
        crate::models::repository::Repository::create(
            &store.pool,
            &crate::models::repository::CreateRepository {
                absolute_path: "/tmp/repo".into(),
                display_name: "repo".into(),
                default_branch: None,
            },
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        let repo_id = repo(&store).await;
        let worker = Worker::create(
            &store.pool,
            &CreateWorker {
                repo_id,
                username: "alex".into(),
                task_id: Some("SD.1".into()),
                task_title: Some("Do the thing".into()),
            },
        )
        .await
        .unwrap();

        let err = Worker::transition(&store.pool, &worker.id, WorkerStatus::Merged)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn working_sets_started_at_once() {
        let store = Store::open_in_memory().await.unwrap();
        let repo_id = repo(&store).await;
        let worker = Worker::create(
            &store.pool,
            &CreateWorker {
                repo_id,
                username: "alex".into(),
                task_id: None,
                task_title: None,
            },
        )
        .await
        .unwrap();

        Worker::transition(&store.pool, &worker.id, WorkerStatus::Waiting).await.unwrap();
        let working = Worker::transition(&store.pool, &worker.id, WorkerStatus::Working).await.unwrap();
        assert!(working.started_at.is_some());

        Worker::transition(&store.pool, &worker.id, WorkerStatus::Paused).await.unwrap();
        let working_again =
            Worker::transition(&store.pool, &worker.id, WorkerStatus::Working).await.unwrap();
        assert_eq!(working.started_at, working_again.started_at);
    }

    #[tokio::test]
    async fn delete_non_terminal_requires_force() {
        let store = Store::open_in_memory().await.unwrap();
        let repo_id = repo(&store).await;
        let worker = Worker::create(
            &store.pool,
            &CreateWorker {
                repo_id,
                username: "alex".into(),
                task_id: None,
                task_title: None,
            },
        )
        .await
        .unwrap();

        let err = Worker::delete(&store.pool, &worker.id, false).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        Worker::delete(&store.pool, &worker.id, true).await.unwrap();
    }
}
