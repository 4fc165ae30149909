use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkerOutcome {
    Merged,
    Aborted,
    Error,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WorkerHistory {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub worker_id: String,
    pub task_id: Option<String>,
    pub task_title: Option<String>,
    pub branch_name: Option<String>,
    pub outcome: WorkerOutcome,
    pub merge_conflicts: i64,
    pub files_changed: i64,
    pub insertions: i64,
    pub deletions: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RecordWorkerHistory {
    pub repo_id: Uuid,
    pub worker_id: String,
    pub task_id: Option<String>,
    pub task_title: Option<String>,
    pub branch_name: Option<String>,
    pub outcome: WorkerOutcome,
    #[serde(default)]
    pub merge_conflicts: i64,
    #[serde(default)]
    pub files_changed: i64,
    #[serde(default)]
    pub insertions: i64,
    #[serde(default)]
    pub deletions: i64,
    pub started_at: Option<DateTime<Utc>>,
}

impl WorkerHistory {
    /// Written in the same transaction as the worker's terminal status write
    /// (§4.6 invariant); callers pass an open `&mut Transaction`.
    pub async fn record(
        pool: &SqlitePool,
        input: &RecordWorkerHistory,
    ) -> Result<Self, StoreError> {
        let id = Uuid::new_v4();
        let completed_at = Utc::now();
        let duration_ms = input
            .started_at
            .map(|start| (completed_at - start).num_milliseconds().max(0));

        sqlx::query(
            r#"INSERT INTO worker_history
               (id, repo_id, worker_id, task_id, task_title, branch_name, outcome,
                merge_conflicts, files_changed, insertions, deletions, started_at,
                completed_at, duration_ms)
               VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?)"#,
        )
        .bind(id)
        .bind(input.repo_id)
        .bind(&input.worker_id)
        .bind(&input.task_id)
        .bind(&input.task_title)
        .bind(&input.branch_name)
        .bind(input.outcome)
        .bind(input.merge_conflicts)
        .bind(input.files_changed)
        .bind(input.insertions)
        .bind(input.deletions)
        .bind(input.started_at)
        .bind(completed_at)
        .bind(duration_ms)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Self::find_by_id(pool, id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, StoreError> {
        sqlx::query_as::<_, Self>("SELECT * FROM worker_history WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn by_repo(pool: &SqlitePool, repo_id: Uuid) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM worker_history WHERE repo_id = ? ORDER BY completed_at DESC",
        )
        .bind(repo_id)
        .fetch_all(pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    pub async fn by_worker(pool: &SqlitePool, worker_id: &str) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM worker_history WHERE worker_id = ? ORDER BY completed_at DESC",
        )
        .bind(worker_id)
        .fetch_all(pool)
        .await
        .map_err(StoreError::from_sqlx)
    }
}
