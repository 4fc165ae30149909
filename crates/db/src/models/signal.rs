use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Decision,
    Help,
    Warning,
    Info,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub repo_id: Uuid,
    pub worker_id: Option<String>,
    #[sqlx(rename = "type")]
    pub kind: SignalType,
    pub message: String,
    #[sqlx(json)]
    pub details: Option<serde_json::Value>,
    pub action_required: bool,
    #[sqlx(json)]
    pub action_options: Option<Vec<String>>,
    pub dismissed: bool,
    pub created_at: DateTime<Utc>,
    pub dismissed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct EmitSignal {
    pub repo_id: Uuid,
    pub worker_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: SignalType,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    #[serde(default)]
    pub action_required: bool,
    #[serde(default)]
    pub action_options: Option<Vec<String>>,
}

impl Signal {
    pub async fn emit(pool: &SqlitePool, input: &EmitSignal) -> Result<Self, StoreError> {
        let id = chkd_utils::ids::signal_id();
        let now = Utc::now();
        let details = input
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Validation(e.to_string()))?;
        let action_options = input
            .action_options
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Validation(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO signals
               (id, repo_id, worker_id, type, message, details, action_required,
                action_options, dismissed, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)"#,
        )
        .bind(&id)
        .bind(input.repo_id)
        .bind(&input.worker_id)
        .bind(input.kind)
        .bind(&input.message)
        .bind(&details)
        .bind(input.action_required)
        .bind(&action_options)
        .bind(now)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Self::find_by_id(pool, &id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Self>, StoreError> {
        sqlx::query_as::<_, Self>("SELECT * FROM signals WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    /// Undismissed signals, newest first (§4.7).
    pub async fn active(pool: &SqlitePool, repo_id: Uuid) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM signals WHERE repo_id = ? AND dismissed = 0 ORDER BY created_at DESC",
        )
        .bind(repo_id)
        .fetch_all(pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    /// An undismissed liveness warning already tracking this worker, used by
    /// the sweeper to deduplicate at the producer (§4.4).
    pub async fn has_active_warning_for_worker(
        pool: &SqlitePool,
        worker_id: &str,
    ) -> Result<bool, StoreError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM signals WHERE worker_id = ? AND type = 'warning' AND dismissed = 0",
        )
        .bind(worker_id)
        .fetch_one(pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(row.0 > 0)
    }

    pub async fn dismiss(pool: &SqlitePool, id: &str) -> Result<Self, StoreError> {
        sqlx::query("UPDATE signals SET dismissed = 1, dismissed_at = ? WHERE id = ? AND dismissed = 0")
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        Self::find_by_id(pool, id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn dismiss_all(pool: &SqlitePool, repo_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE signals SET dismissed = 1, dismissed_at = ? WHERE repo_id = ? AND dismissed = 0",
        )
        .bind(Utc::now())
        .bind(repo_id)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(result.rows_affected())
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
    async fn dismiss_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        let repo_id = repo(&store).await;
        let signal = Signal::emit(
            &store.pool,
            &EmitSignal {
                repo_id,
                worker_id: None,
                kind: SignalType::Info,
                message: "hello".into(),
                details: None,
                action_required: false,
                action_options: None,
            },
        )
        .await
        .unwrap();

        Signal::dismiss(&store.pool, &signal.id).await.unwrap();
        let dismissed_again = Signal::dismiss(&store.pool, &signal.id).await.unwrap();
        assert!(dismissed_again.dismissed);
    }

    #[tokio::test]
    async fn active_excludes_dismissed() {
        let store = Store::open_in_memory().await.unwrap();
        let repo_id = repo(&store).await;
        let signal = Signal::emit(
            &store.pool,
            &EmitSignal {
                repo_id,
                worker_id: None,
                kind: SignalType::Warning,
                message: "stale worker".into(),
                details: None,
                action_required: true,
                action_options: Some(vec!["resume".into(), "stop".into()]),
            },
        )
        .await
        .unwrap();

        assert_eq!(Signal::active(&store.pool, repo_id).await.unwrap().len(), 1);
        Signal::dismiss(&store.pool, &signal.id).await.unwrap();
        assert!(Signal::active(&store.pool, repo_id).await.unwrap().is_empty());
    }
}
