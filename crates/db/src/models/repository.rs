use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Repository {
    pub id: Uuid,
    pub absolute_path: String,
    pub display_name: String,
    pub default_branch: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRepository {
    pub absolute_path: String,
    pub display_name: String,
    pub default_branch: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRepository {
    pub display_name: Option<String>,
    pub default_branch: Option<String>,
    pub enabled: Option<bool>,
}

impl Repository {
    /// Creates the repository once per tracked checkout; a retried `create`
    /// with the same `absolute_path` fails `conflict` rather than duplicating
    /// (§3 Repository invariant).
    pub async fn create(pool: &SqlitePool, input: &CreateRepository) -> Result<Self, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let default_branch = input.default_branch.clone().unwrap_or_else(|| "main".into());

        sqlx::query(
            r#"INSERT INTO repositories (id, absolute_path, display_name, default_branch, enabled, created_at, updated_at)
               VALUES (?, ?, ?, ?, 1, ?, ?)"#,
        )
        .bind(id)
        .bind(&input.absolute_path)
        .bind(&input.display_name)
        .bind(&default_branch)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Self::find_by_id(pool, id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, StoreError> {
        sqlx::query_as::<_, Self>("SELECT * FROM repositories WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn find_by_path(
        pool: &SqlitePool,
        absolute_path: &str,
    ) -> Result<Option<Self>, StoreError> {
        sqlx::query_as::<_, Self>("SELECT * FROM repositories WHERE absolute_path = ?")
            .bind(absolute_path)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn list(pool: &SqlitePool) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>("SELECT * FROM repositories ORDER BY created_at ASC")
            .fetch_all(pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn update(
        pool: &SqlitePool,
        id: Uuid,
        patch: &UpdateRepository,
    ) -> Result<Self, StoreError> {
        let existing = Self::find_by_id(pool, id).await?.ok_or(StoreError::NotFound)?;
        let display_name = patch.display_name.clone().unwrap_or(existing.display_name);
        let default_branch = patch
            .default_branch
            .clone()
            .unwrap_or(existing.default_branch);
        let enabled = patch.enabled.unwrap_or(existing.enabled);
        let now = Utc::now();

        sqlx::query(
            "UPDATE repositories SET display_name = ?, default_branch = ?, enabled = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&display_name)
        .bind(&default_branch)
        .bind(enabled)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Self::find_by_id(pool, id).await?.ok_or(StoreError::NotFound)
    }

    /// Deletes the repository row only; §9 Open Questions resolves cascading
    /// to items/workers/signals/history as a refusal when non-terminal workers
    /// exist (enforced by the caller, `ItemService`/`WorkerService`, not here).
    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM repositories WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
