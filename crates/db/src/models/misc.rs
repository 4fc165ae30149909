//! Trivial-CRUD records (§1): attachments, quick-wins, bugs, learnings. Only
//! minimal interfaces are specified, so these stay thin wrappers over the
//! obvious create/list/update/delete shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub item_id: Uuid,
    pub filename: String,
    pub path: String,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    pub async fn create(
        pool: &SqlitePool,
        item_id: Uuid,
        filename: &str,
        path: &str,
    ) -> Result<Self, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO attachments (id, item_id, filename, path, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(item_id)
        .bind(filename)
        .bind(path)
        .bind(now)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        sqlx::query_as::<_, Self>("SELECT * FROM attachments WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from_sqlx)?
            .ok_or(StoreError::NotFound)
    }

    pub async fn by_item(pool: &SqlitePool, item_id: Uuid) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>("SELECT * FROM attachments WHERE item_id = ? ORDER BY created_at ASC")
            .bind(item_id)
            .fetch_all(pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM attachments WHERE id = ?")
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RecordStatus {
    Open,
    Done,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QuickWin {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub title: String,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuickWin {
    pub async fn create(pool: &SqlitePool, repo_id: Uuid, title: &str) -> Result<Self, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO quick_wins (id, repo_id, title, status, created_at, updated_at) VALUES (?, ?, ?, 'open', ?, ?)",
        )
        .bind(id)
        .bind(repo_id)
        .bind(title)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Self::find_by_id(pool, id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, StoreError> {
        sqlx::query_as::<_, Self>("SELECT * FROM quick_wins WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn by_repo(pool: &SqlitePool, repo_id: Uuid) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>("SELECT * FROM quick_wins WHERE repo_id = ? ORDER BY created_at ASC")
            .bind(repo_id)
            .fetch_all(pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn set_status(pool: &SqlitePool, id: Uuid, status: RecordStatus) -> Result<Self, StoreError> {
        sqlx::query("UPDATE quick_wins SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        Self::find_by_id(pool, id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM quick_wins WHERE id = ?")
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

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Bug {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bug {
    pub async fn create(
        pool: &SqlitePool,
        repo_id: Uuid,
        title: &str,
        description: Option<&str>,
    ) -> Result<Self, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO bugs (id, repo_id, title, description, status, created_at, updated_at) VALUES (?, ?, ?, ?, 'open', ?, ?)",
        )
        .bind(id)
        .bind(repo_id)
        .bind(title)
        .bind(description)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Self::find_by_id(pool, id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, StoreError> {
        sqlx::query_as::<_, Self>("SELECT * FROM bugs WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn by_repo(pool: &SqlitePool, repo_id: Uuid) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>("SELECT * FROM bugs WHERE repo_id = ? ORDER BY created_at ASC")
            .bind(repo_id)
            .fetch_all(pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn set_status(pool: &SqlitePool, id: Uuid, status: RecordStatus) -> Result<Self, StoreError> {
        sqlx::query("UPDATE bugs SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        Self::find_by_id(pool, id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM bugs WHERE id = ?")
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

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Learning {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Learning {
    pub async fn create(pool: &SqlitePool, repo_id: Uuid, content: &str) -> Result<Self, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query("INSERT INTO learnings (id, repo_id, content, created_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(repo_id)
            .bind(content)
            .bind(now)
            .execute(pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        sqlx::query_as::<_, Self>("SELECT * FROM learnings WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from_sqlx)?
            .ok_or(StoreError::NotFound)
    }

    pub async fn by_repo(pool: &SqlitePool, repo_id: Uuid) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>("SELECT * FROM learnings WHERE repo_id = ? ORDER BY created_at ASC")
            .bind(repo_id)
            .fetch_all(pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM learnings WHERE id = ?")
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
