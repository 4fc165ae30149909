use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Building,
    ReadyForTesting,
    Rework,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Building,
    Debugging,
    Story,
    Reviewing,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Session {
    pub repo_id: Uuid,
    pub current_task: Option<String>,
    pub current_item: Option<String>,
    pub status: SessionStatus,
    pub mode: Option<SessionMode>,
    pub start_time: Option<DateTime<Utc>>,
    pub iteration: i64,
    pub last_activity: DateTime<Utc>,
    #[sqlx(json)]
    pub files_touched: Vec<String>,
    #[sqlx(json)]
    pub bug_fixes: Vec<String>,
    #[sqlx(json)]
    pub scope_changes: Vec<String>,
    #[sqlx(json)]
    pub deviations: Vec<String>,
    #[sqlx(json)]
    pub also_did: Vec<String>,
    #[sqlx(json)]
    pub queue: Vec<String>,
    pub anchor_task_id: Option<String>,
    pub anchor_task_title: Option<String>,
    pub anchor_set_at: Option<DateTime<Utc>>,
    pub anchor_set_by: Option<String>,
    pub current_item_start_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSession {
    pub current_task: Option<String>,
    pub current_item: Option<String>,
    pub status: Option<SessionStatus>,
    pub mode: Option<SessionMode>,
    pub iteration: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct OnTrack {
    pub on_track: bool,
    pub anchor: Option<String>,
    pub current: Option<String>,
}

impl Session {
    pub async fn get(pool: &SqlitePool, repo_id: Uuid) -> Result<Option<Self>, StoreError> {
        sqlx::query_as::<_, Self>("SELECT * FROM sessions WHERE repo_id = ?")
            .bind(repo_id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    async fn get_or_default(pool: &SqlitePool, repo_id: Uuid) -> Result<Self, StoreError> {
        if let Some(session) = Self::get(pool, repo_id).await? {
            return Ok(session);
        }
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO sessions (repo_id, status, iteration, last_activity, updated_at) VALUES (?, 'idle', 0, ?, ?)",
        )
        .bind(repo_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Self::get(pool, repo_id).await?.ok_or(StoreError::NotFound)
    }

    /// Upserts the session into an active run, clearing ad-hoc arrays (§4.3).
    pub async fn start(
        pool: &SqlitePool,
        repo_id: Uuid,
        task_id: &str,
        _task_title: &str,
    ) -> Result<Self, StoreError> {
        Self::get_or_default(pool, repo_id).await?;
        let now = Utc::now();
        sqlx::query(
            r#"UPDATE sessions SET current_task = ?, status = 'building', mode = 'building',
               start_time = ?, iteration = 1, files_touched = '[]', bug_fixes = '[]',
               scope_changes = '[]', deviations = '[]', also_did = '[]',
               last_activity = ?, updated_at = ? WHERE repo_id = ?"#,
        )
        .bind(task_id)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(repo_id)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Self::get(pool, repo_id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn clear(pool: &SqlitePool, repo_id: Uuid) -> Result<Self, StoreError> {
        Self::get_or_default(pool, repo_id).await?;
        let now = Utc::now();
        sqlx::query(
            r#"UPDATE sessions SET current_task = NULL, current_item = NULL, status = 'idle',
               mode = NULL, start_time = NULL, anchor_task_id = NULL, anchor_task_title = NULL,
               anchor_set_at = NULL, anchor_set_by = NULL, last_activity = ?, updated_at = ?
               WHERE repo_id = ?"#,
        )
        .bind(now)
        .bind(now)
        .bind(repo_id)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Self::get(pool, repo_id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn update(
        pool: &SqlitePool,
        repo_id: Uuid,
        patch: &UpdateSession,
    ) -> Result<Self, StoreError> {
        let existing = Self::get_or_default(pool, repo_id).await?;

        let current_task = patch.current_task.clone().or(existing.current_task);
        let current_item = patch.current_item.clone().or(existing.current_item);
        let status = patch.status.unwrap_or(existing.status);
        let mode = patch.mode.or(existing.mode);
        let iteration = patch.iteration.unwrap_or(existing.iteration);
        let start_time = patch.start_time.or(existing.start_time);
        let now = Utc::now();
        let current_item_start_time = if patch.current_item.is_some() {
            Some(now)
        } else {
            existing.current_item_start_time
        };

        sqlx::query(
            r#"UPDATE sessions SET current_task = ?, current_item = ?, status = ?, mode = ?,
               iteration = ?, start_time = ?, current_item_start_time = ?, last_activity = ?,
               updated_at = ? WHERE repo_id = ?"#,
        )
        .bind(&current_task)
        .bind(&current_item)
        .bind(status)
        .bind(mode)
        .bind(iteration)
        .bind(start_time)
        .bind(current_item_start_time)
        .bind(now)
        .bind(now)
        .bind(repo_id)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Self::get(pool, repo_id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn add_also_did(pool: &SqlitePool, repo_id: Uuid, text: &str) -> Result<Self, StoreError> {
        let existing = Self::get_or_default(pool, repo_id).await?;
        let mut also_did = existing.also_did;
        also_did.push(text.to_string());
        let now = Utc::now();
        sqlx::query("UPDATE sessions SET also_did = ?, last_activity = ?, updated_at = ? WHERE repo_id = ?")
            .bind(serde_json::to_string(&also_did).map_err(|e| StoreError::Validation(e.to_string()))?)
            .bind(now)
            .bind(now)
            .bind(repo_id)
            .execute(pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        Self::get(pool, repo_id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn set_anchor(
        pool: &SqlitePool,
        repo_id: Uuid,
        task_id: &str,
        title: &str,
        set_by: &str,
    ) -> Result<Self, StoreError> {
        Self::get_or_default(pool, repo_id).await?;
        let now = Utc::now();
        sqlx::query(
            r#"UPDATE sessions SET anchor_task_id = ?, anchor_task_title = ?, anchor_set_at = ?,
               anchor_set_by = ?, updated_at = ? WHERE repo_id = ?"#,
        )
        .bind(task_id)
        .bind(title)
        .bind(now)
        .bind(set_by)
        .bind(now)
        .bind(repo_id)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Self::get(pool, repo_id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn clear_anchor(pool: &SqlitePool, repo_id: Uuid) -> Result<Self, StoreError> {
        Self::get_or_default(pool, repo_id).await?;
        let now = Utc::now();
        sqlx::query(
            r#"UPDATE sessions SET anchor_task_id = NULL, anchor_task_title = NULL,
               anchor_set_at = NULL, anchor_set_by = NULL, updated_at = ? WHERE repo_id = ?"#,
        )
        .bind(now)
        .bind(repo_id)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Self::get(pool, repo_id).await?.ok_or(StoreError::NotFound)
    }

    /// `status=idle` with an anchor set is always off-track (§4.3).
    pub async fn on_track(pool: &SqlitePool, repo_id: Uuid) -> Result<OnTrack, StoreError> {
        let session = Self::get_or_default(pool, repo_id).await?;
        let on_track = match (&session.anchor_task_id, session.status) {
            (Some(anchor), SessionStatus::Idle) if !anchor.is_empty() => false,
            (Some(anchor), _) => session
                .current_task
                .as_deref()
                .is_some_and(|c| c == anchor || c.starts_with(&format!("{anchor}."))),
            (None, _) => true,
        };
        Ok(OnTrack {
            on_track,
            anchor: session.anchor_task_id,
            current: session.current_task,
        })
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
    async fn idle_with_anchor_is_off_track() {
        let store = Store::open_in_memory().await.unwrap();
        let repo_id = repo(&store).await;
        Session::set_anchor(&store.pool, repo_id, "SD.1", "Anchor task", "alex")
            .await
            .unwrap();
        let status = Session::on_track(&store.pool, repo_id).await.unwrap();
        assert!(!status.on_track);
    }

    #[tokio::test]
    async fn descendant_of_anchor_is_on_track() {
        let store = Store::open_in_memory().await.unwrap();
        let repo_id = repo(&store).await;
        Session::set_anchor(&store.pool, repo_id, "SD.2", "Anchor task", "alex").await.unwrap();
        Session::update(
            &store.pool,
            repo_id,
            &UpdateSession {
                current_task: Some("SD.2.1".into()),
                current_item: None,
                status: Some(SessionStatus::Active),
                mode: None,
                iteration: None,
                start_time: None,
            },
        )
        .await
        .unwrap();
        let status = Session::on_track(&store.pool, repo_id).await.unwrap();
        assert!(status.on_track);
    }

    #[tokio::test]
    async fn sibling_of_anchor_is_off_track() {
        let store = Store::open_in_memory().await.unwrap();
        let repo_id = repo(&store).await;
        Session::set_anchor(&store.pool, repo_id, "SD.2", "Anchor task", "alex").await.unwrap();
        Session::update(
            &store.pool,
            repo_id,
            &UpdateSession {
                current_task: Some("SD.20".into()),
                current_item: None,
                status: Some(SessionStatus::Active),
                mode: None,
                iteration: None,
                start_time: None,
            },
        )
        .await
        .unwrap();
        let status = Session::on_track(&store.pool, repo_id).await.unwrap();
        assert!(!status.on_track);
    }

    #[tokio::test]
    async fn start_clears_adhoc_arrays() {
        let store = Store::open_in_memory().await.unwrap();
        let repo_id = repo(&store).await;
        Session::add_also_did(&store.pool, repo_id, "explored config").await.unwrap();
        let session = Session::start(&store.pool, repo_id, "SD.1", "Do the thing").await.unwrap();
        assert!(session.also_did.is_empty());
        assert_eq!(session.iteration, 1);
    }
}
