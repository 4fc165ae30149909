use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use crate::error::StoreError;

/// Single-row key/value store (§3). The row always exists at `id = 1`;
/// `get` seeds it with `{}` on first access instead of returning `NotFound`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Settings {
    #[sqlx(json)]
    pub data: serde_json::Value,
}

impl Settings {
    pub async fn get(pool: &SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "INSERT INTO settings (id, data) VALUES (1, '{}') ON CONFLICT(id) DO NOTHING",
        )
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        sqlx::query_as::<_, Self>("SELECT data FROM settings WHERE id = 1")
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from_sqlx)?
            .ok_or(StoreError::NotFound)
    }

    /// Replaces the whole blob; callers merge keys themselves before calling.
    pub async fn update(pool: &SqlitePool, data: &serde_json::Value) -> Result<Self, StoreError> {
        let encoded = serde_json::to_string(data).map_err(|e| StoreError::Validation(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO settings (id, data) VALUES (1, ?)
               ON CONFLICT(id) DO UPDATE SET data = excluded.data"#,
        )
        .bind(&encoded)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Self::get(pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[tokio::test]
    async fn get_seeds_an_empty_object_on_first_access() {
        let store = Store::open_in_memory().await.unwrap();
        let settings = Settings::get(&store.pool).await.unwrap();
        assert_eq!(settings.data, serde_json::json!({}));
    }

    #[tokio::test]
    async fn update_replaces_the_blob_and_persists() {
        let store = Store::open_in_memory().await.unwrap();
        let updated = Settings::update(&store.pool, &serde_json::json!({"theme": "dark"}))
            .await
            .unwrap();
        assert_eq!(updated.data["theme"], "dark");

        let reloaded = Settings::get(&store.pool).await.unwrap();
        assert_eq!(reloaded.data["theme"], "dark");
    }
}
