use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum AreaCode {
    Sd,
    Fe,
    Be,
    Fut,
}

impl std::str::FromStr for AreaCode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SD" => Ok(AreaCode::Sd),
            "FE" => Ok(AreaCode::Fe),
            "BE" => Ok(AreaCode::Be),
            "FUT" => Ok(AreaCode::Fut),
            other => Err(StoreError::Validation(format!("unknown area code: {other}"))),
        }
    }
}

impl std::fmt::Display for AreaCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AreaCode::Sd => "SD",
            AreaCode::Fe => "FE",
            AreaCode::Be => "BE",
            AreaCode::Fut => "FUT",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ItemStatus {
    Open,
    InProgress,
    Done,
    Skipped,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    /// Maps the legacy numeric encoding (§4.2): `1|2|3|null -> critical|high|medium|medium`.
    pub fn from_legacy(value: Option<i64>) -> Self {
        match value {
            Some(1) => Priority::Critical,
            Some(2) => Priority::High,
            Some(3) => Priority::Medium,
            _ => Priority::Medium,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub display_id: String,
    pub title: String,
    pub description: Option<String>,
    pub story: Option<String>,
    #[sqlx(json)]
    pub key_requirements: Vec<String>,
    #[sqlx(json)]
    pub files_to_change: Vec<String>,
    #[sqlx(json)]
    pub testing: Vec<String>,
    pub area_code: AreaCode,
    pub section_number: i64,
    pub workflow_type: Option<String>,
    pub parent_id: Option<Uuid>,
    pub sort_order: i64,
    pub status: ItemStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateItem {
    pub repo_id: Uuid,
    pub display_id: String,
    pub title: String,
    pub description: Option<String>,
    pub story: Option<String>,
    #[serde(default)]
    pub key_requirements: Vec<String>,
    #[serde(default)]
    pub files_to_change: Vec<String>,
    #[serde(default)]
    pub testing: Vec<String>,
    pub area_code: AreaCode,
    pub section_number: i64,
    pub workflow_type: Option<String>,
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub status: Option<ItemStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateItem {
    pub title: Option<String>,
    pub description: Option<String>,
    pub story: Option<String>,
    pub key_requirements: Option<Vec<String>>,
    pub files_to_change: Option<Vec<String>>,
    pub testing: Option<Vec<String>>,
    pub area_code: Option<AreaCode>,
    pub section_number: Option<i64>,
    pub workflow_type: Option<String>,
    pub sort_order: Option<i64>,
    pub status: Option<ItemStatus>,
    pub priority: Option<Priority>,
}

#[derive(Debug, Serialize)]
pub struct Progress {
    pub total: i64,
    pub done: i64,
    pub percent: f64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ItemDuration {
    pub item_id: Uuid,
    pub repo_id: Uuid,
    pub duration_ms: i64,
    pub completed_at: DateTime<Utc>,
}

/// A row cannot implement `Default` sensibly here since most fields are
/// mandatory; this row-builder keeps `create`/`update` free of repetition.
fn bind_json(values: &[String]) -> Result<String, StoreError> {
    serde_json::to_string(values).map_err(|e| StoreError::Validation(e.to_string()))
}

impl Item {
    pub const ORDER_BY: &'static str = "area_code, section_number, sort_order";

    pub async fn create(pool: &SqlitePool, input: &CreateItem) -> Result<Self, StoreError> {
        if Self::find_by_display_id(pool, input.repo_id, &input.display_id)
            .await?
            .is_some()
        {
            return Err(StoreError::Conflict(format!(
                "item {} already exists in repo",
                input.display_id
            )));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let status = input.status.unwrap_or(ItemStatus::Open);
        let priority = input.priority.unwrap_or(Priority::Medium);

        sqlx::query(
            r#"INSERT INTO items
               (id, repo_id, display_id, title, description, story, key_requirements,
                files_to_change, testing, area_code, section_number, workflow_type,
                parent_id, sort_order, status, priority, created_at, updated_at)
               VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)"#,
        )
        .bind(id)
        .bind(input.repo_id)
        .bind(&input.display_id)
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.story)
        .bind(bind_json(&input.key_requirements)?)
        .bind(bind_json(&input.files_to_change)?)
        .bind(bind_json(&input.testing)?)
        .bind(input.area_code)
        .bind(input.section_number)
        .bind(&input.workflow_type)
        .bind(input.parent_id)
        .bind(input.sort_order)
        .bind(status)
        .bind(priority)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Self::find_by_id(pool, id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, StoreError> {
        sqlx::query_as::<_, Self>("SELECT * FROM items WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn find_by_display_id(
        pool: &SqlitePool,
        repo_id: Uuid,
        display_id: &str,
    ) -> Result<Option<Self>, StoreError> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM items WHERE repo_id = ? AND display_id = ? COLLATE NOCASE",
        )
        .bind(repo_id)
        .bind(display_id)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    pub async fn update(
        pool: &SqlitePool,
        id: Uuid,
        patch: &UpdateItem,
    ) -> Result<Self, StoreError> {
        let existing = Self::find_by_id(pool, id).await?.ok_or(StoreError::NotFound)?;

        let title = patch.title.clone().unwrap_or(existing.title);
        let description = patch.description.clone().or(existing.description);
        let story = patch.story.clone().or(existing.story);
        let key_requirements = patch
            .key_requirements
            .clone()
            .unwrap_or(existing.key_requirements);
        let files_to_change = patch
            .files_to_change
            .clone()
            .unwrap_or(existing.files_to_change);
        let testing = patch.testing.clone().unwrap_or(existing.testing);
        let area_code = patch.area_code.unwrap_or(existing.area_code);
        let section_number = patch.section_number.unwrap_or(existing.section_number);
        let workflow_type = patch.workflow_type.clone().or(existing.workflow_type);
        let sort_order = patch.sort_order.unwrap_or(existing.sort_order);
        let status = patch.status.unwrap_or(existing.status);
        let priority = patch.priority.unwrap_or(existing.priority);
        let now = Utc::now();

        sqlx::query(
            r#"UPDATE items SET title=?, description=?, story=?, key_requirements=?,
               files_to_change=?, testing=?, area_code=?, section_number=?, workflow_type=?,
               sort_order=?, status=?, priority=?, updated_at=? WHERE id=?"#,
        )
        .bind(&title)
        .bind(&description)
        .bind(&story)
        .bind(bind_json(&key_requirements)?)
        .bind(bind_json(&files_to_change)?)
        .bind(bind_json(&testing)?)
        .bind(area_code)
        .bind(section_number)
        .bind(&workflow_type)
        .bind(sort_order)
        .bind(status)
        .bind(priority)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        if status == ItemStatus::Done && existing.status != ItemStatus::Done {
            let duration_ms = (now - existing.created_at).num_milliseconds().max(0);
            sqlx::query(
                r#"INSERT INTO item_durations (item_id, repo_id, duration_ms, completed_at)
                   VALUES (?, ?, ?, ?)
                   ON CONFLICT(item_id) DO UPDATE SET duration_ms = excluded.duration_ms,
                       completed_at = excluded.completed_at"#,
            )
            .bind(id)
            .bind(existing.repo_id)
            .bind(duration_ms)
            .bind(now)
            .execute(pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        }

        Self::find_by_id(pool, id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn duration(pool: &SqlitePool, item_id: Uuid) -> Result<Option<ItemDuration>, StoreError> {
        sqlx::query_as::<_, ItemDuration>("SELECT * FROM item_durations WHERE item_id = ?")
            .bind(item_id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    /// Deletes `id` and its transitive subtree in one transaction. Foreign
    /// keys are relaxed for the duration so children can be removed
    /// leaves-first regardless of declaration order (§4.2).
    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<(), StoreError> {
        let ids = Self::descendant_ids_including_self(pool, id).await?;
        if ids.is_empty() {
            return Err(StoreError::NotFound);
        }

        let mut tx = pool.begin().await.map_err(StoreError::from_sqlx)?;
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_sqlx)?;

        // Deepest first so self-referencing FK checks (if re-enabled mid-way
        // by a future migration) still hold.
        for item_id in ids.iter().rev() {
            sqlx::query("DELETE FROM item_tags WHERE item_id = ?")
                .bind(item_id)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from_sqlx)?;
            sqlx::query("DELETE FROM item_durations WHERE item_id = ?")
                .bind(item_id)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from_sqlx)?;
            sqlx::query("DELETE FROM items WHERE id = ?")
                .bind(item_id)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from_sqlx)?;
        }

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_sqlx)?;
        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn descendant_ids_including_self(
        pool: &SqlitePool,
        id: Uuid,
    ) -> Result<Vec<Uuid>, StoreError> {
        let Some(root) = Self::find_by_id(pool, id).await? else {
            return Ok(Vec::new());
        };
        let mut ids = vec![root.id];
        let mut stack = vec![root.id];
        while let Some(current) = stack.pop() {
            let children = Self::children(pool, current).await?;
            for child in children {
                ids.push(child.id);
                stack.push(child.id);
            }
        }
        Ok(ids)
    }

    pub async fn by_repo(pool: &SqlitePool, repo_id: Uuid) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT * FROM items WHERE repo_id = ? ORDER BY {}",
            Self::ORDER_BY
        ))
        .bind(repo_id)
        .fetch_all(pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    pub async fn by_area(
        pool: &SqlitePool,
        repo_id: Uuid,
        area: AreaCode,
    ) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT * FROM items WHERE repo_id = ? AND area_code = ? ORDER BY {}",
            Self::ORDER_BY
        ))
        .bind(repo_id)
        .bind(area)
        .fetch_all(pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    pub async fn by_parent(pool: &SqlitePool, parent_id: Uuid) -> Result<Vec<Self>, StoreError> {
        Self::children(pool, parent_id).await
    }

    pub async fn by_status(
        pool: &SqlitePool,
        repo_id: Uuid,
        status: ItemStatus,
    ) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT * FROM items WHERE repo_id = ? AND status = ? ORDER BY {}",
            Self::ORDER_BY
        ))
        .bind(repo_id)
        .bind(status)
        .fetch_all(pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    pub async fn top_level(pool: &SqlitePool, repo_id: Uuid) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT * FROM items WHERE repo_id = ? AND parent_id IS NULL ORDER BY {}",
            Self::ORDER_BY
        ))
        .bind(repo_id)
        .fetch_all(pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    pub async fn children(pool: &SqlitePool, parent_id: Uuid) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT * FROM items WHERE parent_id = ? ORDER BY {}",
            Self::ORDER_BY
        ))
        .bind(parent_id)
        .fetch_all(pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    /// Depth-first subtree, parent before children.
    pub async fn descendants(pool: &SqlitePool, id: Uuid) -> Result<Vec<Self>, StoreError> {
        let mut out = Vec::new();
        let mut stack: Vec<Self> = Self::children(pool, id).await?;
        stack.reverse();
        while let Some(current) = stack.pop() {
            let mut children = Self::children(pool, current.id).await?;
            children.reverse();
            out.push(current);
            stack.extend(children);
        }
        Ok(out)
    }

    /// Root-last ancestor chain.
    pub async fn ancestors(pool: &SqlitePool, id: Uuid) -> Result<Vec<Self>, StoreError> {
        let mut out = Vec::new();
        let mut current = Self::find_by_id(pool, id).await?.ok_or(StoreError::NotFound)?;
        while let Some(parent_id) = current.parent_id {
            let parent = Self::find_by_id(pool, parent_id).await?.ok_or(StoreError::NotFound)?;
            out.push(parent.clone());
            current = parent;
        }
        Ok(out)
    }

    /// Exact displayId (case-insensitive) -> normalized id -> title CONTAINS
    /// -> description CONTAINS, first match wins (§4.2).
    pub async fn find_one(
        pool: &SqlitePool,
        repo_id: Uuid,
        query: &str,
    ) -> Result<Option<Self>, StoreError> {
        if let Some(item) = Self::find_by_display_id(pool, repo_id, query).await? {
            return Ok(Some(item));
        }

        let normalized = chkd_utils::ids::normalize_alnum(query);
        if !normalized.is_empty() {
            let candidates = Self::by_repo(pool, repo_id).await?;
            if let Some(item) = candidates
                .iter()
                .find(|i| chkd_utils::ids::normalize_alnum(&i.display_id) == normalized)
            {
                return Ok(Some(item.clone()));
            }
        }

        let needle = query.to_lowercase();
        let candidates = Self::by_repo(pool, repo_id).await?;
        if let Some(item) = candidates
            .iter()
            .find(|i| i.title.to_lowercase().contains(&needle))
        {
            return Ok(Some(item.clone()));
        }
        if let Some(item) = candidates.iter().find(|i| {
            i.description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle))
        }) {
            return Ok(Some(item.clone()));
        }

        Ok(None)
    }

    pub async fn search(
        pool: &SqlitePool,
        repo_id: Uuid,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Self>, StoreError> {
        let needle = query.to_lowercase();
        let mut items = Self::by_repo(pool, repo_id).await?;
        items.retain(|i| {
            i.display_id.to_lowercase().contains(&needle)
                || i.title.to_lowercase().contains(&needle)
                || i.description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&needle))
        });
        items.truncate(limit);
        Ok(items)
    }

    pub fn tbc_check(&self) -> Vec<&'static str> {
        let is_tbc = |values: &[String]| {
            values.is_empty() || (values.len() == 1 && values[0].eq_ignore_ascii_case("tbc"))
        };
        let mut missing = Vec::new();
        if is_tbc(&self.key_requirements) {
            missing.push("keyRequirements");
        }
        if is_tbc(&self.files_to_change) {
            missing.push("filesToChange");
        }
        if is_tbc(&self.testing) {
            missing.push("testing");
        }
        missing
    }

    pub async fn progress(
        pool: &SqlitePool,
        repo_id: Uuid,
        area: Option<AreaCode>,
    ) -> Result<Progress, StoreError> {
        let items = match area {
            Some(area) => Self::by_area(pool, repo_id, area).await?,
            None => Self::by_repo(pool, repo_id).await?,
        };
        let counted: Vec<&Self> = items
            .iter()
            .filter(|i| i.status != ItemStatus::Skipped)
            .collect();
        let total = counted.len() as i64;
        let done = counted
            .iter()
            .filter(|i| i.status == ItemStatus::Done)
            .count() as i64;
        let percent = if total == 0 {
            0.0
        } else {
            (done as f64 / total as f64) * 100.0
        };
        Ok(Progress { total, done, percent })
    }

    pub async fn next_section_number(
        pool: &SqlitePool,
        repo_id: Uuid,
        area: AreaCode,
    ) -> Result<i64, StoreError> {
        let top_level = Self::top_level(pool, repo_id).await?;
        let max = top_level
            .iter()
            .filter(|i| i.area_code == area)
            .map(|i| i.section_number)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    // ---- tags ----

    pub async fn add_tag(pool: &SqlitePool, item_id: Uuid, tag: &str) -> Result<(), StoreError> {
        let tag = validate_tag(tag)?;
        sqlx::query("INSERT OR IGNORE INTO item_tags (item_id, tag) VALUES (?, ?)")
            .bind(item_id)
            .bind(tag)
            .execute(pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    pub async fn remove_tag(pool: &SqlitePool, item_id: Uuid, tag: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM item_tags WHERE item_id = ? AND tag = ?")
            .bind(item_id)
            .bind(tag.to_lowercase())
            .execute(pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    pub async fn set_tags(
        pool: &SqlitePool,
        item_id: Uuid,
        tags: &[String],
    ) -> Result<(), StoreError> {
        let mut validated = HashSet::new();
        for tag in tags {
            validated.insert(validate_tag(tag)?);
        }

        let mut tx = pool.begin().await.map_err(StoreError::from_sqlx)?;
        sqlx::query("DELETE FROM item_tags WHERE item_id = ?")
            .bind(item_id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_sqlx)?;
        for tag in &validated {
            sqlx::query("INSERT INTO item_tags (item_id, tag) VALUES (?, ?)")
                .bind(item_id)
                .bind(tag)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from_sqlx)?;
        }
        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    pub async fn item_tags(pool: &SqlitePool, item_id: Uuid) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT tag FROM item_tags WHERE item_id = ? ORDER BY tag")
                .bind(item_id)
                .fetch_all(pool)
                .await
                .map_err(StoreError::from_sqlx)?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    pub async fn items_by_tag(
        pool: &SqlitePool,
        repo_id: Uuid,
        tag: &str,
    ) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT items.* FROM items
             JOIN item_tags ON item_tags.item_id = items.id
             WHERE items.repo_id = ? AND item_tags.tag = ?
             ORDER BY {}",
            Self::ORDER_BY
        ))
        .bind(repo_id)
        .bind(tag.to_lowercase())
        .fetch_all(pool)
        .await
        .map_err(StoreError::from_sqlx)
    }
}

/// Tags are lowercased and validated against `^[A-Za-z0-9][A-Za-z0-9_-]*$` (§4.2).
pub fn validate_tag(tag: &str) -> Result<String, StoreError> {
    let lowered = tag.to_lowercase();
    let mut chars = lowered.chars();
    let valid_first = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid_first || !valid_rest {
        return Err(StoreError::Validation(format!("invalid tag: {tag}")));
    }
    Ok(lowered)
}
