use std::path::Path;

use chkd_db::models::item::{AreaCode, CreateItem, Item, ItemStatus, Priority, UpdateItem};
use chkd_db::StoreError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("could not read migration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub items_imported: i64,
    pub items_updated: i64,
    pub items_skipped: i64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
struct ParsedItem {
    title: String,
    description: Option<String>,
    priority: Priority,
    tags: Vec<String>,
    done: bool,
    children: Vec<ParsedItem>,
}

struct ParsedArea {
    code: AreaCode,
    items: Vec<ParsedItem>,
}

const IMPORTED_AREAS: [&str; 4] = ["SD", "FE", "BE", "FUT"];

/// Imports `<repoPath>/docs/<specFile>` into items (§4.8). Safe to re-run:
/// existing `(repoId, displayId)` rows only have their status refreshed, and
/// a subtree stops descending once it finds a `done` ancestor.
pub struct Migrator {
    pool: SqlitePool,
}

impl Migrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(
        &self,
        repo_id: Uuid,
        repo_path: &Path,
        spec_file: &str,
    ) -> Result<MigrationReport, MigrationError> {
        let path = repo_path.join("docs").join(spec_file);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| MigrationError::Io {
                path: path.to_string_lossy().to_string(),
                source,
            })?;

        let areas = parse_markdown(&content);
        let mut report = MigrationReport::default();

        for area in areas {
            let mut section_number = 0i64;
            for top in &area.items {
                section_number += 1;
                let display_id = format!("{}.{section_number}", area.code);
                self.import_item(
                    repo_id,
                    &display_id,
                    None,
                    area.code,
                    section_number,
                    top,
                    &mut report,
                )
                .await?;
            }
        }

        Ok(report)
    }

    async fn import_item(
        &self,
        repo_id: Uuid,
        display_id: &str,
        parent_id: Option<Uuid>,
        area_code: AreaCode,
        section_number: i64,
        parsed: &ParsedItem,
        report: &mut MigrationReport,
    ) -> Result<(), MigrationError> {
        let status = if parsed.done { ItemStatus::Done } else { ItemStatus::Open };
        let existing = Item::find_by_display_id(&self.pool, repo_id, display_id).await?;

        let item_id = match existing {
            Some(existing_item) => {
                if existing_item.status != status {
                    Item::update(
                        &self.pool,
                        existing_item.id,
                        &UpdateItem {
                            status: Some(status),
                            ..Default::default()
                        },
                    )
                    .await?;
                    report.items_updated += 1;
                } else {
                    report.items_skipped += 1;
                }
                existing_item.id
            }
            None => {
                let created = Item::create(
                    &self.pool,
                    &CreateItem {
                        repo_id,
                        display_id: display_id.to_string(),
                        title: parsed.title.clone(),
                        description: parsed.description.clone(),
                        story: None,
                        key_requirements: Vec::new(),
                        files_to_change: Vec::new(),
                        testing: Vec::new(),
                        area_code,
                        section_number,
                        workflow_type: None,
                        parent_id,
                        sort_order: section_number,
                        status: Some(status),
                        priority: Some(parsed.priority),
                    },
                )
                .await?;

                if !parsed.tags.is_empty() {
                    let mut valid = Vec::new();
                    for tag in &parsed.tags {
                        match chkd_db::models::item::validate_tag(tag) {
                            Ok(validated) => valid.push(validated),
                            Err(err) => report.errors.push(err.to_string()),
                        }
                    }
                    if !valid.is_empty() {
                        Item::set_tags(&self.pool, created.id, &valid).await?;
                    }
                }

                report.items_imported += 1;
                created.id
            }
        };

        if status == ItemStatus::Done {
            report.items_skipped += parsed.children.len() as i64;
            return Ok(());
        }

        for (index, child) in parsed.children.iter().enumerate() {
            let child_display_id = format!("{display_id}.{}", index + 1);
            Box::pin(self.import_item(
                repo_id,
                &child_display_id,
                Some(item_id),
                area_code,
                (index + 1) as i64,
                child,
                report,
            ))
            .await?;
        }

        Ok(())
    }
}

fn parse_markdown(content: &str) -> Vec<ParsedArea> {
    let heading_re = match Regex::new(r"^##\s+([A-Za-z]+)\b") {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    let checklist_re = match Regex::new(r"^(\s*)-\s*\[([ xX])\]\s*(.*)$") {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };

    let mut areas: Vec<ParsedArea> = Vec::new();
    let mut current_code: Option<AreaCode> = None;
    let mut flat: Vec<(usize, ParsedItem)> = Vec::new();

    let flush = |code: Option<AreaCode>, flat: &mut Vec<(usize, ParsedItem)>, areas: &mut Vec<ParsedArea>| {
        if let Some(code) = code {
            let items = build_tree(std::mem::take(flat));
            if !items.is_empty() {
                areas.push(ParsedArea { code, items });
            }
        } else {
            flat.clear();
        }
    };

    for line in content.lines() {
        if let Some(captures) = heading_re.captures(line) {
            let name = captures.get(1).map(|m| m.as_str().to_uppercase()).unwrap_or_default();
            flush(current_code, &mut flat, &mut areas);
            current_code = if IMPORTED_AREAS.contains(&name.as_str()) {
                area_code_from_str(&name)
            } else {
                None
            };
            continue;
        }

        if current_code.is_none() {
            continue;
        }

        if let Some(captures) = checklist_re.captures(line) {
            let indent = captures.get(1).map(|m| m.as_str().len()).unwrap_or(0) / 2;
            let checked = captures
                .get(2)
                .map(|m| m.as_str().eq_ignore_ascii_case("x"))
                .unwrap_or(false);
            let rest = captures.get(3).map(|m| m.as_str()).unwrap_or("").trim();
            flat.push((indent, parse_item_line(rest, checked)));
        }
    }
    flush(current_code, &mut flat, &mut areas);

    areas
}

fn area_code_from_str(name: &str) -> Option<AreaCode> {
    match name {
        "SD" => Some(AreaCode::Sd),
        "FE" => Some(AreaCode::Fe),
        "BE" => Some(AreaCode::Be),
        "FUT" => Some(AreaCode::Fut),
        _ => None,
    }
}

fn parse_item_line(rest: &str, checked: bool) -> ParsedItem {
    let priority_re = match Regex::new(r"(?i)^\[p([123])\]\s*") {
        Ok(re) => re,
        Err(_) => return ParsedItem {
            title: rest.to_string(),
            description: None,
            priority: Priority::Medium,
            tags: Vec::new(),
            done: checked,
            children: Vec::new(),
        },
    };

    let (priority, rest) = match priority_re.captures(rest) {
        Some(captures) => {
            let digit = captures.get(1).map(|m| m.as_str()).unwrap_or("3");
            let priority = match digit {
                "1" => Priority::Critical,
                "2" => Priority::High,
                _ => Priority::Medium,
            };
            let rest = &rest[captures.get(0).map(|m| m.end()).unwrap_or(0)..];
            (priority, rest)
        }
        None => (Priority::Medium, rest),
    };

    let (head, description) = match rest.find(" - ") {
        Some(idx) => (&rest[..idx], Some(rest[idx + 3..].trim().to_string())),
        None => (rest, None),
    };

    let tag_re = match Regex::new(r"#([A-Za-z0-9][A-Za-z0-9_-]*)") {
        Ok(re) => re,
        Err(_) => return ParsedItem {
            title: head.trim().to_string(),
            description,
            priority,
            tags: Vec::new(),
            done: checked,
            children: Vec::new(),
        },
    };

    let tags: Vec<String> = tag_re
        .captures_iter(head)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_lowercase()))
        .collect();
    let title = tag_re.replace_all(head, "").trim().to_string();

    ParsedItem {
        title,
        description,
        priority,
        tags,
        done: checked,
        children: Vec::new(),
    }
}

fn build_tree(flat: Vec<(usize, ParsedItem)>) -> Vec<ParsedItem> {
    let mut iter = flat.into_iter().peekable();
    build_level(&mut iter, 0)
}

fn build_level(
    iter: &mut std::iter::Peekable<std::vec::IntoIter<(usize, ParsedItem)>>,
    level: usize,
) -> Vec<ParsedItem> {
    let mut out = Vec::new();
    loop {
        let Some(&(indent, _)) = iter.peek() else { break };
        if indent != level {
            break;
        }
        let Some((_, mut item)) = iter.next() else { break };
        item.children = build_level(iter, level + 1);
        out.push(item);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chkd_db::models::repository::{CreateRepository, Repository};
    use chkd_db::store::Store;

    const SAMPLE: &str = "## SD - Seed Data\n\
- [ ] [P1] Build the importer #migration - handles nested children\n\
  - [x] Parse headings\n\
  - [ ] Parse checklist items #parsing\n\
## MISC - Not a tracked area\n\
- [ ] Ignored, MISC is not in {SD,FE,BE,FUT}\n";

    #[tokio::test]
    async fn import_creates_hierarchy_and_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        let repo = Repository::create(
            &store.pool,
            &CreateRepository {
                absolute_path: "/tmp/repo".into(),
                display_name: "repo".into(),
                default_branch: None,
            },
        )
        .await
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/SPEC.md"), SAMPLE).unwrap();

        let migrator = Migrator::new(store.pool.clone());
        let first = migrator.migrate(repo.id, dir.path(), "SPEC.md").await.unwrap();
        assert_eq!(first.items_imported, 3);

        let top = Item::find_by_display_id(&store.pool, repo.id, "SD.1").await.unwrap().unwrap();
        assert_eq!(top.priority, Priority::Critical);
        assert_eq!(Item::item_tags(&store.pool, top.id).await.unwrap(), vec!["migration"]);

        let second = migrator.migrate(repo.id, dir.path(), "SPEC.md").await.unwrap();
        assert_eq!(second.items_imported, 0);
        assert_eq!(second.items_skipped, 3);
    }
}
