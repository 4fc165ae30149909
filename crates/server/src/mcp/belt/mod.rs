//! Coordinator MCP Belt Tools
//!
//! The manager assistant's "utility belt": one tool per entity, each
//! dispatching on an `action` field the way a REST resource dispatches on
//! HTTP method. Tool handlers call `DeploymentImpl` directly rather than
//! going back out over HTTP, since the MCP and HTTP surfaces share one
//! process.
//!
//! ## Hierarchy
//!
//! ```text
//! LEVEL 1: REPO     - repo (tracked checkouts)
//! LEVEL 2: ITEM     - item (spec-tracked work items)
//! LEVEL 3: WORKER    - worker (agent lifecycle, merge arbitration)
//! LEVEL 4: SIGNAL   - signal (attention-routing bus)
//! LEVEL 5: SESSION  - session (single-flight manager state)
//! LEVEL 6: MIGRATE  - migrate (legacy markdown import)
//! ```

pub mod types;

use std::path::PathBuf;

use chkd_db::models::item::{CreateItem, Item, UpdateItem};
use chkd_db::models::repository::{CreateRepository, Repository, UpdateRepository};
use chkd_db::models::session::{Session, UpdateSession};
use chkd_db::models::signal::{EmitSignal, Signal};
use chkd_db::models::worker::{CreateWorker, UpdateWorker, Worker};
use chkd_deployment::Deployment;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::{tool, tool_handler, tool_router, ErrorData, ServerHandler};
use types::*;

use crate::DeploymentImpl;

fn success<T: serde::Serialize>(data: &T) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(data)
            .unwrap_or_else(|_| "Failed to serialize response".to_string()),
    )]))
}

fn error(err: BeltError) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::error(vec![Content::text(
        serde_json::to_string_pretty(&err).unwrap_or_else(|_| "Failed to serialize error".to_string()),
    )]))
}

fn missing(field: &str) -> BeltError {
    BeltError::new(format!("missing required field: {field}"))
}

/// Belt tools server: the Coordinator API as an MCP tool belt.
#[derive(Debug, Clone)]
pub struct BeltServer {
    deployment: DeploymentImpl,
    tool_router: ToolRouter<Self>,
}

impl BeltServer {
    pub fn new(deployment: DeploymentImpl) -> Self {
        Self {
            deployment,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl BeltServer {
    // =========================================================================
    // LEVEL 1: REPO
    // =========================================================================

    #[tool(
        description = "Manage tracked repository checkouts. Actions: 'list' (default), 'create', 'get', 'update', 'delete'."
    )]
    async fn repo(
        &self,
        Parameters(req): Parameters<RepoRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let action = req.action.as_deref().unwrap_or("list");
        match action {
            "create" => {
                let Some(absolute_path) = req.absolute_path.clone() else {
                    return error(missing("absolute_path"));
                };
                let Some(display_name) = req.display_name.clone() else {
                    return error(missing("display_name"));
                };
                let input = CreateRepository {
                    absolute_path,
                    display_name,
                    default_branch: req.default_branch.clone(),
                };
                match Repository::create(self.deployment.pool(), &input).await {
                    Ok(repo) => success(&ToolResult::new("create", repo).with_next_steps(vec![
                        "Call item(action='create') to seed work items".to_string(),
                    ])),
                    Err(e) => error(e.into()),
                }
            }
            "get" => {
                let Some(id) = req.id else {
                    return error(missing("id"));
                };
                match Repository::find_by_id(self.deployment.pool(), id).await {
                    Ok(Some(repo)) => success(&ToolResult::new("get", repo)),
                    Ok(None) => error(BeltError::new(format!("repository not found: {id}"))),
                    Err(e) => error(e.into()),
                }
            }
            "update" => {
                let Some(id) = req.id else {
                    return error(missing("id"));
                };
                let patch = UpdateRepository {
                    display_name: req.display_name.clone(),
                    default_branch: req.default_branch.clone(),
                    enabled: req.enabled,
                };
                match Repository::update(self.deployment.pool(), id, &patch).await {
                    Ok(repo) => success(&ToolResult::new("update", repo)),
                    Err(e) => error(e.into()),
                }
            }
            "delete" => {
                let Some(id) = req.id else {
                    return error(missing("id"));
                };
                let active = match Worker::by_repo(self.deployment.pool(), id).await {
                    Ok(workers) => workers,
                    Err(e) => return error(e.into()),
                };
                if active.iter().any(|w| !w.status.is_terminal()) {
                    return error(BeltError::new(
                        "repository has active workers; complete or cancel them first",
                    ));
                }
                match Repository::delete(self.deployment.pool(), id).await {
                    Ok(()) => success(&ToolResult::new("delete", serde_json::json!({ "id": id }))),
                    Err(e) => error(e.into()),
                }
            }
            _ => match Repository::list(self.deployment.pool()).await {
                Ok(repos) => success(&ToolResult::new("list", repos).with_next_steps(vec![
                    "Call repo(action='create') to track a new checkout".to_string(),
                ])),
                Err(e) => error(e.into()),
            },
        }
    }

    // =========================================================================
    // LEVEL 2: ITEM
    // =========================================================================

    #[tool(
        description = "Manage spec-tracked work items within a repository. Actions: 'list' (default), 'create', 'get', 'update', 'delete', 'find', 'search', 'progress', 'tags'."
    )]
    async fn item(
        &self,
        Parameters(req): Parameters<ItemRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let action = req.action.as_deref().unwrap_or("list");
        let pool = self.deployment.pool();

        match action {
            "create" => {
                let (Some(repo_id), Some(display_id), Some(title), Some(area_code), Some(section_number)) = (
                    req.repo_id,
                    req.display_id.clone(),
                    req.title.clone(),
                    req.area_code,
                    req.section_number,
                ) else {
                    return error(missing(
                        "repo_id, display_id, title, area_code and section_number",
                    ));
                };
                let input = CreateItem {
                    repo_id,
                    display_id,
                    title,
                    description: req.description.clone(),
                    story: req.story.clone(),
                    key_requirements: req.key_requirements.clone().unwrap_or_default(),
                    files_to_change: req.files_to_change.clone().unwrap_or_default(),
                    testing: req.testing.clone().unwrap_or_default(),
                    area_code,
                    section_number,
                    workflow_type: req.workflow_type.clone(),
                    parent_id: req.parent_id,
                    sort_order: req.sort_order.unwrap_or(0),
                    status: req.status,
                    priority: req.priority,
                };
                match Item::create(pool, &input).await {
                    Ok(item) => success(&ToolResult::new("create", item)),
                    Err(e) => error(e.into()),
                }
            }
            "get" => {
                let Some(id) = req.id else {
                    return error(missing("id"));
                };
                match Item::find_by_id(pool, id).await {
                    Ok(Some(item)) => success(&ToolResult::new("get", item)),
                    Ok(None) => error(BeltError::new(format!("item not found: {id}"))),
                    Err(e) => error(e.into()),
                }
            }
            "update" => {
                let Some(id) = req.id else {
                    return error(missing("id"));
                };
                let patch = UpdateItem {
                    title: req.title.clone(),
                    description: req.description.clone(),
                    story: req.story.clone(),
                    key_requirements: req.key_requirements.clone(),
                    files_to_change: req.files_to_change.clone(),
                    testing: req.testing.clone(),
                    area_code: req.area_code,
                    section_number: req.section_number,
                    workflow_type: req.workflow_type.clone(),
                    sort_order: req.sort_order,
                    status: req.status,
                    priority: req.priority,
                };
                match Item::update(pool, id, &patch).await {
                    Ok(item) => success(&ToolResult::new("update", item)),
                    Err(e) => error(e.into()),
                }
            }
            "delete" => {
                let Some(id) = req.id else {
                    return error(missing("id"));
                };
                match Item::delete(pool, id).await {
                    Ok(()) => success(&ToolResult::new("delete", serde_json::json!({ "id": id }))),
                    Err(e) => error(e.into()),
                }
            }
            "find" => {
                let (Some(repo_id), Some(query)) = (req.repo_id, req.query.clone()) else {
                    return error(missing("repo_id, query"));
                };
                match Item::find_one(pool, repo_id, &query).await {
                    Ok(item) => success(&ToolResult::new("find", item)),
                    Err(e) => error(e.into()),
                }
            }
            "search" => {
                let (Some(repo_id), Some(query)) = (req.repo_id, req.query.clone()) else {
                    return error(missing("repo_id, query"));
                };
                let limit = req.limit.unwrap_or(20);
                match Item::search(pool, repo_id, &query, limit).await {
                    Ok(items) => success(&ToolResult::new("search", items)),
                    Err(e) => error(e.into()),
                }
            }
            "progress" => {
                let Some(repo_id) = req.repo_id else {
                    return error(missing("repo_id"));
                };
                match Item::progress(pool, repo_id, req.area_code).await {
                    Ok(progress) => success(&ToolResult::new("progress", progress)),
                    Err(e) => error(e.into()),
                }
            }
            "tags" => {
                let Some(id) = req.id else {
                    return error(missing("id"));
                };
                if let Some(tags) = req.tags.clone() {
                    match Item::set_tags(pool, id, &tags).await {
                        Ok(()) => {}
                        Err(e) => return error(e.into()),
                    }
                }
                match Item::item_tags(pool, id).await {
                    Ok(tags) => success(&ToolResult::new("tags", tags)),
                    Err(e) => error(e.into()),
                }
            }
            _ => {
                let Some(repo_id) = req.repo_id else {
                    return error(missing("repo_id"));
                };
                let items = if let Some(tag) = req.query.clone() {
                    Item::items_by_tag(pool, repo_id, &tag).await
                } else if let Some(parent_id) = req.parent_id {
                    Item::children(pool, parent_id).await
                } else if let Some(status) = req.status {
                    Item::by_status(pool, repo_id, status).await
                } else if let Some(area) = req.area_code {
                    Item::by_area(pool, repo_id, area).await
                } else {
                    Item::by_repo(pool, repo_id).await
                };
                match items {
                    Ok(items) => success(&ToolResult::new("list", items)),
                    Err(e) => error(e.into()),
                }
            }
        }
    }

    // =========================================================================
    // LEVEL 3: WORKER
    // =========================================================================

    #[tool(
        description = "Manage agent workers: register, heartbeat, transition, complete (merge) or resolve conflicts. Actions: 'list' (default), 'register', 'get', 'update', 'heartbeat', 'transition', 'complete', 'resolve', 'delete'."
    )]
    async fn worker(
        &self,
        Parameters(req): Parameters<WorkerRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let pool = self.deployment.pool();
        let action = req.action.as_deref().unwrap_or("list");

        match action {
            "register" => {
                let (Some(repo_id), Some(username)) = (req.repo_id, req.username.clone()) else {
                    return error(missing("repo_id, username"));
                };
                let input = CreateWorker {
                    repo_id,
                    username,
                    task_id: req.task_id.clone(),
                    task_title: req.task_title.clone(),
                };
                match self.deployment.worker_spawner().spawn(&input).await {
                    Ok(worker) => success(&ToolResult::new("register", worker)),
                    Err(e) => error(e.into()),
                }
            }
            "get" => {
                let Some(id) = req.id.clone() else {
                    return error(missing("id"));
                };
                match Worker::find_by_id(pool, &id).await {
                    Ok(Some(worker)) => success(&ToolResult::new("get", worker)),
                    Ok(None) => error(BeltError::new(format!("worker not found: {id}"))),
                    Err(e) => error(e.into()),
                }
            }
            "update" => {
                let Some(id) = req.id.clone() else {
                    return error(missing("id"));
                };
                let patch = UpdateWorker {
                    message: req.message.clone(),
                    progress: req.progress,
                    worktree_path: req.worktree_path.clone(),
                    branch_name: req.branch_name.clone(),
                    next_task_id: req.next_task_id.clone(),
                    next_task_title: req.next_task_title.clone(),
                };
                match Worker::update(pool, &id, &patch).await {
                    Ok(worker) => success(&ToolResult::new("update", worker)),
                    Err(e) => error(e.into()),
                }
            }
            "heartbeat" => {
                let Some(id) = req.id.clone() else {
                    return error(missing("id"));
                };
                match Worker::heartbeat(pool, &id).await {
                    Ok(()) => success(&ToolResult::new("heartbeat", serde_json::json!({ "id": id }))),
                    Err(e) => error(e.into()),
                }
            }
            "transition" => {
                let (Some(id), Some(status)) = (req.id.clone(), req.status) else {
                    return error(missing("id, status"));
                };
                match Worker::transition(pool, &id, status).await {
                    Ok(worker) => success(&ToolResult::new("transition", worker)),
                    Err(e) => error(e.into()),
                }
            }
            "complete" => {
                let Some(id) = req.id.clone() else {
                    return error(missing("id"));
                };
                let auto_merge = req.auto_merge.unwrap_or(true);
                match self.deployment.merge_arbiter().complete_worker(&id, auto_merge).await {
                    Ok(outcome) => success(&ToolResult::new("complete", outcome)),
                    Err(e) => error(e.into()),
                }
            }
            "resolve" => {
                let (Some(id), Some(strategy)) = (req.id.clone(), req.strategy) else {
                    return error(missing("id, strategy"));
                };
                match self
                    .deployment
                    .merge_arbiter()
                    .resolve_worker(&id, strategy, req.files.clone())
                    .await
                {
                    Ok(outcome) => success(&ToolResult::new("resolve", outcome)),
                    Err(e) => error(e.into()),
                }
            }
            "delete" => {
                let Some(id) = req.id.clone() else {
                    return error(missing("id"));
                };
                match Worker::delete(pool, &id, req.force.unwrap_or(false)).await {
                    Ok(()) => success(&ToolResult::new("delete", serde_json::json!({ "id": id }))),
                    Err(e) => error(e.into()),
                }
            }
            _ => {
                let workers = if let Some(repo_id) = req.repo_id {
                    Worker::by_repo(pool, repo_id).await
                } else {
                    Worker::active(pool).await
                };
                match workers {
                    Ok(workers) => success(&ToolResult::new("list", workers)),
                    Err(e) => error(e.into()),
                }
            }
        }
    }

    // =========================================================================
    // LEVEL 4: SIGNAL
    // =========================================================================

    #[tool(
        description = "Read and emit attention-routing signals for a repository. Actions: 'list' (default), 'emit', 'dismiss', 'dismiss_all'."
    )]
    async fn signal(
        &self,
        Parameters(req): Parameters<SignalRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let pool = self.deployment.pool();
        let action = req.action.as_deref().unwrap_or("list");

        match action {
            "emit" => {
                let (Some(repo_id), Some(kind), Some(message)) =
                    (req.repo_id, req.kind, req.message.clone())
                else {
                    return error(missing("repo_id, type, message"));
                };
                let input = EmitSignal {
                    repo_id,
                    worker_id: req.worker_id.clone(),
                    kind,
                    message,
                    details: req.details.clone(),
                    action_required: req.action_required.unwrap_or(false),
                    action_options: req.action_options.clone(),
                };
                match Signal::emit(pool, &input).await {
                    Ok(signal) => success(&ToolResult::new("emit", signal)),
                    Err(e) => error(e.into()),
                }
            }
            "dismiss" => {
                let Some(id) = req.id.clone() else {
                    return error(missing("id"));
                };
                match Signal::dismiss(pool, &id).await {
                    Ok(signal) => success(&ToolResult::new("dismiss", signal)),
                    Err(e) => error(e.into()),
                }
            }
            "dismiss_all" => {
                let Some(repo_id) = req.repo_id else {
                    return error(missing("repo_id"));
                };
                match Signal::dismiss_all(pool, repo_id).await {
                    Ok(count) => success(&ToolResult::new("dismiss_all", count)),
                    Err(e) => error(e.into()),
                }
            }
            _ => {
                let Some(repo_id) = req.repo_id else {
                    return error(missing("repo_id"));
                };
                match Signal::active(pool, repo_id).await {
                    Ok(signals) => success(&ToolResult::new("list", signals)),
                    Err(e) => error(e.into()),
                }
            }
        }
    }

    // =========================================================================
    // LEVEL 5: SESSION
    // =========================================================================

    #[tool(
        description = "Manage the single-flight manager session for a repository. Actions: 'get' (default), 'start', 'clear', 'update', 'also_did', 'set_anchor', 'clear_anchor', 'on_track'."
    )]
    async fn session(
        &self,
        Parameters(req): Parameters<SessionRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let Some(repo_id) = req.repo_id else {
            return error(missing("repo_id"));
        };
        let pool = self.deployment.pool();
        let action = req.action.as_deref().unwrap_or("get");

        let result: Result<serde_json::Value, chkd_db::StoreError> = async {
            match action {
                "start" => {
                    let (Some(task_id), Some(task_title)) =
                        (req.task_id.clone(), req.task_title.clone())
                    else {
                        return Err(chkd_db::StoreError::Validation(
                            "task_id and task_title are required".to_string(),
                        ));
                    };
                    Session::start(pool, repo_id, &task_id, &task_title)
                        .await
                        .map(|s| serde_json::to_value(s).unwrap_or_default())
                }
                "clear" => Session::clear(pool, repo_id)
                    .await
                    .map(|s| serde_json::to_value(s).unwrap_or_default()),
                "update" => {
                    let patch = UpdateSession {
                        current_task: req.current_task.clone(),
                        current_item: req.current_item.clone(),
                        status: req.status,
                        mode: req.mode,
                        iteration: req.iteration,
                        start_time: None,
                    };
                    Session::update(pool, repo_id, &patch)
                        .await
                        .map(|s| serde_json::to_value(s).unwrap_or_default())
                }
                "also_did" => {
                    let Some(text) = req.text.clone() else {
                        return Err(chkd_db::StoreError::Validation("text is required".to_string()));
                    };
                    Session::add_also_did(pool, repo_id, &text)
                        .await
                        .map(|s| serde_json::to_value(s).unwrap_or_default())
                }
                "set_anchor" => {
                    let (Some(task_id), Some(title), Some(set_by)) =
                        (req.task_id.clone(), req.title.clone(), req.set_by.clone())
                    else {
                        return Err(chkd_db::StoreError::Validation(
                            "task_id, title and set_by are required".to_string(),
                        ));
                    };
                    Session::set_anchor(pool, repo_id, &task_id, &title, &set_by)
                        .await
                        .map(|s| serde_json::to_value(s).unwrap_or_default())
                }
                "clear_anchor" => Session::clear_anchor(pool, repo_id)
                    .await
                    .map(|s| serde_json::to_value(s).unwrap_or_default()),
                "on_track" => Session::on_track(pool, repo_id)
                    .await
                    .map(|s| serde_json::to_value(s).unwrap_or_default()),
                _ => Session::get(pool, repo_id)
                    .await
                    .map(|s| serde_json::to_value(s).unwrap_or_default()),
            }
        }
        .await;

        match result {
            Ok(value) => success(&ToolResult::new(action.to_string(), value)),
            Err(e) => error(e.into()),
        }
    }

    // =========================================================================
    // LEVEL 6: MIGRATE
    // =========================================================================

    #[tool(description = "Import a repository's legacy markdown spec into tracked items.")]
    async fn migrate(
        &self,
        Parameters(req): Parameters<MigrateRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let spec_file = req.spec_file.clone().unwrap_or_else(|| "SPEC.md".to_string());
        let repo_path = PathBuf::from(&req.repo_path);
        match self
            .deployment
            .run_migration(req.repo_id, &repo_path, &spec_file)
            .await
        {
            Ok(report) => success(&ToolResult::new("migrate", report)),
            Err(e) => error(e.into()),
        }
    }
}

#[tool_handler]
impl ServerHandler for BeltServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "chkd-belt".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Coordinator Belt Tools".to_string()),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Coordinator belt: repo -> item -> worker -> signal -> session -> migrate. \
                START HERE: repo(action='list') to find the repository id. \
                REGISTER an agent: worker(action='register', repo_id=..., username=...). \
                FINISH an agent: worker(action='complete', id=...) merges its worktree. \
                Use signal(action='list') to see what needs attention."
                    .to_string(),
            ),
        }
    }
}
