//! Response and request types for the belt tools.
//!
//! These mirror the Coordinator API's own types but stay LLM-friendly: every
//! result carries the action it answered and a list of suggested next steps.

use chkd_db::models::item::{AreaCode, ItemStatus, Priority};
use chkd_db::models::session::{SessionMode, SessionStatus};
use chkd_db::models::signal::SignalType;
use chkd_db::models::worker::WorkerStatus;
use chkd_services::ResolveStrategy;
use rmcp::schemars;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct ToolResult<T: Serialize> {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub next_steps: Vec<String>,
}

impl<T: Serialize> ToolResult<T> {
    pub fn new(action: impl Into<String>, data: T) -> Self {
        Self {
            action: action.into(),
            data: Some(data),
            next_steps: vec![],
        }
    }

    pub fn with_next_steps(mut self, next_steps: Vec<String>) -> Self {
        self.next_steps = next_steps;
        self
    }
}

// =============================================================================
// REQUEST TYPES
// =============================================================================

/// LEVEL 1: repo(action, ...) - tracked checkouts.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RepoRequest {
    #[schemars(description = "Action: 'list' (default), 'create', 'get', 'update', 'delete'")]
    pub action: Option<String>,
    #[schemars(description = "Repository id, required for get/update/delete")]
    pub id: Option<Uuid>,
    pub absolute_path: Option<String>,
    pub display_name: Option<String>,
    pub default_branch: Option<String>,
    pub enabled: Option<bool>,
}

/// LEVEL 2: item(action, ...) - spec-tracked work items.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ItemRequest {
    #[schemars(
        description = "Action: 'list' (default), 'create', 'get', 'update', 'delete', 'find', 'search', 'progress', 'tags'"
    )]
    pub action: Option<String>,
    pub repo_id: Option<Uuid>,
    pub id: Option<Uuid>,
    pub display_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub story: Option<String>,
    pub key_requirements: Option<Vec<String>>,
    pub files_to_change: Option<Vec<String>>,
    pub testing: Option<Vec<String>>,
    pub area_code: Option<AreaCode>,
    pub section_number: Option<i64>,
    pub workflow_type: Option<String>,
    pub parent_id: Option<Uuid>,
    pub sort_order: Option<i64>,
    pub status: Option<ItemStatus>,
    pub priority: Option<Priority>,
    #[schemars(description = "Free-text query for 'find'/'search'")]
    pub query: Option<String>,
    pub limit: Option<usize>,
    #[schemars(description = "Tags to set verbatim (for action='tags')")]
    pub tags: Option<Vec<String>>,
}

/// LEVEL 3: worker(action, ...) - agent lifecycle and merge arbitration.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct WorkerRequest {
    #[schemars(
        description = "Action: 'list' (default), 'register', 'get', 'update', 'heartbeat', 'transition', 'complete', 'resolve', 'delete'"
    )]
    pub action: Option<String>,
    pub repo_id: Option<Uuid>,
    pub id: Option<String>,
    pub username: Option<String>,
    pub task_id: Option<String>,
    pub task_title: Option<String>,
    pub status: Option<WorkerStatus>,
    pub message: Option<String>,
    pub progress: Option<i64>,
    pub worktree_path: Option<String>,
    pub branch_name: Option<String>,
    pub next_task_id: Option<String>,
    pub next_task_title: Option<String>,
    #[schemars(description = "For 'complete': auto-merge on success, default true")]
    pub auto_merge: Option<bool>,
    #[schemars(description = "For 'resolve': 'ours', 'theirs' or 'abort'")]
    pub strategy: Option<ResolveStrategy>,
    #[schemars(description = "For 'resolve' with strategy 'ours'/'theirs': files to resolve")]
    pub files: Option<Vec<String>>,
    #[schemars(description = "For 'delete': delete even if not terminal")]
    pub force: Option<bool>,
}

/// LEVEL 4: signal(action, ...) - the attention-routing bus.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SignalRequest {
    #[schemars(description = "Action: 'list' (default), 'emit', 'dismiss', 'dismiss_all'")]
    pub action: Option<String>,
    pub repo_id: Option<Uuid>,
    pub id: Option<String>,
    pub worker_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<SignalType>,
    pub message: Option<String>,
    pub details: Option<serde_json::Value>,
    pub action_required: Option<bool>,
    pub action_options: Option<Vec<String>>,
}

/// LEVEL 5: session(action, ...) - single-flight manager session state.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SessionRequest {
    #[schemars(
        description = "Action: 'get' (default), 'start', 'clear', 'update', 'also_did', 'set_anchor', 'clear_anchor', 'on_track'"
    )]
    pub action: Option<String>,
    pub repo_id: Option<Uuid>,
    pub task_id: Option<String>,
    pub task_title: Option<String>,
    pub current_task: Option<String>,
    pub current_item: Option<String>,
    pub status: Option<SessionStatus>,
    pub mode: Option<SessionMode>,
    pub iteration: Option<i64>,
    #[schemars(description = "For 'also_did'")]
    pub text: Option<String>,
    #[schemars(description = "For 'set_anchor'")]
    pub title: Option<String>,
    pub set_by: Option<String>,
}

/// migrate(repo_id, repo_path, spec_file) - one-shot legacy markdown import.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct MigrateRequest {
    pub repo_id: Uuid,
    pub repo_path: String,
    #[schemars(description = "Defaults to 'SPEC.md'")]
    pub spec_file: Option<String>,
}

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct BeltError {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub suggestions: Vec<String>,
}

impl BeltError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            details: None,
            suggestions: vec![],
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }
}

impl From<chkd_db::StoreError> for BeltError {
    fn from(err: chkd_db::StoreError) -> Self {
        BeltError::new(err.to_string())
    }
}

impl From<chkd_services::MergeArbiterError> for BeltError {
    fn from(err: chkd_services::MergeArbiterError) -> Self {
        BeltError::new(err.to_string())
    }
}

impl From<chkd_services::MigrationError> for BeltError {
    fn from(err: chkd_services::MigrationError) -> Self {
        BeltError::new(err.to_string())
    }
}

impl From<chkd_services::SpawnError> for BeltError {
    fn from(err: chkd_services::SpawnError) -> Self {
        BeltError::new(err.to_string())
    }
}
