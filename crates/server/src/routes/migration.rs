use std::path::PathBuf;

use axum::extract::State;
use axum::response::Json as ResponseJson;
use axum::routing::post;
use axum::Router;
use chkd_services::MigrationReport;
use chkd_utils::response::ApiResponse;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::DeploymentImpl;

#[derive(Debug, Deserialize)]
pub struct MigrateBody {
    pub repo_id: Uuid,
    pub repo_path: PathBuf,
    #[serde(default = "default_spec_file")]
    pub spec_file: String,
}

fn default_spec_file() -> String {
    "SPEC.md".to_string()
}

/// Imports `<repoPath>/docs/<specFile>` into tracked items (§4.8). Safe to
/// re-run from the CLI or MCP tool alike.
pub async fn run_migration(
    State(deployment): State<DeploymentImpl>,
    axum::Json(payload): axum::Json<MigrateBody>,
) -> Result<ResponseJson<ApiResponse<MigrationReport>>, ApiError> {
    let report = deployment
        .run_migration(payload.repo_id, &payload.repo_path, &payload.spec_file)
        .await?;
    Ok(ResponseJson(ApiResponse::success(report)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().route("/migration", post(run_migration))
}
