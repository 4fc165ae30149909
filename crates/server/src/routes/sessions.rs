use axum::extract::{Query, State};
use axum::response::Json as ResponseJson;
use axum::routing::{get, post};
use axum::Router;
use chkd_db::models::session::{OnTrack, Session, UpdateSession};
use chkd_deployment::Deployment;
use chkd_utils::response::ApiResponse;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::DeploymentImpl;

#[derive(Debug, Deserialize)]
pub struct RepoQuery {
    pub repo_id: Uuid,
}

pub async fn get_session(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<RepoQuery>,
) -> Result<ResponseJson<ApiResponse<Option<Session>>>, ApiError> {
    let session = Session::get(deployment.pool(), query.repo_id).await?;
    Ok(ResponseJson(ApiResponse::success(session)))
}

#[derive(Debug, Deserialize)]
pub struct StartSessionBody {
    pub repo_id: Uuid,
    pub task_id: String,
    pub task_title: String,
}

pub async fn start_session(
    State(deployment): State<DeploymentImpl>,
    axum::Json(payload): axum::Json<StartSessionBody>,
) -> Result<ResponseJson<ApiResponse<Session>>, ApiError> {
    let session = Session::start(
        deployment.pool(),
        payload.repo_id,
        &payload.task_id,
        &payload.task_title,
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(session)))
}

pub async fn clear_session(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<RepoQuery>,
) -> Result<ResponseJson<ApiResponse<Session>>, ApiError> {
    let session = Session::clear(deployment.pool(), query.repo_id).await?;
    Ok(ResponseJson(ApiResponse::success(session)))
}

pub async fn update_session(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<RepoQuery>,
    axum::Json(payload): axum::Json<UpdateSession>,
) -> Result<ResponseJson<ApiResponse<Session>>, ApiError> {
    let session = Session::update(deployment.pool(), query.repo_id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(session)))
}

#[derive(Debug, Deserialize)]
pub struct AlsoDidBody {
    pub repo_id: Uuid,
    pub text: String,
}

pub async fn add_also_did(
    State(deployment): State<DeploymentImpl>,
    axum::Json(payload): axum::Json<AlsoDidBody>,
) -> Result<ResponseJson<ApiResponse<Session>>, ApiError> {
    let session = Session::add_also_did(deployment.pool(), payload.repo_id, &payload.text).await?;
    Ok(ResponseJson(ApiResponse::success(session)))
}

#[derive(Debug, Deserialize)]
pub struct SetAnchorBody {
    pub repo_id: Uuid,
    pub task_id: String,
    pub title: String,
    pub set_by: String,
}

pub async fn set_anchor(
    State(deployment): State<DeploymentImpl>,
    axum::Json(payload): axum::Json<SetAnchorBody>,
) -> Result<ResponseJson<ApiResponse<Session>>, ApiError> {
    let session = Session::set_anchor(
        deployment.pool(),
        payload.repo_id,
        &payload.task_id,
        &payload.title,
        &payload.set_by,
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(session)))
}

pub async fn clear_anchor(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<RepoQuery>,
) -> Result<ResponseJson<ApiResponse<Session>>, ApiError> {
    let session = Session::clear_anchor(deployment.pool(), query.repo_id).await?;
    Ok(ResponseJson(ApiResponse::success(session)))
}

pub async fn on_track(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<RepoQuery>,
) -> Result<ResponseJson<ApiResponse<OnTrack>>, ApiError> {
    let status = Session::on_track(deployment.pool(), query.repo_id).await?;
    Ok(ResponseJson(ApiResponse::success(status)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let inner = Router::new()
        .route("/", get(get_session).put(update_session))
        .route("/start", post(start_session))
        .route("/clear", post(clear_session))
        .route("/also-did", post(add_also_did))
        .route("/anchor", post(set_anchor).delete(clear_anchor))
        .route("/on-track", get(on_track));

    Router::new().nest("/sessions", inner)
}
