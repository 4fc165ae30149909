use axum::extract::{Path, Query, State};
use axum::response::Json as ResponseJson;
use axum::routing::{get, post};
use axum::Router;
use chkd_db::models::signal::{EmitSignal, Signal};
use chkd_deployment::Deployment;
use chkd_utils::response::ApiResponse;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::DeploymentImpl;

#[derive(Debug, Deserialize)]
pub struct SignalListQuery {
    pub repo_id: Uuid,
}

pub async fn list_active_signals(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<SignalListQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Signal>>>, ApiError> {
    let signals = Signal::active(deployment.pool(), query.repo_id).await?;
    Ok(ResponseJson(ApiResponse::success(signals)))
}

pub async fn emit_signal(
    State(deployment): State<DeploymentImpl>,
    axum::Json(payload): axum::Json<EmitSignal>,
) -> Result<ResponseJson<ApiResponse<Signal>>, ApiError> {
    let signal = Signal::emit(deployment.pool(), &payload).await?;
    Ok(ResponseJson(ApiResponse::success(signal)))
}

pub async fn dismiss_signal(
    Path(signal_id): Path<String>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Signal>>, ApiError> {
    let signal = Signal::dismiss(deployment.pool(), &signal_id).await?;
    Ok(ResponseJson(ApiResponse::success(signal)))
}

pub async fn dismiss_all_signals(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<SignalListQuery>,
) -> Result<ResponseJson<ApiResponse<u64>>, ApiError> {
    let count = Signal::dismiss_all(deployment.pool(), query.repo_id).await?;
    Ok(ResponseJson(ApiResponse::success(count)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let inner = Router::new()
        .route("/", get(list_active_signals).post(emit_signal))
        .route("/dismiss-all", post(dismiss_all_signals))
        .route("/{signal_id}/dismiss", post(dismiss_signal));

    Router::new().nest("/signals", inner)
}
