use axum::response::Json;
use axum::routing::get;
use axum::Router;
use chkd_utils::response::ApiResponse;

use crate::DeploymentImpl;

pub async fn health_check() -> Json<ApiResponse<String>> {
    Json(ApiResponse::success("OK".to_string()))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().route("/health", get(health_check))
}
