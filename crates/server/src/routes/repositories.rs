use axum::extract::{Extension, State};
use axum::middleware::from_fn_with_state;
use axum::response::Json as ResponseJson;
use axum::routing::get;
use axum::Router;
use chkd_db::models::repository::{CreateRepository, Repository, UpdateRepository};
use chkd_db::models::worker::Worker;
use chkd_db::StoreError;
use chkd_deployment::Deployment;
use chkd_utils::response::ApiResponse;

use crate::error::ApiError;
use crate::middleware::load_repository_middleware;
use crate::DeploymentImpl;

pub async fn list_repositories(
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Vec<Repository>>>, ApiError> {
    let repos = Repository::list(deployment.pool()).await?;
    Ok(ResponseJson(ApiResponse::success(repos)))
}

pub async fn create_repository(
    State(deployment): State<DeploymentImpl>,
    axum::Json(payload): axum::Json<CreateRepository>,
) -> Result<ResponseJson<ApiResponse<Repository>>, ApiError> {
    let repo = Repository::create(deployment.pool(), &payload).await?;
    tracing::info!("registered repository {} at {}", repo.id, repo.absolute_path);
    Ok(ResponseJson(ApiResponse::success(repo)))
}

pub async fn get_repository(
    Extension(repo): Extension<Repository>,
) -> ResponseJson<ApiResponse<Repository>> {
    ResponseJson(ApiResponse::success(repo))
}

pub async fn update_repository(
    Extension(repo): Extension<Repository>,
    State(deployment): State<DeploymentImpl>,
    axum::Json(payload): axum::Json<UpdateRepository>,
) -> Result<ResponseJson<ApiResponse<Repository>>, ApiError> {
    let updated = Repository::update(deployment.pool(), repo.id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(updated)))
}

/// Refuses deletion while non-terminal workers still reference the repository
/// instead of cascading (§9 Open Questions).
pub async fn delete_repository(
    Extension(repo): Extension<Repository>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let workers = Worker::by_repo(deployment.pool(), repo.id).await?;
    if workers.iter().any(|w| !w.status.is_terminal()) {
        return Err(ApiError::Store(StoreError::Conflict(
            "repository has non-terminal workers; resolve or cancel them first".into(),
        )));
    }
    Repository::delete(deployment.pool(), repo.id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn list_repository_workers(
    Extension(repo): Extension<Repository>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Vec<Worker>>>, ApiError> {
    let workers = Worker::by_repo(deployment.pool(), repo.id).await?;
    Ok(ResponseJson(ApiResponse::success(workers)))
}

pub async fn active_worker_count(
    Extension(repo): Extension<Repository>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<i64>>, ApiError> {
    let count = Worker::count_active(deployment.pool(), repo.id).await?;
    Ok(ResponseJson(ApiResponse::success(count)))
}

pub fn router(deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let repo_id_router = Router::new()
        .route(
            "/",
            get(get_repository)
                .put(update_repository)
                .delete(delete_repository),
        )
        .route("/workers", get(list_repository_workers))
        .route("/active-count", get(active_worker_count))
        .layer(from_fn_with_state(deployment.clone(), load_repository_middleware));

    let inner = Router::new()
        .route("/", get(list_repositories).post(create_repository))
        .nest("/{repo_id}", repo_id_router);

    Router::new().nest("/repositories", inner)
}
