use axum::extract::{Extension, Query, State};
use axum::middleware::from_fn_with_state;
use axum::response::Json as ResponseJson;
use axum::routing::{get, post};
use axum::Router;
use chkd_db::models::worker::{CreateWorker, UpdateWorker, Worker, WorkerStatus};
use chkd_db::models::worker_history::WorkerHistory;
use chkd_deployment::Deployment;
use chkd_services::{MergeOutcome, ResolveStrategy};
use chkd_utils::response::ApiResponse;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::load_worker_middleware;
use crate::DeploymentImpl;

#[derive(Debug, Deserialize)]
pub struct WorkerListQuery {
    pub repo_id: Option<Uuid>,
    pub active_only: Option<bool>,
}

pub async fn list_workers(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<WorkerListQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Worker>>>, ApiError> {
    let workers = match (query.repo_id, query.active_only.unwrap_or(false)) {
        (Some(repo_id), _) => Worker::by_repo(deployment.pool(), repo_id).await?,
        (None, true) => Worker::active(deployment.pool()).await?,
        (None, false) => Worker::active(deployment.pool()).await?,
    };
    Ok(ResponseJson(ApiResponse::success(workers)))
}

/// Spawns a worker: creates the row, provisions its worktree+branch, and
/// leaves it `waiting` (§4.9). Callers never see a bare `pending` row.
pub async fn register_worker(
    State(deployment): State<DeploymentImpl>,
    axum::Json(payload): axum::Json<CreateWorker>,
) -> Result<ResponseJson<ApiResponse<Worker>>, ApiError> {
    let worker = deployment.worker_spawner().spawn(&payload).await?;
    tracing::info!("spawned worker {} for repo {}", worker.id, worker.repo_id);
    Ok(ResponseJson(ApiResponse::success(worker)))
}

pub async fn get_worker(Extension(worker): Extension<Worker>) -> ResponseJson<ApiResponse<Worker>> {
    ResponseJson(ApiResponse::success(worker))
}

pub async fn update_worker(
    Extension(worker): Extension<Worker>,
    State(deployment): State<DeploymentImpl>,
    axum::Json(payload): axum::Json<UpdateWorker>,
) -> Result<ResponseJson<ApiResponse<Worker>>, ApiError> {
    let updated = Worker::update(deployment.pool(), &worker.id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(updated)))
}

pub async fn heartbeat_worker(
    Extension(worker): Extension<Worker>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    Worker::heartbeat(deployment.pool(), &worker.id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

#[derive(Debug, Deserialize)]
pub struct TransitionBody {
    pub status: WorkerStatus,
}

pub async fn transition_worker(
    Extension(worker): Extension<Worker>,
    State(deployment): State<DeploymentImpl>,
    axum::Json(payload): axum::Json<TransitionBody>,
) -> Result<ResponseJson<ApiResponse<Worker>>, ApiError> {
    let updated = Worker::transition(deployment.pool(), &worker.id, payload.status).await?;
    Ok(ResponseJson(ApiResponse::success(updated)))
}

#[derive(Debug, Deserialize)]
pub struct DeleteWorkerQuery {
    #[serde(default)]
    pub force: bool,
}

pub async fn delete_worker(
    Extension(worker): Extension<Worker>,
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<DeleteWorkerQuery>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    Worker::delete(deployment.pool(), &worker.id, query.force).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn worker_history(
    Extension(worker): Extension<Worker>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Vec<WorkerHistory>>>, ApiError> {
    let history = WorkerHistory::by_worker(deployment.pool(), &worker.id).await?;
    Ok(ResponseJson(ApiResponse::success(history)))
}

#[derive(Debug, Deserialize)]
pub struct CompleteWorkerBody {
    #[serde(default = "default_true")]
    pub auto_merge: bool,
}

fn default_true() -> bool {
    true
}

/// Runs the dry-run merge and, on conflicts, emits the help signal the
/// resolve-worker endpoints below answer (§4.6).
pub async fn complete_worker(
    Extension(worker): Extension<Worker>,
    State(deployment): State<DeploymentImpl>,
    axum::Json(payload): axum::Json<CompleteWorkerBody>,
) -> Result<ResponseJson<ApiResponse<MergeOutcome>>, ApiError> {
    let outcome = deployment
        .merge_arbiter()
        .complete_worker(&worker.id, payload.auto_merge)
        .await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct ResolveWorkerBody {
    pub strategy: ResolveStrategy,
    pub files: Option<Vec<String>>,
}

pub async fn resolve_worker(
    Extension(worker): Extension<Worker>,
    State(deployment): State<DeploymentImpl>,
    axum::Json(payload): axum::Json<ResolveWorkerBody>,
) -> Result<ResponseJson<ApiResponse<MergeOutcome>>, ApiError> {
    let outcome = deployment
        .merge_arbiter()
        .resolve_worker(&worker.id, payload.strategy, payload.files)
        .await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

/// Forces an immediate sweep outside the background interval, mainly for tests
/// and operator-triggered liveness checks (§4.4).
pub async fn sweep_stale_workers(
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<usize>>, ApiError> {
    let warned = chkd_services::heartbeat::sweep_stale_workers(
        deployment.pool(),
        deployment.config().heartbeat_threshold_ms as i64,
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(warned)))
}

pub fn router(deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let worker_id_router = Router::new()
        .route("/", get(get_worker).put(update_worker).delete(delete_worker))
        .route("/heartbeat", post(heartbeat_worker))
        .route("/transition", post(transition_worker))
        .route("/history", get(worker_history))
        .route("/complete", post(complete_worker))
        .route("/resolve", post(resolve_worker))
        .layer(from_fn_with_state(deployment.clone(), load_worker_middleware));

    let inner = Router::new()
        .route("/", get(list_workers).post(register_worker))
        .route("/sweep", post(sweep_stale_workers))
        .nest("/{worker_id}", worker_id_router);

    Router::new().nest("/workers", inner)
}
