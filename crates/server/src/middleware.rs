use axum::extract::{Path, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chkd_db::models::item::Item;
use chkd_db::models::repository::Repository;
use chkd_db::models::worker::Worker;
use chkd_deployment::Deployment;
use uuid::Uuid;

use crate::error::ApiError;
use crate::DeploymentImpl;

/// Loads the `{repo_id}` path segment into request extensions as a `Repository`,
/// 404ing once up front instead of every handler re-querying.
pub async fn load_repository_middleware(
    State(deployment): State<DeploymentImpl>,
    Path(repo_id): Path<Uuid>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let repo = Repository::find_by_id(deployment.pool(), repo_id)
        .await?
        .ok_or(chkd_db::StoreError::NotFound)?;
    request.extensions_mut().insert(repo);
    Ok(next.run(request).await)
}

/// Loads the `{item_id}` path segment into request extensions as an `Item`.
pub async fn load_item_middleware(
    State(deployment): State<DeploymentImpl>,
    Path(item_id): Path<Uuid>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let item = Item::find_by_id(deployment.pool(), item_id)
        .await?
        .ok_or(chkd_db::StoreError::NotFound)?;
    request.extensions_mut().insert(item);
    Ok(next.run(request).await)
}

/// Loads the `{worker_id}` path segment into request extensions as a `Worker`.
pub async fn load_worker_middleware(
    State(deployment): State<DeploymentImpl>,
    Path(worker_id): Path<String>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let worker = Worker::find_by_id(deployment.pool(), &worker_id)
        .await?
        .ok_or(chkd_db::StoreError::NotFound)?;
    request.extensions_mut().insert(worker);
    Ok(next.run(request).await)
}
