pub mod health;
pub mod items;
pub mod migration;
pub mod repositories;
pub mod sessions;
pub mod signals;
pub mod workers;

use axum::Router;

use crate::DeploymentImpl;

/// Mounts every entity router under `/api` from one assembly point.
pub fn router(deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().nest(
        "/api",
        Router::new()
            .merge(health::router(deployment))
            .merge(repositories::router(deployment))
            .merge(items::router(deployment))
            .merge(workers::router(deployment))
            .merge(signals::router(deployment))
            .merge(sessions::router(deployment))
            .merge(migration::router(deployment)),
    )
}
