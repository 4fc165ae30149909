use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use chkd_db::StoreError;
use chkd_services::{MergeArbiterError, MigrationError, SpawnError};
use chkd_utils::response::ApiResponse;

/// Transport-facing error, mapped to an HTTP status per §7. Every service
/// error funnels through here so routes never hand-roll status codes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Merge(#[from] MergeArbiterError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("{0}")]
    BadRequest(String),
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound => StatusCode::NOT_FOUND,
        StoreError::Conflict(_) => StatusCode::CONFLICT,
        StoreError::Constraint(_) => StatusCode::CONFLICT,
        StoreError::Validation(_) => StatusCode::BAD_REQUEST,
        StoreError::Io(_) | StoreError::Corruption(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Store(err) => store_status(err),
            ApiError::Merge(err) => match err {
                MergeArbiterError::Conflict(_) => StatusCode::CONFLICT,
                MergeArbiterError::Store(store_err) => store_status(store_err),
                MergeArbiterError::Git(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Migration(err) => match err {
                MigrationError::Io { .. } => StatusCode::BAD_REQUEST,
                MigrationError::Store(store_err) => store_status(store_err),
            },
            ApiError::Spawn(err) => match err {
                SpawnError::TaskAlreadyClaimed(_) => StatusCode::CONFLICT,
                SpawnError::Store(store_err) => store_status(store_err),
                SpawnError::Git(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        tracing::warn!("request failed: {}", self);
        (status, Json(ApiResponse::<()>::error(self.to_string()))).into_response()
    }
}
