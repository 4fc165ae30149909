use thiserror::Error;

/// Typed store failure (§4.1, §7). `Corruption` is fatal; callers that see it
/// are expected to log and exit the process rather than recover.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("store io error: {0}")]
    Io(#[from] sqlx::Error),
    #[error("store corruption detected: {0}")]
    Corruption(String),
    #[error("validation error: {0}")]
    Validation(String),
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound => "notFound",
            StoreError::Conflict(_) => "conflict",
            StoreError::Constraint(_) => "constraint",
            StoreError::Io(_) => "io",
            StoreError::Corruption(_) => "corruption",
            StoreError::Validation(_) => "validation",
        }
    }

    /// Classifies a raw sqlx error, folding unique/FK/check violations into
    /// `Conflict`/`Constraint` instead of a bare `Io`.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    StoreError::Conflict(db_err.message().to_string())
                } else if db_err.is_foreign_key_violation() || db_err.is_check_violation() {
                    StoreError::Constraint(db_err.message().to_string())
                } else {
                    StoreError::Io(err)
                }
            }
            _ => StoreError::Io(err),
        }
    }
}
